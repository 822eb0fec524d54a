//! Scanline renderer.
//!
//! Per line: build the window masks, rasterise the sprites in OAM
//! order, rasterise each enabled background, then merge the two
//! highest-priority opaque layers per pixel with blending applied.

use crate::bit;
use crate::gba::Gba;
use crate::memory::{addr, reg, Mem};
use crate::ppu::{self, WIDTH};

const CHARBLOCK_SIZE: usize = 0x4000;
const SCREENBLOCK_SIZE: usize = 0x800;

const OBJ_NUM: usize = 4;
const BACKDROP_NUM: usize = 5;
const PRIORITY_BACKDROP: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blend {
    None,
    Alpha,
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderKind {
    Regular,
    Affine,
    Bitmap3,
    Bitmap4,
    Bitmap5,
}

/// Sprite line buffer. Priority 0xFF marks an empty column.
struct ObjLine {
    pixels: [u16; WIDTH],
    priority: [u8; WIDTH],
    is_alpha: [bool; WIDTH],
    is_win: [bool; WIDTH],
    is_opaque: [bool; WIDTH],
}

impl ObjLine {
    fn new() -> Self {
        Self {
            pixels: [0; WIDTH],
            priority: [0xFF; WIDTH],
            is_alpha: [false; WIDTH],
            is_win: [false; WIDTH],
            is_opaque: [false; WIDTH],
        }
    }
}

struct BgLine {
    num: usize,
    kind: RenderKind,
    pixels: [u16; WIDTH],
    is_opaque: [bool; WIDTH],
    priority: u8,
}

impl BgLine {
    fn new(num: usize, kind: RenderKind) -> Self {
        Self {
            num,
            kind,
            pixels: [0; WIDTH],
            is_opaque: [false; WIDTH],
            priority: 0,
        }
    }
}

/// Per-pixel layer enables resolved from WIN0 / WIN1 / the sprite
/// window. Index 0-3 = backgrounds, 4 = sprites, 5 = blending.
struct WindowBounds {
    inside: [[bool; WIDTH]; 6],
    in_range: [bool; WIDTH],
    claimed: [bool; WIDTH],
}

impl WindowBounds {
    fn new() -> Self {
        Self {
            inside: [[true; WIDTH]; 6],
            in_range: [false; WIDTH],
            claimed: [false; WIDTH],
        }
    }

    #[inline]
    fn in_bounds(&self, layer: usize, x: usize) -> bool {
        self.inside[layer][x]
    }

    #[inline]
    fn can_blend(&self, x: usize) -> bool {
        self.inside[5][x]
    }

    /// Resolve WIN0 and WIN1. WIN0 claims pixels first.
    fn build(&mut self, gba: &Gba) {
        let dispcnt = gba.mem.ioreg(reg::DISPCNT);
        let win0_enabled = bit::is_set(dispcnt as u32, 13);
        let win1_enabled = bit::is_set(dispcnt as u32, 14);

        if !win0_enabled && !win1_enabled {
            return;
        }

        let winin = gba.mem.ioreg(reg::WININ);
        let winout = gba.mem.ioreg(reg::WINOUT);
        let win0_in = window_flags(winin);
        let win1_in = window_flags(winin >> 8);
        let out = window_flags(winout);

        let vcount = gba.mem.ioreg(reg::VCOUNT);
        let windows = [
            (win0_enabled, reg::WIN0H, reg::WIN0V, win0_in),
            (win1_enabled, reg::WIN1H, reg::WIN1V, win1_in),
        ];

        for (enabled, h_reg, v_reg, flags) in windows {
            if !enabled {
                continue;
            }

            let h = gba.mem.ioreg(h_reg);
            let v = gba.mem.ioreg(v_reg);
            let x_start = (h >> 8) as usize;
            let x_end = (h & 0xFF) as usize;
            let y_start = v >> 8;
            let y_end = v & 0xFF;
            let in_y = vcount >= y_start && vcount < y_end;

            for x in 0..WIDTH {
                if self.claimed[x] {
                    continue;
                }
                let in_window = in_y && x >= x_start && x < x_end;
                for layer in 0..6 {
                    if in_window {
                        self.inside[layer][x] = flags[layer];
                    } else {
                        self.inside[layer][x] = !self.in_range[x] && out[layer];
                    }
                }
                if in_window {
                    self.in_range[x] = true;
                    self.claimed[x] = true;
                }
            }
        }
    }

    /// Fold the sprite window in, after the OBJ pass.
    fn apply_obj_window(&mut self, gba: &Gba, obj_line: &ObjLine) {
        let dispcnt = gba.mem.ioreg(reg::DISPCNT);
        if !bit::is_set(dispcnt as u32, 15) {
            return;
        }

        let winout = gba.mem.ioreg(reg::WINOUT);
        let obj_flags = window_flags(winout >> 8);
        let out = window_flags(winout);

        for x in 0..WIDTH {
            if self.claimed[x] {
                continue;
            }
            for layer in 0..6 {
                if obj_line.is_win[x] {
                    self.inside[layer][x] = obj_flags[layer];
                } else {
                    self.inside[layer][x] = !self.in_range[x] && out[layer];
                }
            }
            if obj_line.is_win[x] {
                self.in_range[x] = true;
                self.claimed[x] = true;
            }
        }
    }
}

/// Tile-data index into VRAM through its 128 KiB mirror: offsets in
/// the upper 32 KiB fold back onto the sprite charblocks.
#[inline]
fn vram_tile_byte(vram: &[u8], index: usize) -> u8 {
    let mut index = index & addr::VRAM_MASK as usize;
    if index >= 0x18000 {
        index -= 0x8000;
    }
    vram[index]
}

fn window_flags(bits: u16) -> [bool; 6] {
    [
        bit::is_set(bits as u32, 0),
        bit::is_set(bits as u32, 1),
        bit::is_set(bits as u32, 2),
        bit::is_set(bits as u32, 3),
        bit::is_set(bits as u32, 4),
        bit::is_set(bits as u32, 5),
    ]
}

// ========== Blending ==========

fn split(colour: u16) -> (u32, u32, u32) {
    (
        (colour & 0x1F) as u32,
        ((colour >> 5) & 0x1F) as u32,
        ((colour >> 10) & 0x1F) as u32,
    )
}

fn pack(r: u32, g: u32, b: u32) -> u16 {
    ((b.min(31) << 10) | (g.min(31) << 5) | r.min(31)) as u16
}

fn blend_alpha(src: u16, dst: u16, coeff_src: u32, coeff_dst: u32) -> u16 {
    let (sr, sg, sb) = split(src);
    let (dr, dg, db) = split(dst);
    pack(
        (sr * coeff_src + dr * coeff_dst) / 16,
        (sg * coeff_src + dg * coeff_dst) / 16,
        (sb * coeff_src + db * coeff_dst) / 16,
    )
}

fn blend_white(colour: u16, coeff: u32) -> u16 {
    let (r, g, b) = split(colour);
    pack(
        r + ((31 - r) * coeff) / 16,
        g + ((31 - g) * coeff) / 16,
        b + ((31 - b) * coeff) / 16,
    )
}

fn blend_black(colour: u16, coeff: u32) -> u16 {
    let (r, g, b) = split(colour);
    pack(
        r - (r * coeff) / 16,
        g - (g * coeff) / 16,
        b - (b * coeff) / 16,
    )
}

// ========== Sprites ==========

const OBJ_SIZES: [[(u32, u32); 4]; 4] = [
    [(8, 8), (16, 16), (32, 32), (64, 64)],
    [(16, 8), (32, 8), (32, 16), (64, 32)],
    [(8, 16), (8, 32), (16, 32), (32, 64)],
    [(8, 8), (8, 8), (8, 8), (8, 8)],
];

fn render_obj(gba: &Gba, bounds: &WindowBounds, line: &mut ObjLine) {
    let mem = &gba.mem;
    let vcount = gba.mem.ioreg(reg::VCOUNT) as u32;
    let is_1d_layout = bit::is_set(mem.ioreg(reg::DISPCNT) as u32, 6);
    let bitmap_mode = ppu::is_bitmap_mode(gba);

    // sprite tiles live in the last two charblocks
    let ovram = &mem.vram[4 * CHARBLOCK_SIZE..];
    let obj_pram_base = 0x200usize;

    for index in 0..128 {
        let base = index * 8;
        let attr0 = Mem::read16_array(mem.oam.as_ref(), addr::OAM_MASK, base as u32);
        let attr1 = Mem::read16_array(mem.oam.as_ref(), addr::OAM_MASK, base as u32 + 2);
        let attr2 = Mem::read16_array(mem.oam.as_ref(), addr::OAM_MASK, base as u32 + 4);

        let object_mode = bit::get_range16(attr0, 8, 9);
        if object_mode == 0b10 {
            continue; // hidden
        }

        let gfx_mode = bit::get_range16(attr0, 10, 11);
        let is_8bpp = bit::is_set(attr0 as u32, 13);
        let shape = bit::get_range16(attr0, 14, 15) as usize;
        let size = bit::get_range16(attr1, 14, 15) as usize;
        let (x_size, y_size) = OBJ_SIZES[shape][size];

        let y = bit::get_range16(attr0, 0, 7) as u32;
        let sprite_y = if y + y_size > 256 { y.wrapping_sub(256) } else { y };

        // flipping only applies to non-affine sprites
        let x_flip = object_mode == 0 && bit::is_set(attr1 as u32, 12);
        let y_flip = object_mode == 0 && bit::is_set(attr1 as u32, 13);

        if vcount.wrapping_sub(sprite_y) >= y_size {
            continue;
        }

        let sprite_x = bit::sign_extend(bit::get_range16(attr1, 0, 8) as u32, 8);
        let tile_index = bit::get_range16(attr2, 0, 9) as usize;
        let priority = bit::get_range16(attr2, 10, 11) as u8;
        let palette_bank = bit::get_range16(attr2, 12, 15) as usize;

        let line_y = vcount - sprite_y;
        let mos_y = if y_flip { y_size - 1 - line_y } else { line_y };
        let fine_y = (mos_y % 8) as usize;
        let tile_row = (mos_y / 8) as usize;

        // tiles per sprite row in the 1-D layout; the 2-D layout is a
        // fixed 32-slot-wide sheet
        let row_stride_4bpp = if is_1d_layout { x_size as usize / 8 } else { 32 };
        let row_stride_8bpp = if is_1d_layout { x_size as usize / 4 } else { 32 };

        for x in 0..x_size {
            let pixel_x = sprite_x + x as i32;
            if !(0..WIDTH as i32).contains(&pixel_x) {
                continue;
            }
            let pixel_x = pixel_x as usize;

            if !bounds.in_bounds(OBJ_NUM, pixel_x) {
                continue;
            }

            // earlier OAM entries and higher priorities win
            if line.priority[pixel_x] <= priority {
                continue;
            }

            let mos_x = if x_flip { x_size - 1 - x } else { x };
            let fine_x = (mos_x % 8) as usize;
            let tile_col = (mos_x / 8) as usize;

            let (tile_addr, pixel) = if is_8bpp {
                let tile_addr =
                    tile_index * 32 + (tile_row * row_stride_8bpp + tile_col * 2) * 32 + fine_y * 8;
                if tile_addr + fine_x >= CHARBLOCK_SIZE * 2 {
                    break;
                }
                (tile_addr, ovram[tile_addr + fine_x] as usize)
            } else {
                let tile_addr =
                    tile_index * 32 + (tile_row * row_stride_4bpp + tile_col) * 32 + fine_y * 4;
                if tile_addr + fine_x / 2 >= CHARBLOCK_SIZE * 2 {
                    break;
                }
                let mut value = ovram[tile_addr + fine_x / 2] as usize;
                if fine_x & 1 != 0 {
                    value >>= 4;
                }
                (tile_addr, value & 0xF)
            };

            // bitmap modes reserve the first sprite charblock for the
            // framebuffer
            if bitmap_mode && tile_addr < CHARBLOCK_SIZE {
                continue;
            }

            if pixel == 0 {
                continue;
            }

            if gfx_mode == 0b10 {
                line.is_win[pixel_x] = true;
            } else {
                let pram_index = if is_8bpp {
                    obj_pram_base + pixel * 2
                } else {
                    obj_pram_base + palette_bank * 32 + pixel * 2
                };
                line.is_opaque[pixel_x] = true;
                line.priority[pixel_x] = priority;
                line.is_alpha[pixel_x] = gfx_mode == 0b01;
                line.pixels[pixel_x] =
                    Mem::read16_array(mem.pram.as_ref(), addr::PRAM_MASK, pram_index as u32);
            }
        }
    }
}

// ========== Backgrounds ==========

struct BgControl {
    priority: u8,
    charblock: usize,
    mosaic: bool,
    is_8bpp: bool,
    screenblock: usize,
    wrap: bool,
    size: usize,
}

impl BgControl {
    fn from_reg(cnt: u16) -> Self {
        Self {
            priority: bit::get_range16(cnt, 0, 1) as u8,
            charblock: bit::get_range16(cnt, 2, 3) as usize,
            mosaic: bit::is_set(cnt as u32, 6),
            is_8bpp: bit::is_set(cnt as u32, 7),
            screenblock: bit::get_range16(cnt, 8, 12) as usize,
            wrap: bit::is_set(cnt as u32, 13),
            size: bit::get_range16(cnt, 14, 15) as usize,
        }
    }
}

fn bg_regs(num: usize) -> (u32, u32, u32) {
    match num {
        0 => (reg::BG0CNT, reg::BG0HOFS, reg::BG0VOFS),
        1 => (reg::BG1CNT, reg::BG1HOFS, reg::BG1VOFS),
        2 => (reg::BG2CNT, reg::BG2HOFS, reg::BG2VOFS),
        _ => (reg::BG3CNT, reg::BG3HOFS, reg::BG3VOFS),
    }
}

/// Extra screenblock offset when a 512-wide or 512-tall map crosses
/// into its next block.
fn regular_block_offset(size: usize, coord: u32, vertical: bool) -> usize {
    let span = if vertical {
        [256, 256, 512, 512][size]
    } else {
        [256, 512, 256, 512][size]
    };
    if coord % span > 255 {
        // vertically, a 512x512 map skips over the two horizontal blocks
        if vertical && size == 3 {
            SCREENBLOCK_SIZE * 2
        } else {
            SCREENBLOCK_SIZE
        }
    } else {
        0
    }
}

fn render_regular_bg(gba: &Gba, line: &mut BgLine, bounds: &WindowBounds) {
    let mem = &gba.mem;
    let (cnt_reg, hofs_reg, vofs_reg) = bg_regs(line.num);
    let cnt = BgControl::from_reg(mem.ioreg(cnt_reg));
    let xscroll = (mem.ioreg(hofs_reg) & 0x1FF) as u32;
    let yscroll = (mem.ioreg(vofs_reg) & 0x1FF) as u32;
    let vcount = mem.ioreg(reg::VCOUNT) as u32;

    line.priority = cnt.priority;

    let y = (yscroll + vcount) % 256;
    let charblock = cnt.charblock * CHARBLOCK_SIZE;
    let row_base = cnt.screenblock * SCREENBLOCK_SIZE
        + regular_block_offset(cnt.size, yscroll + vcount, true)
        + (y as usize / 8) * 64;

    for x in 0..WIDTH {
        if !bounds.in_bounds(line.num, x) {
            continue;
        }

        let tx = (x as u32 + xscroll) % 256;
        let entry_offset = row_base
            + regular_block_offset(cnt.size, x as u32 + xscroll, false)
            + (tx as usize / 8) * 2;
        let entry = Mem::read16_array(mem.vram.as_ref(), addr::VRAM_MASK, entry_offset as u32);

        let tile_index = bit::get_range16(entry, 0, 9) as usize;
        let hflip = bit::is_set(entry as u32, 10);
        let vflip = bit::is_set(entry as u32, 11);
        let palette_bank = bit::get_range16(entry, 12, 15) as usize;

        let fine_x = if hflip { 7 - (tx & 7) } else { tx & 7 } as usize;
        let fine_y = if vflip { 7 - (y & 7) } else { y & 7 } as usize;

        let (pixel, pram_index) = if cnt.is_8bpp {
            let pixel = vram_tile_byte(
                mem.vram.as_ref(),
                charblock + tile_index * 64 + fine_y * 8 + fine_x,
            ) as usize;
            (pixel, pixel * 2)
        } else {
            let byte = vram_tile_byte(
                mem.vram.as_ref(),
                charblock + tile_index * 32 + fine_y * 4 + fine_x / 2,
            ) as usize;
            let pixel = if fine_x & 1 != 0 { byte >> 4 } else { byte & 0xF };
            (pixel, palette_bank * 32 + pixel * 2)
        };

        if pixel != 0 {
            line.is_opaque[x] = true;
            line.pixels[x] =
                Mem::read16_array(mem.pram.as_ref(), addr::PRAM_MASK, pram_index as u32);
        }
    }
}

/// Affine background: 8bpp tiles, byte map entries, texel walk driven
/// by the PA/PC deltas from the per-line reference shadow.
fn render_affine_bg(gba: &Gba, line: &mut BgLine, bounds: &WindowBounds) {
    let mem = &gba.mem;
    let (cnt_reg, ..) = bg_regs(line.num);
    let cnt = BgControl::from_reg(mem.ioreg(cnt_reg));
    line.priority = cnt.priority;

    let (pa, pc, ref_x, ref_y) = if line.num == 2 {
        (
            mem.ioreg(reg::BG2PA) as i16 as i32,
            mem.ioreg(reg::BG2PC) as i16 as i32,
            gba.ppu.bg2x,
            gba.ppu.bg2y,
        )
    } else {
        (
            mem.ioreg(reg::BG3PA) as i16 as i32,
            mem.ioreg(reg::BG3PC) as i16 as i32,
            gba.ppu.bg3x,
            gba.ppu.bg3y,
        )
    };

    let texels = [128u32, 256, 512, 1024][cnt.size];
    let tiles_per_row = (texels / 8) as usize;
    let charblock = cnt.charblock * CHARBLOCK_SIZE;
    let map_base = cnt.screenblock * SCREENBLOCK_SIZE;

    for x in 0..WIDTH {
        if !bounds.in_bounds(line.num, x) {
            continue;
        }

        let mut px = (ref_x + pa * x as i32) >> 8;
        let mut py = (ref_y + pc * x as i32) >> 8;

        if cnt.wrap {
            px = px.rem_euclid(texels as i32);
            py = py.rem_euclid(texels as i32);
        } else if !(0..texels as i32).contains(&px) || !(0..texels as i32).contains(&py) {
            continue;
        }

        let tile_x = px as usize / 8;
        let tile_y = py as usize / 8;
        let fine_x = px as usize % 8;
        let fine_y = py as usize % 8;

        let tile_index =
            vram_tile_byte(mem.vram.as_ref(), map_base + tile_y * tiles_per_row + tile_x);
        let pixel = vram_tile_byte(
            mem.vram.as_ref(),
            charblock + tile_index as usize * 64 + fine_y * 8 + fine_x,
        ) as usize;

        if pixel != 0 {
            line.is_opaque[x] = true;
            line.pixels[x] =
                Mem::read16_array(mem.pram.as_ref(), addr::PRAM_MASK, (pixel * 2) as u32);
        }
    }
}

fn render_bitmap3_bg(gba: &Gba, line: &mut BgLine, bounds: &WindowBounds) {
    let vcount = gba.mem.ioreg(reg::VCOUNT) as usize;
    let row = vcount * WIDTH * 2;

    for x in 0..WIDTH {
        if !bounds.in_bounds(line.num, x) {
            continue;
        }
        line.is_opaque[x] = true;
        line.pixels[x] = Mem::read16_array(
            gba.mem.vram.as_ref(),
            addr::VRAM_MASK,
            (row + x * 2) as u32,
        );
    }
}

fn render_bitmap4_bg(gba: &Gba, line: &mut BgLine, bounds: &WindowBounds) {
    let page = if bit::is_set(gba.mem.ioreg(reg::DISPCNT) as u32, 4) {
        0xA000
    } else {
        0
    };
    let vcount = gba.mem.ioreg(reg::VCOUNT) as usize;
    let row = page + vcount * WIDTH;

    for x in 0..WIDTH {
        if !bounds.in_bounds(line.num, x) {
            continue;
        }
        let pixel = gba.mem.vram[row + x] as usize;
        if pixel != 0 {
            line.is_opaque[x] = true;
            line.pixels[x] =
                Mem::read16_array(gba.mem.pram.as_ref(), addr::PRAM_MASK, (pixel * 2) as u32);
        }
    }
}

/// Mode 5: 160x128 direct colour, double buffered.
fn render_bitmap5_bg(gba: &Gba, line: &mut BgLine, bounds: &WindowBounds) {
    const BITMAP5_WIDTH: usize = 160;
    const BITMAP5_HEIGHT: usize = 128;

    let vcount = gba.mem.ioreg(reg::VCOUNT) as usize;
    if vcount >= BITMAP5_HEIGHT {
        return;
    }

    let page = if bit::is_set(gba.mem.ioreg(reg::DISPCNT) as u32, 4) {
        0xA000
    } else {
        0
    };
    let row = page + vcount * BITMAP5_WIDTH * 2;

    for x in 0..BITMAP5_WIDTH {
        if !bounds.in_bounds(line.num, x) {
            continue;
        }
        line.is_opaque[x] = true;
        line.pixels[x] = Mem::read16_array(
            gba.mem.vram.as_ref(),
            addr::VRAM_MASK,
            (row + x * 2) as u32,
        );
    }
}

// ========== Merge ==========

/// Top and bottom layer per pixel.
struct Layers {
    pixel: [u16; 2],
    priority: [u8; 2],
    num: [usize; 2],
    obj_alpha: bool,
}

impl Layers {
    fn new(backdrop: u16) -> Self {
        Self {
            pixel: [backdrop; 2],
            priority: [PRIORITY_BACKDROP; 2],
            num: [BACKDROP_NUM; 2],
            obj_alpha: false,
        }
    }

    fn add(&mut self, pixel: u16, priority: u8, num: usize, is_alpha: bool) {
        if priority < self.priority[0] {
            self.pixel[1] = self.pixel[0];
            self.priority[1] = self.priority[0];
            self.num[1] = self.num[0];

            self.pixel[0] = pixel;
            self.priority[0] = priority;
            self.num[0] = num;
            self.obj_alpha = is_alpha;
        } else if priority < self.priority[1] {
            self.pixel[1] = pixel;
            self.priority[1] = priority;
            self.num[1] = num;
        }
    }
}

fn merge(gba: &mut Gba, bounds: &WindowBounds, bg_lines: &[BgLine], obj_line: &ObjLine) {
    let mem = &gba.mem;
    let vcount = mem.ioreg(reg::VCOUNT) as usize;
    let backdrop = Mem::read16_array(mem.pram.as_ref(), addr::PRAM_MASK, 0);
    let obj_enabled = bit::is_set(mem.ioreg(reg::DISPCNT) as u32, 12);

    let bldcnt = mem.ioreg(reg::BLDCNT);
    let blend_mode = match bit::get_range16(bldcnt, 6, 7) {
        0 => Blend::None,
        1 => Blend::Alpha,
        2 => Blend::White,
        _ => Blend::Black,
    };
    let src_enable = |num: usize| bit::is_set(bldcnt as u32, num as u32);
    let dst_enable = |num: usize| bit::is_set(bldcnt as u32, 8 + num as u32);

    let bldalpha = mem.ioreg(reg::BLDALPHA);
    let coeff_src = (bit::get_range16(bldalpha, 0, 4) as u32).min(16);
    let coeff_dst = (bit::get_range16(bldalpha, 8, 12) as u32).min(16);
    let coeff_y = (bit::get_range16(mem.ioreg(reg::BLDY), 0, 4) as u32).min(16);

    let mut row = [0u16; WIDTH];

    for (x, out) in row.iter_mut().enumerate() {
        let mut layers = Layers::new(backdrop);

        if obj_enabled && obj_line.is_opaque[x] {
            layers.add(
                obj_line.pixels[x],
                obj_line.priority[x],
                OBJ_NUM,
                obj_line.is_alpha[x],
            );
        }

        for bg_line in bg_lines {
            if bg_line.is_opaque[x] {
                layers.add(bg_line.pixels[x], bg_line.priority, bg_line.num, false);
            }
        }

        let mut colour = layers.pixel[0];

        if bounds.can_blend(x) {
            if layers.obj_alpha {
                // an alpha-flagged sprite always alpha blends when the
                // layer under it is a blend target
                if dst_enable(layers.num[1]) {
                    colour = blend_alpha(layers.pixel[0], layers.pixel[1], coeff_src, coeff_dst);
                }
            } else if src_enable(layers.num[0]) {
                match blend_mode {
                    Blend::None => {}
                    Blend::Alpha => {
                        if dst_enable(layers.num[1]) {
                            colour = blend_alpha(
                                layers.pixel[0],
                                layers.pixel[1],
                                coeff_src,
                                coeff_dst,
                            );
                        }
                    }
                    Blend::White => colour = blend_white(layers.pixel[0], coeff_y),
                    Blend::Black => colour = blend_black(layers.pixel[0], coeff_y),
                }
            }
        }

        *out = colour;
    }

    gba.ppu.pixels[vcount] = row;
}

// ========== Entry point ==========

fn render_line(gba: &mut Gba, bg_lines: &mut [BgLine]) {
    let mut bounds = WindowBounds::new();
    bounds.build(gba);

    let mut obj_line = ObjLine::new();
    let obj_enabled = bit::is_set(gba.mem.ioreg(reg::DISPCNT) as u32, 12);
    if obj_enabled {
        render_obj(gba, &bounds, &mut obj_line);
        bounds.apply_obj_window(gba, &obj_line);
    }

    let dispcnt = gba.mem.ioreg(reg::DISPCNT);
    for line in bg_lines.iter_mut() {
        if bit::is_set(dispcnt as u32, 8 + line.num as u32) {
            match line.kind {
                RenderKind::Regular => render_regular_bg(gba, line, &bounds),
                RenderKind::Affine => render_affine_bg(gba, line, &bounds),
                RenderKind::Bitmap3 => render_bitmap3_bg(gba, line, &bounds),
                RenderKind::Bitmap4 => render_bitmap4_bg(gba, line, &bounds),
                RenderKind::Bitmap5 => render_bitmap5_bg(gba, line, &bounds),
            }
        }
    }

    merge(gba, &bounds, bg_lines, &obj_line);
}

/// Render the current scanline into the frame buffer.
pub fn render(gba: &mut Gba) {
    if ppu::is_screen_blanked(gba) {
        // forced blank drives the screen white
        let vcount = gba.mem.ioreg(reg::VCOUNT) as usize;
        if vcount < crate::ppu::HEIGHT {
            gba.ppu.pixels[vcount] = [0x7FFF; WIDTH];
        }
        return;
    }

    match ppu::get_mode(gba) {
        0 => {
            let mut lines = [
                BgLine::new(0, RenderKind::Regular),
                BgLine::new(1, RenderKind::Regular),
                BgLine::new(2, RenderKind::Regular),
                BgLine::new(3, RenderKind::Regular),
            ];
            render_line(gba, &mut lines);
        }
        1 => {
            let mut lines = [
                BgLine::new(0, RenderKind::Regular),
                BgLine::new(1, RenderKind::Regular),
                BgLine::new(2, RenderKind::Affine),
            ];
            render_line(gba, &mut lines);
        }
        2 => {
            let mut lines = [
                BgLine::new(2, RenderKind::Affine),
                BgLine::new(3, RenderKind::Affine),
            ];
            render_line(gba, &mut lines);
        }
        3 => {
            let mut lines = [BgLine::new(2, RenderKind::Bitmap3)];
            render_line(gba, &mut lines);
        }
        4 => {
            let mut lines = [BgLine::new(2, RenderKind::Bitmap4)];
            render_line(gba, &mut lines);
        }
        5 => {
            let mut lines = [BgLine::new(2, RenderKind::Bitmap5)];
            render_line(gba, &mut lines);
        }
        mode => log::debug!("unhandled render mode {mode}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::gba::Gba;

    fn fresh(mode: u16) -> Gba {
        let mut gba = Gba::new();
        gba.mem.set_ioreg(reg::DISPCNT, mode | (1 << 10)); // bg2 on
        gba
    }

    #[test]
    fn test_mode3_pixel() {
        let mut gba = fresh(3);
        bus::write16(&mut gba, 0x0600_0000, 0x7FFF);
        bus::write16(&mut gba, 0x0600_0000 + 2 * 5, 0x001F);

        render(&mut gba);
        assert_eq!(gba.ppu.pixels[0][0], 0x7FFF);
        assert_eq!(gba.ppu.pixels[0][5], 0x001F);
        assert_eq!(gba.ppu.pixels[0][6], 0x0000);
    }

    #[test]
    fn test_mode4_paletted_pixel() {
        let mut gba = fresh(4);
        // palette entry 1 = red
        bus::write16(&mut gba, 0x0500_0002, 0x001F);
        bus::write16(&mut gba, 0x0600_0000, 0x0101);

        render(&mut gba);
        assert_eq!(gba.ppu.pixels[0][0], 0x001F);
        assert_eq!(gba.ppu.pixels[0][1], 0x001F);
        // index 0 keeps the backdrop
        assert_eq!(gba.ppu.pixels[0][2], 0x0000);
    }

    #[test]
    fn test_forced_blank_renders_white() {
        let mut gba = fresh(3);
        bus::write16(&mut gba, 0x0600_0000, 0x1234);
        let dispcnt = gba.mem.ioreg(reg::DISPCNT);
        gba.mem.set_ioreg(reg::DISPCNT, dispcnt | 0x80);

        render(&mut gba);
        assert!(gba.ppu.pixels[0].iter().all(|&p| p == 0x7FFF));
    }

    #[test]
    fn test_backdrop_colour() {
        let mut gba = fresh(0);
        gba.mem.set_ioreg(reg::DISPCNT, 0); // no layers at all
        bus::write16(&mut gba, 0x0500_0000, 0x03E0);

        render(&mut gba);
        assert!(gba.ppu.pixels[0].iter().all(|&p| p == 0x03E0));
    }

    #[test]
    fn test_mode0_tile() {
        let mut gba = fresh(0);
        gba.mem.set_ioreg(reg::DISPCNT, 0 | (1 << 8)); // bg0 only
        // bg0: charblock 0, screenblock 8, 4bpp, size 0
        gba.mem.set_ioreg(reg::BG0CNT, 8 << 8);

        // tile 1, first row: pixel 0 uses palette index 2
        bus::write16(&mut gba, 0x0600_0000 + 32 + 0, 0x0002);
        // map entry (0,0) -> tile 1
        bus::write16(&mut gba, 0x0600_0000 + 8 * 0x800, 0x0001);
        // palette index 2 = blue
        bus::write16(&mut gba, 0x0500_0004, 0x7C00);

        render(&mut gba);
        assert_eq!(gba.ppu.pixels[0][0], 0x7C00);
        assert_eq!(gba.ppu.pixels[0][1], 0x0000);
    }

    #[test]
    fn test_window_masks_bg() {
        let mut gba = fresh(3);
        bus::write16(&mut gba, 0x0600_0000, 0x7FFF);
        bus::write16(&mut gba, 0x0600_0002, 0x7FFF);

        // win0 x in [1, 240), y in [0, 160), bg2 enabled only inside,
        // nothing outside
        let dispcnt = gba.mem.ioreg(reg::DISPCNT);
        gba.mem.set_ioreg(reg::DISPCNT, dispcnt | (1 << 13));
        gba.mem.set_ioreg(reg::WIN0H, (1 << 8) | 240);
        gba.mem.set_ioreg(reg::WIN0V, 160);
        gba.mem.set_ioreg(reg::WININ, 0b0000_0100);
        gba.mem.set_ioreg(reg::WINOUT, 0);

        render(&mut gba);
        // outside the window: backdrop
        assert_eq!(gba.ppu.pixels[0][0], 0x0000);
        // inside: the bitmap pixel
        assert_eq!(gba.ppu.pixels[0][1], 0x7FFF);
    }

    #[test]
    fn test_alpha_blend_halves() {
        let mut gba = fresh(3);
        bus::write16(&mut gba, 0x0600_0000, 0x001F); // red pixel on bg2

        // blend bg2 over backdrop, 8/16 each way
        gba.mem.set_ioreg(reg::BLDCNT, (1 << 2) | (1 << 13) | (1 << 6));
        gba.mem.set_ioreg(reg::BLDALPHA, (8 << 8) | 8);

        render(&mut gba);
        // 31 * 8/16 = 15
        assert_eq!(gba.ppu.pixels[0][0], 15);
    }

    #[test]
    fn test_brightness_fades() {
        assert_eq!(blend_white(0x0000, 16), 0x7FFF);
        assert_eq!(blend_black(0x7FFF, 16), 0x0000);
        assert_eq!(blend_white(0x7FFF, 0), 0x7FFF);
    }

    #[test]
    fn test_obj_pixel() {
        let mut gba = fresh(3);
        // obj enabled, 1d layout
        let dispcnt = gba.mem.ioreg(reg::DISPCNT);
        gba.mem.set_ioreg(reg::DISPCNT, dispcnt | (1 << 12) | (1 << 6));

        // sprite 0: 8x8 at (0,0), tile 512, palette bank 0
        bus::write16(&mut gba, 0x0700_0000, 0x0000);
        bus::write16(&mut gba, 0x0700_0002, 0x0000);
        bus::write16(&mut gba, 0x0700_0004, 512);

        // tile 512 first row: pixel 0 -> index 1
        bus::write16(&mut gba, 0x0601_4000, 0x0001);
        // obj palette index 1 = green
        bus::write16(&mut gba, 0x0500_0202, 0x03E0);

        render(&mut gba);
        assert_eq!(gba.ppu.pixels[0][0], 0x03E0);
    }
}
