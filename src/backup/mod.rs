//! Cartridge backup memory: EEPROM, SRAM or Flash.
//!
//! The type is detected by scanning the ROM for the library marker
//! strings games embed. Before detection succeeds, writes to the backup
//! region are discarded.

pub mod eeprom;
pub mod flash;

pub use eeprom::Eeprom;
pub use flash::Flash;

pub const SRAM_SIZE: usize = 0x8000;

/// Battery-backed SRAM, a plain 32 KiB byte store.
pub struct Sram {
    pub data: Box<[u8; SRAM_SIZE]>,
    pub dirty: bool,
}

impl Sram {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; SRAM_SIZE].into_boxed_slice().try_into().unwrap(),
            dirty: false,
        }
    }

    pub fn read(&self, addr: u32) -> u8 {
        self.data[(addr as usize) & (SRAM_SIZE - 1)]
    }

    pub fn write(&mut self, addr: u32, value: u8) {
        self.data[(addr as usize) & (SRAM_SIZE - 1)] = value;
        self.dirty = true;
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

/// The installed backup device.
pub enum Backup {
    None,
    Eeprom(Eeprom),
    Sram(Sram),
    Flash(Flash),
}

impl Backup {
    pub fn is_eeprom(&self) -> bool {
        matches!(self, Backup::Eeprom(_))
    }

    /// Current save payload, empty for `None` and for an EEPROM whose
    /// width was never established.
    pub fn save_data(&self) -> &[u8] {
        match self {
            Backup::None => &[],
            Backup::Eeprom(eeprom) => eeprom.save_data(),
            Backup::Sram(sram) => sram.data.as_ref(),
            Backup::Flash(flash) => flash.data(),
        }
    }

    /// Load a save payload. Fails when the size does not match the
    /// detected device.
    pub fn load_data(&mut self, data: &[u8]) -> bool {
        match self {
            Backup::None => false,
            Backup::Eeprom(eeprom) => eeprom.load_data(data),
            Backup::Sram(sram) => {
                if data.len() != SRAM_SIZE {
                    return false;
                }
                sram.data.copy_from_slice(data);
                true
            }
            Backup::Flash(flash) => flash.load_data(data),
        }
    }
}

/// Marker substrings, checked in this order; first hit wins.
const MARKERS: [(&[u8], fn() -> Backup); 5] = [
    (b"EEPROM", || Backup::Eeprom(Eeprom::new())),
    (b"SRAM", || Backup::Sram(Sram::new())),
    (b"FLASH_", || Backup::Flash(Flash::new(flash::FLASH_SIZE_64K))),
    (b"FLASH512", || Backup::Flash(Flash::new(flash::FLASH_SIZE_64K))),
    (b"FLASH1M", || Backup::Flash(Flash::new(flash::FLASH_SIZE_128K))),
];

/// Scan the ROM for a backup marker and build the matching device.
pub fn detect(rom: &[u8]) -> Backup {
    let mut best: Option<(usize, usize)> = None;

    for (index, (marker, _)) in MARKERS.iter().enumerate() {
        if let Some(pos) = find(rom, marker) {
            if best.map_or(true, |(_, best_pos)| pos < best_pos) {
                best = Some((index, pos));
            }
        }
    }

    match best {
        Some((index, _)) => {
            log::debug!(
                "backup marker found: {}",
                core::str::from_utf8(MARKERS[index].0).unwrap_or("?")
            );
            MARKERS[index].1()
        }
        None => {
            log::debug!("no backup marker found, assuming none");
            Backup::None
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with(marker: &[u8], offset: usize) -> Vec<u8> {
        let mut rom = vec![0u8; 0x200000];
        rom[offset..offset + marker.len()].copy_from_slice(marker);
        rom
    }

    #[test]
    fn test_detect_eeprom() {
        let rom = rom_with(b"EEPROM_V124", 0x100000);
        assert!(matches!(detect(&rom), Backup::Eeprom(_)));
    }

    #[test]
    fn test_detect_sram() {
        let rom = rom_with(b"SRAM_V113", 0x4000);
        assert!(matches!(detect(&rom), Backup::Sram(_)));
    }

    #[test]
    fn test_detect_flash_1m() {
        let rom = rom_with(b"FLASH1M_V103", 0x8000);
        match detect(&rom) {
            Backup::Flash(flash) => assert_eq!(flash.size(), flash::FLASH_SIZE_128K),
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn test_detect_none() {
        let rom = vec![0u8; 0x1000];
        assert!(matches!(detect(&rom), Backup::None));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let mut rom = vec![0u8; 0x1000];
        rom[0x10..0x14].copy_from_slice(b"SRAM");
        rom[0x800..0x806].copy_from_slice(b"EEPROM");
        assert!(matches!(detect(&rom), Backup::Sram(_)));
    }

    #[test]
    fn test_sram_round_trip() {
        let mut sram = Sram::new();
        sram.write(0x123, 0xAB);
        assert_eq!(sram.read(0x123), 0xAB);
        // mirrors above 32k
        assert_eq!(sram.read(0x123 + SRAM_SIZE as u32), 0xAB);
        assert!(sram.dirty);
    }
}
