//! Addressable parameter memory
//!
//! Addresses are the 21-bit values formed by packing three 7-bit sysex
//! address bytes. Within a region the memory is linear in that packed
//! space, so a single write may run across entries and into an adjacent
//! region.

use crate::error::{Mt32Error, Result};
use crate::params::{
    patch_param_max, patch_temp_max, rhythm_temp_max, system_param_max, timbre_param_max,
    PatchParam, PatchTemp, RhythmTemp, SystemParams, TimbreParam, PATCH_PARAM_SIZE,
    PATCH_TEMP_SIZE, RHYTHM_TEMP_SIZE, SYSTEM_PARAM_SIZE, TIMBRE_PARAM_SIZE,
};
use crate::rom::{ControlRom, MELODIC_TIMBRE_COUNT, RHYTHM_KEY_COUNT};

/// Number of parts including the rhythm part
pub const PART_COUNT: usize = 9;
/// Index of the rhythm part
pub const RHYTHM_PART: usize = 8;
/// Number of patches in patch memory
pub const PATCH_COUNT: usize = 128;
/// Number of timbre memory entries
pub const TIMBRE_COUNT: usize = 256;
/// Bytes per timbre memory entry
pub const TIMBRE_ENTRY_SIZE: usize = 256;

/// Default partial reserve for parts 1-8 and rhythm
pub const DEFAULT_RESERVE: [u8; PART_COUNT] = [3, 10, 6, 4, 3, 0, 0, 0, 6];

/// Packs three 7-bit sysex address bytes
pub fn pack_address(address: [u8; 3]) -> u32 {
    ((address[0] as u32 & 0x7F) << 14) | ((address[1] as u32 & 0x7F) << 7) | (address[2] as u32 & 0x7F)
}

/// Splits a packed address back into sysex address bytes
pub fn unpack_address(address: u32) -> [u8; 3] {
    [
        ((address >> 14) & 0x7F) as u8,
        ((address >> 7) & 0x7F) as u8,
        (address & 0x7F) as u8,
    ]
}

/// Addressable memory regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    PatchTemp,
    RhythmTemp,
    TimbreTemp,
    Patches,
    Timbres,
    System,
}

impl MemoryRegion {
    pub const ALL: [MemoryRegion; 6] = [
        MemoryRegion::PatchTemp,
        MemoryRegion::RhythmTemp,
        MemoryRegion::TimbreTemp,
        MemoryRegion::Patches,
        MemoryRegion::Timbres,
        MemoryRegion::System,
    ];

    /// First packed address of the region
    pub fn start_address(self) -> u32 {
        match self {
            MemoryRegion::PatchTemp => pack_address([0x03, 0x00, 0x00]),
            MemoryRegion::RhythmTemp => pack_address([0x03, 0x01, 0x10]),
            MemoryRegion::TimbreTemp => pack_address([0x04, 0x00, 0x00]),
            MemoryRegion::Patches => pack_address([0x05, 0x00, 0x00]),
            MemoryRegion::Timbres => pack_address([0x08, 0x00, 0x00]),
            MemoryRegion::System => pack_address([0x10, 0x00, 0x00]),
        }
    }

    /// Bytes per entry
    pub fn entry_size(self) -> usize {
        match self {
            MemoryRegion::PatchTemp => PATCH_TEMP_SIZE,
            MemoryRegion::RhythmTemp => RHYTHM_TEMP_SIZE,
            MemoryRegion::TimbreTemp => TIMBRE_PARAM_SIZE,
            MemoryRegion::Patches => PATCH_PARAM_SIZE,
            MemoryRegion::Timbres => TIMBRE_ENTRY_SIZE,
            MemoryRegion::System => SYSTEM_PARAM_SIZE,
        }
    }

    pub fn entry_count(self) -> usize {
        match self {
            MemoryRegion::PatchTemp => PART_COUNT,
            MemoryRegion::RhythmTemp => RHYTHM_KEY_COUNT,
            MemoryRegion::TimbreTemp => PART_COUNT - 1,
            MemoryRegion::Patches => PATCH_COUNT,
            MemoryRegion::Timbres => TIMBRE_COUNT,
            MemoryRegion::System => 1,
        }
    }

    pub fn size(self) -> usize {
        self.entry_size() * self.entry_count()
    }

    /// Largest value accepted at `offset` within an entry
    fn max_value(self, offset: usize) -> u8 {
        match self {
            MemoryRegion::PatchTemp => patch_temp_max(offset),
            MemoryRegion::RhythmTemp => rhythm_temp_max(offset),
            MemoryRegion::TimbreTemp | MemoryRegion::Timbres => timbre_param_max(offset),
            MemoryRegion::Patches => patch_param_max(offset),
            MemoryRegion::System => system_param_max(offset),
        }
    }

    /// Whether writes to `entry` are ignored
    fn is_protected(self, entry: usize) -> bool {
        self == MemoryRegion::Timbres && entry < MELODIC_TIMBRE_COUNT
    }

    fn containing(address: u32) -> Option<MemoryRegion> {
        MemoryRegion::ALL.into_iter().find(|region| {
            let start = region.start_address();
            address >= start && ((address - start) as usize) < region.size()
        })
    }
}

/// Entries of one region touched by a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWrite {
    pub region: MemoryRegion,
    pub first_entry: usize,
    /// Offset of the first written byte within `first_entry`
    pub first_offset: usize,
    pub last_entry: usize,
}

impl MemoryWrite {
    pub fn entries(&self) -> std::ops::RangeInclusive<usize> {
        self.first_entry..=self.last_entry
    }
}

/// All sysex addressable parameters
#[derive(Debug, Clone)]
pub struct ParameterMemory {
    patch_temp: Vec<u8>,
    rhythm_temp: Vec<u8>,
    timbre_temp: Vec<u8>,
    patches: Vec<u8>,
    timbres: Vec<u8>,
    system: Vec<u8>,
}

impl ParameterMemory {
    /// Power-on contents for a ROM
    pub fn new(rom: &ControlRom) -> Self {
        let mut memory = Self {
            patch_temp: vec![0; MemoryRegion::PatchTemp.size()],
            rhythm_temp: vec![0; MemoryRegion::RhythmTemp.size()],
            timbre_temp: vec![0; MemoryRegion::TimbreTemp.size()],
            patches: vec![0; MemoryRegion::Patches.size()],
            timbres: vec![0; MemoryRegion::Timbres.size()],
            system: vec![0; MemoryRegion::System.size()],
        };

        for (i, timbre) in rom.melodic_timbres().iter().enumerate() {
            memory.store_timbre(i, timbre);
        }
        for (i, timbre) in rom.rhythm_timbres().iter().enumerate() {
            memory.store_timbre(MELODIC_TIMBRE_COUNT + 64 + i, timbre);
        }

        for i in 0..PATCH_COUNT {
            let patch = PatchParam {
                timbre_group: (i / 64) as u8,
                timbre_num: (i % 64) as u8,
                key_shift: 24,
                fine_tune: 50,
                bender_range: 12,
                assign_mode: 0,
                reverb_switch: 1,
            };
            memory.set_patch(i, &patch);
        }

        for part in 0..PART_COUNT {
            let patch_temp = PatchTemp {
                patch: memory.patch(part),
                output_level: 80,
                panpot: 7,
            };
            memory.set_patch_temp(part, &patch_temp);
            if part < RHYTHM_PART {
                let timbre = memory.timbre(patch_temp.patch.absolute_timbre_num());
                memory.set_timbre_temp(part, &timbre);
            }
        }

        for (key, rhythm) in rom.rhythm_defaults().iter().enumerate() {
            memory.set_rhythm_temp(key, rhythm);
        }

        let mut chan_assign = [0u8; PART_COUNT];
        for (part, channel) in chan_assign.iter_mut().enumerate() {
            *channel = part as u8 + 1;
        }
        memory.set_system(&SystemParams {
            master_tune: 64,
            reverb_mode: 0,
            reverb_time: 5,
            reverb_level: 3,
            reserve_settings: DEFAULT_RESERVE,
            chan_assign,
            master_vol: 100,
        });
        memory
    }

    /// Write parameter bytes at a packed address
    ///
    /// Values are clamped to each parameter's range. Protected entries and
    /// unmapped addresses are skipped. Returns the touched entries of each
    /// region.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Vec<MemoryWrite> {
        let mut touched = Vec::new();
        let mut address = address;
        let mut remaining = data;

        while !remaining.is_empty() {
            let Some(region) = MemoryRegion::containing(address) else {
                log::debug!(
                    "write of {} bytes to unmapped address {:02X?} ignored",
                    remaining.len(),
                    unpack_address(address)
                );
                break;
            };
            let offset = (address - region.start_address()) as usize;
            let len = remaining.len().min(region.size() - offset);
            let entry_size = region.entry_size();

            let buffer = self.region_mut(region);
            for (i, &value) in remaining[..len].iter().enumerate() {
                let position = offset + i;
                let entry = position / entry_size;
                if region.is_protected(entry) {
                    continue;
                }
                let max = region.max_value(position % entry_size);
                if value > max {
                    log::debug!(
                        "{region:?} entry {entry} offset {}: value {value} clamped to {max}",
                        position % entry_size
                    );
                }
                buffer[position] = value.min(max);
            }

            let first_entry = offset / entry_size;
            let last_entry = (offset + len - 1) / entry_size;
            if (first_entry..=last_entry).all(|entry| region.is_protected(entry)) {
                log::debug!("{region:?} entries {first_entry}-{last_entry} are write protected");
            } else {
                touched.push(MemoryWrite {
                    region,
                    first_entry,
                    first_offset: offset % entry_size,
                    last_entry,
                });
            }

            address += len as u32;
            remaining = &remaining[len..];
        }
        touched
    }

    /// Read parameter bytes at a packed address
    pub fn read(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut address = address;
        while out.len() < len {
            let region = MemoryRegion::containing(address).ok_or_else(|| {
                Mt32Error::InvalidParameter(format!(
                    "read from unmapped address {:02X?}",
                    unpack_address(address)
                ))
            })?;
            let offset = (address - region.start_address()) as usize;
            let count = (len - out.len()).min(region.size() - offset);
            out.extend_from_slice(&self.region(region)[offset..offset + count]);
            address += count as u32;
        }
        Ok(out)
    }

    pub fn patch_temp(&self, part: usize) -> PatchTemp {
        PatchTemp::from_bytes(self.entry(MemoryRegion::PatchTemp, part))
    }

    pub fn set_patch_temp(&mut self, part: usize, value: &PatchTemp) {
        self.store(MemoryRegion::PatchTemp, part, &value.to_bytes());
    }

    pub fn rhythm_temp(&self, key: usize) -> RhythmTemp {
        RhythmTemp::from_bytes(self.entry(MemoryRegion::RhythmTemp, key))
    }

    pub fn set_rhythm_temp(&mut self, key: usize, value: &RhythmTemp) {
        self.store(MemoryRegion::RhythmTemp, key, &value.to_bytes());
    }

    pub fn timbre_temp(&self, part: usize) -> TimbreParam {
        TimbreParam::from_bytes(self.entry(MemoryRegion::TimbreTemp, part))
    }

    pub fn set_timbre_temp(&mut self, part: usize, value: &TimbreParam) {
        self.store(MemoryRegion::TimbreTemp, part, &value.to_bytes());
    }

    pub fn patch(&self, index: usize) -> PatchParam {
        PatchParam::from_bytes(self.entry(MemoryRegion::Patches, index))
    }

    pub fn set_patch(&mut self, index: usize, value: &PatchParam) {
        self.store(MemoryRegion::Patches, index, &value.to_bytes());
    }

    pub fn timbre(&self, index: usize) -> TimbreParam {
        TimbreParam::from_bytes(self.entry(MemoryRegion::Timbres, index))
    }

    pub fn system(&self) -> SystemParams {
        SystemParams::from_bytes(&self.system)
    }

    pub fn set_system(&mut self, value: &SystemParams) {
        self.system.copy_from_slice(&value.to_bytes());
    }

    /// Install a timbre regardless of write protection
    fn store_timbre(&mut self, index: usize, timbre: &TimbreParam) {
        self.store(MemoryRegion::Timbres, index, &timbre.to_bytes());
    }

    fn store(&mut self, region: MemoryRegion, entry: usize, bytes: &[u8]) {
        let start = entry * region.entry_size();
        let buffer = self.region_mut(region);
        if let Some(target) = buffer.get_mut(start..start + bytes.len()) {
            target.copy_from_slice(bytes);
        }
    }

    fn entry(&self, region: MemoryRegion, entry: usize) -> &[u8] {
        let size = region.entry_size();
        self.region(region)
            .get(entry * size..(entry + 1) * size)
            .unwrap_or(&[])
    }

    fn region(&self, region: MemoryRegion) -> &[u8] {
        match region {
            MemoryRegion::PatchTemp => &self.patch_temp,
            MemoryRegion::RhythmTemp => &self.rhythm_temp,
            MemoryRegion::TimbreTemp => &self.timbre_temp,
            MemoryRegion::Patches => &self.patches,
            MemoryRegion::Timbres => &self.timbres,
            MemoryRegion::System => &self.system,
        }
    }

    fn region_mut(&mut self, region: MemoryRegion) -> &mut [u8] {
        match region {
            MemoryRegion::PatchTemp => &mut self.patch_temp,
            MemoryRegion::RhythmTemp => &mut self.rhythm_temp,
            MemoryRegion::TimbreTemp => &mut self.timbre_temp,
            MemoryRegion::Patches => &mut self.patches,
            MemoryRegion::Timbres => &mut self.timbres,
            MemoryRegion::System => &mut self.system,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::synthetic_rom;

    fn memory() -> ParameterMemory {
        ParameterMemory::new(&synthetic_rom().unwrap())
    }

    #[test]
    fn test_address_packing() {
        assert_eq!(pack_address([0x03, 0x01, 0x10]), 0xC090);
        assert_eq!(unpack_address(0xC090), [0x03, 0x01, 0x10]);
        // Rhythm temp follows patch temp directly
        assert_eq!(
            MemoryRegion::PatchTemp.start_address() + MemoryRegion::PatchTemp.size() as u32,
            MemoryRegion::RhythmTemp.start_address()
        );
    }

    #[test]
    fn test_power_on_defaults() {
        let memory = memory();
        let system = memory.system();
        assert_eq!(system.master_vol, 100);
        assert_eq!(system.reserve_settings, DEFAULT_RESERVE);
        assert_eq!(memory.patch_temp(3).patch.timbre_num, 3);
        assert_eq!(memory.patch(70).timbre_group, 1);
    }

    #[test]
    fn test_write_clamps_values() {
        let mut memory = memory();
        // Part 2 panpot
        let address = MemoryRegion::PatchTemp.start_address() + 16 + 9;
        let touched = memory.write(address, &[100]);
        assert_eq!(memory.patch_temp(1).panpot, 14);
        assert_eq!(
            touched,
            vec![MemoryWrite {
                region: MemoryRegion::PatchTemp,
                first_entry: 1,
                first_offset: 9,
                last_entry: 1
            }]
        );
    }

    #[test]
    fn test_write_spans_into_next_region() {
        let mut memory = memory();
        let last_patch_temp_byte = MemoryRegion::RhythmTemp.start_address() - 1;
        let touched = memory.write(last_patch_temp_byte, &[0, 42]);
        assert_eq!(touched.len(), 2);
        assert_eq!(touched[1].region, MemoryRegion::RhythmTemp);
        assert_eq!(memory.rhythm_temp(0).timbre, 42);
    }

    #[test]
    fn test_rom_timbres_are_protected() {
        let mut memory = memory();
        let before = memory.timbre(5);
        let address = MemoryRegion::Timbres.start_address() + 5 * TIMBRE_ENTRY_SIZE as u32;
        assert!(memory.write(address, &[1, 2, 3]).is_empty());
        assert_eq!(memory.timbre(5), before);

        let address = MemoryRegion::Timbres.start_address() + 130 * TIMBRE_ENTRY_SIZE as u32;
        memory.write(address, b"Memory");
        assert_eq!(&memory.timbre(130).common.name[..6], b"Memory");
    }

    #[test]
    fn test_unmapped_access() {
        let mut memory = memory();
        assert!(memory.write(pack_address([0x7F, 0, 0]), &[1]).is_empty());
        assert!(matches!(
            memory.read(pack_address([0x7F, 0, 0]), 1),
            Err(Mt32Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_read_back_system() {
        let memory = memory();
        let bytes = memory.read(MemoryRegion::System.start_address(), SYSTEM_PARAM_SIZE).unwrap();
        assert_eq!(bytes, memory.system().to_bytes().to_vec());
    }
}
