use crate::block_states;
use crate::heightmap;
use crate::palette::PalettedContainer;
use bytes::{BufMut, BytesMut};
use mattock_protocol::{ChunkLightData, Packet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Minimum world Y coordinate.
pub const MIN_Y: i32 = -64;
/// World height in blocks.
pub const WORLD_HEIGHT: i32 = 384;
/// Number of 16-block sections in a chunk column.
pub const SECTION_COUNT: usize = (WORLD_HEIGHT / 16) as usize;

const NIBBLE_ARRAY_LEN: usize = 2048;

/// A 16x16x16 chunk section: paletted blocks and biomes plus nibble-packed
/// light arrays.
#[derive(Debug, Clone)]
pub struct ChunkSection {
    /// Count of non-air blocks in this section.
    pub block_count: i16,
    pub blocks: PalettedContainer,
    pub biomes: PalettedContainer,
    /// 2048-byte nibble array, two 4-bit values per byte.
    pub sky_light: Option<Vec<u8>>,
    pub block_light: Option<Vec<u8>>,
}

impl ChunkSection {
    /// An all-air section.
    pub fn empty() -> Self {
        Self {
            block_count: 0,
            blocks: PalettedContainer::blocks(0),
            biomes: PalettedContainer::biomes(0),
            sky_light: None,
            block_light: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0 && self.blocks.palette() == [0]
    }

    fn block_index(x: usize, y: usize, z: usize) -> usize {
        y * 256 + z * 16 + x
    }

    fn biome_index(x: usize, y: usize, z: usize) -> usize {
        (y / 4) * 16 + (z / 4) * 4 + (x / 4)
    }

    pub fn get_block(&self, x: usize, y: usize, z: usize) -> i32 {
        self.blocks.get(Self::block_index(x, y, z))
    }

    /// Returns the previous state id.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, state_id: i32) -> i32 {
        let index = Self::block_index(x, y, z);
        let old = self.blocks.get(index);
        if old == state_id {
            return old;
        }
        self.blocks.set(index, state_id);
        if block_states::is_air(old) && !block_states::is_air(state_id) {
            self.block_count += 1;
        } else if !block_states::is_air(old) && block_states::is_air(state_id) {
            self.block_count -= 1;
        }
        old
    }

    pub fn set_biome(&mut self, x: usize, y: usize, z: usize, biome_id: i32) {
        self.biomes.set(Self::biome_index(x, y, z), biome_id);
    }

    pub fn get_biome(&self, x: usize, y: usize, z: usize) -> i32 {
        self.biomes.get(Self::biome_index(x, y, z))
    }

    /// Fill the sky-light nibble array with full brightness.
    pub fn fill_sky_light(&mut self) {
        self.sky_light = Some(vec![0xFF; NIBBLE_ARRAY_LEN]);
    }

    /// Serialize this section for the chunk data packet: block count, then
    /// the block and biome paletted containers.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_i16(self.block_count);
        self.blocks.write_to(buf);
        self.biomes.write_to(buf);
    }
}

/// A chunk column. Sections are guarded by the chunk's own mutex; block
/// get/set never takes a global lock.
pub struct Chunk {
    pub x: i32,
    pub z: i32,
    sections: Mutex<Vec<ChunkSection>>,
    dirty: AtomicBool,
}

impl Chunk {
    pub fn new(x: i32, z: i32) -> Self {
        Self {
            x,
            z,
            sections: Mutex::new((0..SECTION_COUNT).map(|_| ChunkSection::empty()).collect()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn from_sections(x: i32, z: i32, sections: Vec<ChunkSection>) -> Self {
        debug_assert_eq!(sections.len(), SECTION_COUNT);
        Self {
            x,
            z,
            sections: Mutex::new(sections),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn section_coords(y: i32) -> (usize, usize) {
        let section = ((y - MIN_Y) / 16) as usize;
        let local_y = ((y - MIN_Y) % 16) as usize;
        (section, local_y)
    }

    /// Get a block state. `x`/`z` are chunk-local (0..16), `y` is
    /// world-absolute (MIN_Y ..= MIN_Y + WORLD_HEIGHT - 1).
    pub fn get(&self, x: i32, y: i32, z: i32) -> i32 {
        if !Self::in_range(x, y, z) {
            return 0;
        }
        let (section, local_y) = Self::section_coords(y);
        let sections = self.sections.lock().unwrap();
        sections[section].get_block(x as usize, local_y, z as usize)
    }

    /// Set a block state, returning the previous one. Setting air in an
    /// already-empty section is a no-op.
    pub fn set(&self, x: i32, y: i32, z: i32, state_id: i32) -> i32 {
        if !Self::in_range(x, y, z) {
            return 0;
        }
        let (section, local_y) = Self::section_coords(y);
        let mut sections = self.sections.lock().unwrap();
        let sec = &mut sections[section];
        if block_states::is_air(state_id) && sec.is_empty() {
            return 0;
        }
        let old = sec.set_block(x as usize, local_y, z as usize, state_id);
        drop(sections);
        if old != state_id {
            self.mark_dirty();
        }
        old
    }

    fn in_range(x: i32, y: i32, z: i32) -> bool {
        (0..16).contains(&x) && (0..16).contains(&z) && (MIN_Y..MIN_Y + WORLD_HEIGHT).contains(&y)
    }

    /// Run `f` with the section list held.
    pub fn with_sections<R>(&self, f: impl FnOnce(&mut Vec<ChunkSection>) -> R) -> R {
        let mut sections = self.sections.lock().unwrap();
        f(&mut sections)
    }

    /// Serialize all sections into the chunk-data byte array.
    pub fn serialize_sections(&self) -> Vec<u8> {
        let sections = self.sections.lock().unwrap();
        let mut buf = BytesMut::new();
        for section in sections.iter() {
            section.write_to(&mut buf);
        }
        buf.to_vec()
    }

    /// Build the light masks and arrays for the chunk packet. Light
    /// sections cover the world sections plus one padding section below
    /// and above.
    pub fn light_data(&self) -> ChunkLightData {
        let sections = self.sections.lock().unwrap();
        let mut light = ChunkLightData::default();
        let mut sky_mask = 0u64;
        let mut block_mask = 0u64;
        let mut empty_sky_mask = 0u64;
        let mut empty_block_mask = 0u64;

        for (i, section) in sections.iter().enumerate() {
            let light_index = i + 1;
            match &section.sky_light {
                Some(arr) if arr.iter().any(|&b| b != 0) => {
                    sky_mask |= 1 << light_index;
                    light.sky_light_arrays.push(arr.clone());
                }
                Some(_) => empty_sky_mask |= 1 << light_index,
                None => empty_sky_mask |= 1 << light_index,
            }
            match &section.block_light {
                Some(arr) if arr.iter().any(|&b| b != 0) => {
                    block_mask |= 1 << light_index;
                    light.block_light_arrays.push(arr.clone());
                }
                Some(_) => empty_block_mask |= 1 << light_index,
                None => empty_block_mask |= 1 << light_index,
            }
        }

        light.sky_light_mask = pack_bitset(sky_mask);
        light.block_light_mask = pack_bitset(block_mask);
        light.empty_sky_light_mask = pack_bitset(empty_sky_mask);
        light.empty_block_light_mask = pack_bitset(empty_block_mask);
        light
    }

    /// Build the full chunk-data-and-light packet.
    pub fn to_packet(&self) -> Packet {
        let data = self.serialize_sections();
        let heightmaps = {
            let sections = self.sections.lock().unwrap();
            heightmap::build_heightmaps(&sections)
        };
        Packet::ChunkDataAndUpdateLight {
            chunk_x: self.x,
            chunk_z: self.z,
            heightmaps,
            data,
            block_entities: Vec::new(),
            light_data: self.light_data(),
        }
    }
}

/// Encode a bit mask as the wire bit-set (varint long count, then longs).
/// 26 light sections fit a single long.
fn pack_bitset(mask: u64) -> Vec<i64> {
    if mask == 0 {
        Vec::new()
    } else {
        vec![mask as i64]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mattock_protocol::read_varint;

    #[test]
    fn test_set_then_get_roundtrip() {
        let chunk = Chunk::new(0, 0);
        chunk.set(0, MIN_Y, 0, 79);
        chunk.set(5, 100, 9, 1);
        chunk.set(15, MIN_Y + WORLD_HEIGHT - 1, 15, 10);
        assert_eq!(chunk.get(0, MIN_Y, 0), 79);
        assert_eq!(chunk.get(5, 100, 9), 1);
        assert_eq!(chunk.get(15, MIN_Y + WORLD_HEIGHT - 1, 15), 10);
        assert_eq!(chunk.get(1, MIN_Y, 0), 0);
        assert!(chunk.is_dirty());
    }

    #[test]
    fn test_set_air_in_empty_section_is_noop() {
        let chunk = Chunk::new(0, 0);
        chunk.set(3, 10, 3, 0);
        assert!(!chunk.is_dirty());
        chunk.with_sections(|sections| {
            for section in sections.iter() {
                assert!(section.is_empty());
            }
        });
    }

    #[test]
    fn test_block_count_tracks_air_transitions() {
        let mut section = ChunkSection::empty();
        section.set_block(0, 0, 0, 1);
        section.set_block(1, 0, 0, 1);
        assert_eq!(section.block_count, 2);
        section.set_block(0, 0, 0, 0);
        assert_eq!(section.block_count, 1);
        // Replacing one non-air with another keeps the count.
        section.set_block(1, 0, 0, 79);
        assert_eq!(section.block_count, 1);
    }

    #[test]
    fn test_empty_section_serialization() {
        let section = ChunkSection::empty();
        let mut buf = BytesMut::new();
        section.write_to(&mut buf);
        // block_count i16 == 0
        assert_eq!(&buf[..2], &[0, 0]);
        // blocks: bits 0, palette [0 (air)], 0 longs
        assert_eq!(buf[2], 0);
        let mut rest = BytesMut::from(&buf[3..]);
        assert_eq!(read_varint(&mut rest).unwrap(), 0); // air default
        assert_eq!(read_varint(&mut rest).unwrap(), 0); // no data
        // biomes: bits 0, palette [0], 0 longs
        assert_eq!(rest[0], 0);
    }

    #[test]
    fn test_light_masks() {
        let chunk = Chunk::new(0, 0);
        chunk.with_sections(|sections| sections[0].fill_sky_light());
        let light = chunk.light_data();
        // Section 0 maps to light index 1.
        assert_eq!(light.sky_light_mask, vec![0b10]);
        assert_eq!(light.sky_light_arrays.len(), 1);
        assert_eq!(light.sky_light_arrays[0].len(), 2048);
        // All other light sections are flagged empty for sky light.
        let empty = light.empty_sky_light_mask[0] as u64;
        for i in 1..=SECTION_COUNT {
            if i != 1 {
                assert_ne!(empty & (1 << i), 0, "light section {i} empty bit");
            }
        }
        assert!(light.block_light_arrays.is_empty());
    }
}
