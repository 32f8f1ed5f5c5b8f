use crate::block_states;
use crate::chunk::{ChunkSection, SECTION_COUNT};
use mattock_nbt::{nbt_compound, NbtValue};

/// Bits per heightmap entry for a 384-block world (values 0..=384).
pub const HEIGHTMAP_BITS: usize = 9;

/// Per-column topmost-block heights, 1-indexed from the world floor;
/// 0 means the column is empty.
fn column_heights(sections: &[ChunkSection], predicate: impl Fn(i32) -> bool) -> Vec<i64> {
    let mut heights = vec![0i64; 256];
    for x in 0..16usize {
        for z in 0..16usize {
            let col = z * 16 + x;
            'scan: for section_idx in (0..SECTION_COUNT).rev() {
                let section = &sections[section_idx];
                if section.block_count == 0 {
                    continue;
                }
                for local_y in (0..16usize).rev() {
                    let state = section.get_block(x, local_y, z);
                    if predicate(state) {
                        heights[col] = (section_idx * 16 + local_y + 1) as i64;
                        break 'scan;
                    }
                }
            }
        }
    }
    heights
}

/// Pack 256 height entries, 9 bits each, little-end-first within each long,
/// entries never crossing a long boundary (7 entries per long, 37 longs).
pub fn pack_heights(heights: &[i64]) -> Vec<i64> {
    let entries_per_long = 64 / HEIGHTMAP_BITS;
    let longs_needed = heights.len().div_ceil(entries_per_long);
    let mask = (1u64 << HEIGHTMAP_BITS) - 1;
    let mut packed = vec![0i64; longs_needed];
    for (i, &h) in heights.iter().enumerate() {
        let long_index = i / entries_per_long;
        let bit_index = (i % entries_per_long) * HEIGHTMAP_BITS;
        packed[long_index] |= ((h as u64 & mask) << bit_index) as i64;
    }
    packed
}

/// Build the heightmaps compound for the chunk packet. Entry order matters
/// to the client renderer, so the compound preserves it.
pub fn build_heightmaps(sections: &[ChunkSection]) -> NbtValue {
    let surface = column_heights(sections, |state| !block_states::is_air(state));
    let motion_blocking = column_heights(sections, |state| !block_states::is_air(state));
    nbt_compound! {
        "MOTION_BLOCKING" => NbtValue::LongArray(pack_heights(&motion_blocking)),
        "WORLD_SURFACE" => NbtValue::LongArray(pack_heights(&surface)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkSection;

    #[test]
    fn test_pack_sizes() {
        let heights = vec![0i64; 256];
        assert_eq!(pack_heights(&heights).len(), 37);
    }

    #[test]
    fn test_pack_values_little_end_first() {
        let mut heights = vec![0i64; 256];
        heights[0] = 14;
        heights[1] = 384;
        let packed = pack_heights(&heights);
        assert_eq!(packed[0] as u64 & 0x1FF, 14);
        assert_eq!((packed[0] as u64 >> 9) & 0x1FF, 384);
    }

    #[test]
    fn test_heights_from_sections() {
        let mut sections: Vec<ChunkSection> = (0..SECTION_COUNT).map(|_| ChunkSection::empty()).collect();
        // Grass at section 0, local y 13 => height 14 for every column.
        for x in 0..16 {
            for z in 0..16 {
                sections[0].set_block(x, 13, z, 9);
            }
        }
        let heights = column_heights(&sections, |s| !block_states::is_air(s));
        assert!(heights.iter().all(|&h| h == 14));
    }
}
