use crate::block_states;
use crate::chunk::{Chunk, ChunkSection, MIN_Y, SECTION_COUNT};
use std::collections::HashMap;
use tracing::warn;

/// One layer of a flat world, bottom-up.
#[derive(Debug, Clone)]
pub struct Layer {
    pub block: String,
    pub height: i32,
}

/// A flat world preset: ordered layers from the world floor upward, plus a
/// biome and feature flags.
#[derive(Debug, Clone)]
pub struct FlatWorldSettings {
    pub biome: String,
    pub features: bool,
    pub lakes: bool,
    pub layers: Vec<Layer>,
}

impl FlatWorldSettings {
    /// Y of the first air block above the layer stack.
    pub fn surface_y(&self) -> i32 {
        MIN_Y + self.layers.iter().map(|l| l.height).sum::<i32>()
    }
}

/// The built-in flat presets.
pub fn flat_world_presets() -> HashMap<String, FlatWorldSettings> {
    let mut presets = HashMap::new();
    presets.insert(
        "classic_flat".to_string(),
        FlatWorldSettings {
            biome: "minecraft:plains".to_string(),
            features: false,
            lakes: false,
            layers: vec![
                Layer { block: "minecraft:bedrock".into(), height: 1 },
                Layer { block: "minecraft:dirt".into(), height: 2 },
                Layer { block: "minecraft:grass_block".into(), height: 1 },
            ],
        },
    );
    presets.insert(
        "desert".to_string(),
        FlatWorldSettings {
            biome: "minecraft:desert".to_string(),
            features: false,
            lakes: false,
            layers: vec![
                Layer { block: "minecraft:bedrock".into(), height: 1 },
                Layer { block: "minecraft:stone".into(), height: 3 },
                Layer { block: "minecraft:sand".into(), height: 4 },
            ],
        },
    );
    presets.insert(
        "the_void".to_string(),
        FlatWorldSettings {
            biome: "minecraft:the_void".to_string(),
            features: false,
            lakes: false,
            layers: vec![],
        },
    );
    presets
}

/// Generate a flat chunk: each column filled bottom-up through the layer
/// list, air above, the preset biome in every 4x4x4 biome cell, and full
/// sky light above the surface.
pub fn generate_flat_chunk(
    settings: &FlatWorldSettings,
    chunk_x: i32,
    chunk_z: i32,
    biome_id: i32,
) -> Chunk {
    let mut sections: Vec<ChunkSection> = (0..SECTION_COUNT).map(|_| ChunkSection::empty()).collect();

    let mut y = 0i32; // section-space offset from the world floor
    for layer in &settings.layers {
        let state = block_states::default_state(&layer.block).unwrap_or_else(|| {
            warn!("unknown block {} in flat preset, using air", layer.block);
            0
        });
        for _ in 0..layer.height {
            let section_idx = (y / 16) as usize;
            let local_y = (y % 16) as usize;
            if section_idx >= SECTION_COUNT {
                warn!("flat preset taller than the world, truncating");
                break;
            }
            let section = &mut sections[section_idx];
            for x in 0..16 {
                for z in 0..16 {
                    section.set_block(x, local_y, z, state);
                }
            }
            y += 1;
        }
    }

    for section in sections.iter_mut() {
        for bx in 0..4 {
            for by in 0..4 {
                for bz in 0..4 {
                    section.set_biome(bx * 4, by * 4, bz * 4, biome_id);
                }
            }
        }
    }

    // Sky light: full brightness from the surface section upward.
    let surface_section = ((settings.surface_y() - MIN_Y) / 16) as usize;
    for section in sections.iter_mut().skip(surface_section) {
        section.fill_sky_light();
    }

    Chunk::from_sections(chunk_x, chunk_z, sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_flat_layers() {
        // Scenario: classic_flat => bedrock, dirt, dirt, grass from the floor.
        let presets = flat_world_presets();
        let settings = &presets["classic_flat"];
        let chunk = generate_flat_chunk(settings, 0, 0, 0);

        assert_eq!(chunk.get(0, MIN_Y, 0), 79); // bedrock
        assert_eq!(chunk.get(0, MIN_Y + 1, 0), 10); // dirt
        assert_eq!(chunk.get(0, MIN_Y + 2, 0), 10); // dirt
        assert_eq!(chunk.get(0, MIN_Y + 3, 0), 9); // grass_block
        assert_eq!(chunk.get(0, MIN_Y + 4, 0), 0); // air above

        chunk.with_sections(|sections| {
            // Only section 0 carries blocks; the rest are empty.
            assert_eq!(sections[0].block_count, 4 * 256);
            for section in &sections[1..] {
                assert_eq!(section.block_count, 0);
            }
            // Palette: air + the three layer blocks, 4 bits per entry.
            let palette = sections[0].blocks.palette();
            assert_eq!(palette, &[0, 79, 10, 9]);
            assert_eq!(sections[0].blocks.bits_per_entry(), 4);
        });
    }

    #[test]
    fn test_biome_fill() {
        let presets = flat_world_presets();
        let chunk = generate_flat_chunk(&presets["classic_flat"], 3, -2, 27);
        chunk.with_sections(|sections| {
            for section in sections.iter() {
                for x in [0, 7, 15] {
                    for y in [0, 8, 15] {
                        for z in [0, 7, 15] {
                            assert_eq!(section.get_biome(x, y, z), 27);
                        }
                    }
                }
            }
        });
    }

    #[test]
    fn test_void_preset_generates_empty_chunk() {
        let presets = flat_world_presets();
        let chunk = generate_flat_chunk(&presets["the_void"], 0, 0, 0);
        chunk.with_sections(|sections| {
            for section in sections.iter() {
                assert!(section.is_empty());
            }
        });
    }

    #[test]
    fn test_generation_is_deterministic() {
        let presets = flat_world_presets();
        let a = generate_flat_chunk(&presets["classic_flat"], 7, 11, 0);
        let b = generate_flat_chunk(&presets["classic_flat"], 7, 11, 0);
        assert_eq!(a.serialize_sections(), b.serialize_sections());
    }
}
