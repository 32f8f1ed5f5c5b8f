pub mod block_states;
pub mod chunk;
pub mod generator;
pub mod heightmap;
pub mod palette;
pub mod repository;

pub use chunk::{Chunk, ChunkSection, MIN_Y, SECTION_COUNT, WORLD_HEIGHT};
pub use generator::{flat_world_presets, generate_flat_chunk, FlatWorldSettings, Layer};
pub use palette::PalettedContainer;
pub use repository::{ChunkRepository, RepositoryError};
