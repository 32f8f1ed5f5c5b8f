use crate::block_states;
use crate::chunk::{Chunk, ChunkSection, MIN_Y, SECTION_COUNT};
use crate::generator::{generate_flat_chunk, FlatWorldSettings};
use crate::palette::PalettedContainer;
use bytes::BytesMut;
use mattock_nbt::{nbt_compound, read_root_named, NbtValue};
use mattock_region::RegionStorage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("chunk ({0}, {1}) unavailable")]
    ChunkUnavailable(i32, i32),
}

/// Concurrent load-or-generate chunk cache.
///
/// Each coordinate owns a once-cell; two concurrent requests for the same
/// absent chunk share one load attempt and its result.
pub struct ChunkRepository {
    cells: Mutex<HashMap<(i32, i32), Arc<OnceCell<Arc<Chunk>>>>>,
    region: Mutex<RegionStorage>,
    settings: FlatWorldSettings,
    biome_ids: HashMap<String, i32>,
    load_attempts: AtomicUsize,
}

impl ChunkRepository {
    pub fn new(
        region_dir: PathBuf,
        settings: FlatWorldSettings,
        biome_ids: HashMap<String, i32>,
    ) -> Result<Self, mattock_region::RegionError> {
        Ok(Self {
            cells: Mutex::new(HashMap::new()),
            region: Mutex::new(RegionStorage::new(region_dir)?),
            settings,
            biome_ids,
            load_attempts: AtomicUsize::new(0),
        })
    }

    /// Number of disk-or-generate attempts, for observability.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Relaxed)
    }

    /// The chunk if it is already resident; never triggers a load.
    pub fn get_resident(&self, chunk_x: i32, chunk_z: i32) -> Option<Arc<Chunk>> {
        let cells = self.cells.lock().unwrap();
        cells
            .get(&(chunk_x, chunk_z))
            .and_then(|cell| cell.get().cloned())
    }

    /// Load-or-generate. The first caller for a coordinate performs the
    /// work; everyone else awaits the same cell.
    pub async fn get_or_load(&self, chunk_x: i32, chunk_z: i32) -> Result<Arc<Chunk>, RepositoryError> {
        let cell = {
            let mut cells = self.cells.lock().unwrap();
            cells
                .entry((chunk_x, chunk_z))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| async { self.load_or_generate(chunk_x, chunk_z) })
            .await
            .cloned()
    }

    fn load_or_generate(&self, chunk_x: i32, chunk_z: i32) -> Result<Arc<Chunk>, RepositoryError> {
        self.load_attempts.fetch_add(1, Ordering::Relaxed);

        let disk = {
            let mut region = self.region.lock().unwrap();
            region.read_chunk(chunk_x, chunk_z)
        };
        match disk {
            Ok(Some(raw)) => match nbt_to_chunk(&raw, &self.biome_ids) {
                Ok(chunk) => {
                    debug!("loaded chunk ({chunk_x}, {chunk_z}) from disk");
                    return Ok(Arc::new(chunk));
                }
                Err(e) => warn!("chunk ({chunk_x}, {chunk_z}) on disk is unreadable: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("region read for ({chunk_x}, {chunk_z}) failed: {e}"),
        }

        let biome_id = self
            .biome_ids
            .get(&self.settings.biome)
            .copied()
            .unwrap_or(0);
        let chunk = generate_flat_chunk(&self.settings, chunk_x, chunk_z, biome_id);
        debug!("generated chunk ({chunk_x}, {chunk_z})");
        Ok(Arc::new(chunk))
    }

    /// Persist a chunk to the region store.
    pub fn store(&self, chunk: &Chunk) -> Result<(), mattock_region::RegionError> {
        let nbt = chunk_to_nbt(chunk, &self.biome_ids);
        let mut buf = BytesMut::new();
        nbt.write_root_named("", &mut buf);
        let mut region = self.region.lock().unwrap();
        region.write_chunk(chunk.x, chunk.z, &buf)
    }
}

/// Serialize a chunk into the on-disk NBT layout: `sections` is a list of
/// compounds carrying `Y`, `block_states` and `biomes` paletted containers.
pub fn chunk_to_nbt(chunk: &Chunk, biome_ids: &HashMap<String, i32>) -> NbtValue {
    let id_to_biome: HashMap<i32, &str> = biome_ids.iter().map(|(k, &v)| (v, k.as_str())).collect();

    let sections_nbt = chunk.with_sections(|sections| {
        sections
            .iter()
            .enumerate()
            .map(|(idx, section)| section_to_nbt(idx, section, &id_to_biome))
            .collect::<Vec<_>>()
    });

    nbt_compound! {
        "xPos" => NbtValue::Int(chunk.x),
        "zPos" => NbtValue::Int(chunk.z),
        "yPos" => NbtValue::Int(MIN_Y / 16),
        "sections" => NbtValue::List(sections_nbt),
    }
}

fn section_to_nbt(idx: usize, section: &ChunkSection, id_to_biome: &HashMap<i32, &str>) -> NbtValue {
    let block_palette: Vec<NbtValue> = section
        .blocks
        .palette()
        .iter()
        .map(|&state| {
            let (name, props) = match block_states::lookup_state(state) {
                Some((def, values)) => (format!("minecraft:{}", def.name), values),
                None => ("minecraft:air".to_string(), Vec::new()),
            };
            let mut entries = vec![("Name".to_string(), NbtValue::String(name))];
            if !props.is_empty() {
                entries.push((
                    "Properties".to_string(),
                    NbtValue::Compound(
                        props
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), NbtValue::String(v)))
                            .collect(),
                    ),
                ));
            }
            NbtValue::Compound(entries)
        })
        .collect();

    let biome_palette: Vec<NbtValue> = section
        .biomes
        .palette()
        .iter()
        .map(|&id| {
            NbtValue::String(
                id_to_biome
                    .get(&id)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "minecraft:plains".to_string()),
            )
        })
        .collect();

    let mut block_states = vec![("palette".to_string(), NbtValue::List(block_palette))];
    if section.blocks.bits_per_entry() > 0 {
        block_states.push((
            "data".to_string(),
            NbtValue::LongArray(section.blocks.data().to_vec()),
        ));
    }
    let mut biomes = vec![("palette".to_string(), NbtValue::List(biome_palette))];
    if section.biomes.bits_per_entry() > 0 {
        biomes.push((
            "data".to_string(),
            NbtValue::LongArray(section.biomes.data().to_vec()),
        ));
    }

    nbt_compound! {
        "Y" => NbtValue::Byte((idx as i32 + MIN_Y / 16) as i8),
        "block_states" => NbtValue::Compound(block_states),
        "biomes" => NbtValue::Compound(biomes),
    }
}

/// Parse an on-disk chunk back into memory. Unknown block names fall back
/// to air; unknown biome names to id 0.
pub fn nbt_to_chunk(raw: &[u8], biome_ids: &HashMap<String, i32>) -> Result<Chunk, String> {
    let (_, root) = read_root_named(raw).map_err(|e| e.to_string())?;
    let x = root.get("xPos").and_then(NbtValue::as_i32).ok_or("missing xPos")?;
    let z = root.get("zPos").and_then(NbtValue::as_i32).ok_or("missing zPos")?;
    let section_list = root
        .get("sections")
        .and_then(NbtValue::as_list)
        .ok_or("missing sections")?;

    let mut sections: Vec<ChunkSection> = (0..SECTION_COUNT).map(|_| ChunkSection::empty()).collect();

    for entry in section_list {
        let y = entry.get("Y").and_then(NbtValue::as_i8).ok_or("section missing Y")? as i32;
        let idx = y - MIN_Y / 16;
        if !(0..SECTION_COUNT as i32).contains(&idx) {
            continue;
        }
        let section = &mut sections[idx as usize];

        if let Some(block_states_nbt) = entry.get("block_states") {
            let palette = decode_block_palette(block_states_nbt)?;
            let data = block_states_nbt.get("data").and_then(NbtValue::as_long_array);
            let values = unpack_container(&palette, data, 4096, 4);
            let container = PalettedContainer::from_values(&values, 4);
            let block_count = values.iter().filter(|&&v| !block_states::is_air(v)).count() as i16;
            section.blocks = container;
            section.block_count = block_count;
        }
        if let Some(biomes_nbt) = entry.get("biomes") {
            let palette: Vec<i32> = biomes_nbt
                .get("palette")
                .and_then(NbtValue::as_list)
                .map(|list| {
                    list.iter()
                        .map(|v| {
                            v.as_str()
                                .and_then(|name| biome_ids.get(name).copied())
                                .unwrap_or(0)
                        })
                        .collect()
                })
                .unwrap_or_else(|| vec![0]);
            let data = biomes_nbt.get("data").and_then(NbtValue::as_long_array);
            let values = unpack_container(&palette, data, 64, 1);
            section.biomes = PalettedContainer::from_values(&values, 1);
        }
    }

    Ok(Chunk::from_sections(x, z, sections))
}

fn decode_block_palette(block_states_nbt: &NbtValue) -> Result<Vec<i32>, String> {
    let list = block_states_nbt
        .get("palette")
        .and_then(NbtValue::as_list)
        .ok_or("block_states missing palette")?;
    Ok(list
        .iter()
        .map(|entry| {
            let name = entry.get("Name").and_then(NbtValue::as_str).unwrap_or("minecraft:air");
            let props: Vec<(String, String)> = entry
                .get("Properties")
                .map(|p| match p {
                    NbtValue::Compound(entries) => entries
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default();
            let prop_refs: Vec<(&str, &str)> =
                props.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            block_states::by_name(name)
                .and_then(|def| def.state_for_named(&prop_refs))
                .unwrap_or(0)
        })
        .collect())
}

/// Expand a packed long array back into per-entry values.
fn unpack_container(palette: &[i32], data: Option<&[i64]>, len: usize, min_bits: u8) -> Vec<i32> {
    if palette.len() <= 1 || data.is_none() {
        return vec![palette.first().copied().unwrap_or(0); len];
    }
    let data = data.unwrap();
    let needed = (usize::BITS - (palette.len() - 1).leading_zeros()) as u8;
    let bits = needed.max(min_bits) as usize;
    let entries_per_long = 64 / bits;
    let mask = (1u64 << bits) - 1;
    (0..len)
        .map(|i| {
            let long_index = i / entries_per_long;
            let bit_index = (i % entries_per_long) * bits;
            let idx = data
                .get(long_index)
                .map(|&l| ((l as u64 >> bit_index) & mask) as usize)
                .unwrap_or(0);
            palette.get(idx).copied().unwrap_or(0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::flat_world_presets;

    fn plains_ids() -> HashMap<String, i32> {
        HashMap::from([("minecraft:plains".to_string(), 0)])
    }

    fn test_repo(dir: &std::path::Path) -> ChunkRepository {
        let settings = flat_world_presets()["classic_flat"].clone();
        ChunkRepository::new(dir.join("region"), settings, plains_ids()).unwrap()
    }

    #[test]
    fn test_chunk_nbt_roundtrip() {
        let settings = flat_world_presets()["classic_flat"].clone();
        let chunk = generate_flat_chunk(&settings, 4, -9, 0);
        chunk.set(3, -60, 5, 1);

        let nbt = chunk_to_nbt(&chunk, &plains_ids());
        let mut buf = BytesMut::new();
        nbt.write_root_named("", &mut buf);
        let parsed = nbt_to_chunk(&buf, &plains_ids()).unwrap();

        assert_eq!(parsed.x, 4);
        assert_eq!(parsed.z, -9);
        assert_eq!(parsed.get(3, -60, 5), 1);
        assert_eq!(parsed.serialize_sections(), chunk.serialize_sections());
    }

    #[tokio::test]
    async fn test_get_or_load_generates_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let repo = test_repo(dir.path());
        assert!(repo.get_resident(0, 0).is_none());
        let chunk = repo.get_or_load(0, 0).await.unwrap();
        assert_eq!(chunk.get(0, MIN_Y, 0), 79);
        assert!(repo.get_resident(0, 0).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(test_repo(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.get_or_load(2, 3).await.unwrap() }));
        }
        let mut chunks = Vec::new();
        for handle in handles {
            chunks.push(handle.await.unwrap());
        }
        for pair in chunks.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(repo.load_attempts(), 1);
    }

    #[tokio::test]
    async fn test_store_then_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = test_repo(dir.path());
            let chunk = repo.get_or_load(1, 1).await.unwrap();
            chunk.set(0, -60, 0, 14);
            repo.store(&chunk).unwrap();
        }
        let repo = test_repo(dir.path());
        let reloaded = repo.get_or_load(1, 1).await.unwrap();
        assert_eq!(reloaded.get(0, -60, 0), 14);
        // Generated chunks would have grass there instead.
        assert_eq!(reloaded.get(1, -61, 1), 9);
    }
}
