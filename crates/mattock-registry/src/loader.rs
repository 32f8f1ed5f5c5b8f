use crate::records::*;
use mattock_protocol::{Packet, RegistryEntry, TagRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every static registry the configuration phase serves, in send order.
pub struct RegistryManager {
    pub dimension_types: Vec<DimensionType>,
    pub biomes: Vec<Biome>,
    pub biome_tags: Vec<BiomeTag>,
    pub chat_types: Vec<ChatType>,
    pub damage_types: Vec<DamageType>,
    pub painting_variants: Vec<PaintingVariant>,
    pub wolf_variants: Vec<WolfVariant>,
}

impl RegistryManager {
    /// Load the compound registry file; missing file or registry sections
    /// fall back to built-in defaults.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            info!("no registry file at {}, using built-in defaults", path.display());
            return Ok(Self::defaults());
        }
        let raw = std::fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&raw)?;

        let mut manager = Self::defaults();

        if let Some(section) = root.get("minecraft:dimension_type").and_then(Value::as_object) {
            let mut out = Vec::new();
            for (identifier, value) in section {
                match serde_json::from_value::<DimensionType>(value.clone()) {
                    Ok(mut dim) => {
                        dim.identifier = identifier.clone();
                        out.push(dim);
                    }
                    Err(e) => warn!("skipping dimension type {identifier}: {e}"),
                }
            }
            if !out.is_empty() {
                out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                manager.dimension_types = out;
            }
        }

        if let Some(section) = root.get("minecraft:worldgen/biome").and_then(Value::as_object) {
            let mut biomes = Vec::new();
            let mut tags = Vec::new();
            for (identifier, value) in section {
                // Entries with a "biomes" list are tag aggregates.
                if value.get("biomes").is_some() {
                    match serde_json::from_value::<BiomeTag>(value.clone()) {
                        Ok(mut tag) => {
                            tag.identifier = identifier.clone();
                            tags.push(tag);
                        }
                        Err(e) => warn!("skipping biome tag {identifier}: {e}"),
                    }
                } else {
                    match serde_json::from_value::<Biome>(value.clone()) {
                        Ok(mut biome) => {
                            biome.identifier = identifier.clone();
                            biomes.push(biome);
                        }
                        Err(e) => warn!("skipping biome {identifier}: {e}"),
                    }
                }
            }
            if !biomes.is_empty() {
                biomes.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                manager.biomes = biomes;
            }
            tags.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            manager.biome_tags = tags;
        }

        if let Some(section) = root.get("minecraft:damage_type").and_then(Value::as_object) {
            let mut out = Vec::new();
            for (identifier, value) in section {
                match serde_json::from_value::<DamageType>(value.clone()) {
                    Ok(mut damage) => {
                        damage.identifier = identifier.clone();
                        out.push(damage);
                    }
                    Err(e) => warn!("skipping damage type {identifier}: {e}"),
                }
            }
            if !out.is_empty() {
                out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                manager.damage_types = out;
            }
        }

        if let Some(section) = root.get("minecraft:painting_variant").and_then(Value::as_object) {
            let mut out = Vec::new();
            for (identifier, value) in section {
                match serde_json::from_value::<PaintingVariant>(value.clone()) {
                    Ok(mut painting) => {
                        painting.identifier = identifier.clone();
                        out.push(painting);
                    }
                    Err(e) => warn!("skipping painting variant {identifier}: {e}"),
                }
            }
            if !out.is_empty() {
                out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                manager.painting_variants = out;
            }
        }

        if let Some(section) = root.get("minecraft:wolf_variant").and_then(Value::as_object) {
            let mut out = Vec::new();
            for (identifier, value) in section {
                match serde_json::from_value::<WolfVariant>(value.clone()) {
                    Ok(mut wolf) => {
                        wolf.identifier = identifier.clone();
                        out.push(wolf);
                    }
                    Err(e) => warn!("skipping wolf variant {identifier}: {e}"),
                }
            }
            if !out.is_empty() {
                out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                manager.wolf_variants = out;
            }
        }

        Ok(manager)
    }

    /// The minimal registry set a vanilla client accepts.
    pub fn defaults() -> Self {
        Self {
            dimension_types: vec![DimensionType::overworld()],
            biomes: vec![Biome::plains()],
            biome_tags: vec![BiomeTag {
                identifier: "minecraft:is_overworld".into(),
                biomes: vec!["minecraft:plains".into()],
            }],
            chat_types: vec![ChatType::chat()],
            damage_types: vec![
                DamageType::simple("minecraft:generic", "generic"),
                DamageType::simple("minecraft:generic_kill", "genericKill"),
                DamageType::simple("minecraft:out_of_world", "outOfWorld"),
                DamageType::simple("minecraft:player_attack", "player"),
            ],
            painting_variants: vec![PaintingVariant::kebab()],
            wolf_variants: vec![WolfVariant::pale()],
        }
    }

    /// Protocol index of a biome (its position in the biome registry).
    pub fn biome_index(&self, name: &str) -> Option<i32> {
        self.biomes
            .iter()
            .position(|b| b.identifier == name)
            .map(|i| i as i32)
    }

    /// Name -> protocol index for every biome.
    pub fn biome_ids(&self) -> HashMap<String, i32> {
        self.biomes
            .iter()
            .enumerate()
            .map(|(i, b)| (b.identifier.clone(), i as i32))
            .collect()
    }

    /// One registry-data packet per registry, in the order the client
    /// expects them.
    pub fn registry_packets(&self) -> Vec<Packet> {
        vec![
            Packet::RegistryData {
                registry_id: "minecraft:dimension_type".into(),
                entries: self
                    .dimension_types
                    .iter()
                    .map(|d| RegistryEntry {
                        id: d.identifier.clone(),
                        data: Some(d.serialize()),
                    })
                    .collect(),
            },
            Packet::RegistryData {
                registry_id: "minecraft:worldgen/biome".into(),
                entries: self
                    .biomes
                    .iter()
                    .map(|b| RegistryEntry {
                        id: b.identifier.clone(),
                        data: Some(b.serialize()),
                    })
                    .collect(),
            },
            Packet::RegistryData {
                registry_id: "minecraft:chat_type".into(),
                entries: self
                    .chat_types
                    .iter()
                    .map(|c| RegistryEntry {
                        id: c.identifier.clone(),
                        data: Some(c.serialize()),
                    })
                    .collect(),
            },
            Packet::RegistryData {
                registry_id: "minecraft:damage_type".into(),
                entries: self
                    .damage_types
                    .iter()
                    .map(|d| RegistryEntry {
                        id: d.identifier.clone(),
                        data: Some(d.serialize()),
                    })
                    .collect(),
            },
            Packet::RegistryData {
                registry_id: "minecraft:painting_variant".into(),
                entries: self
                    .painting_variants
                    .iter()
                    .map(|p| RegistryEntry {
                        id: p.identifier.clone(),
                        data: Some(p.serialize()),
                    })
                    .collect(),
            },
            Packet::RegistryData {
                registry_id: "minecraft:wolf_variant".into(),
                entries: self
                    .wolf_variants
                    .iter()
                    .map(|w| RegistryEntry {
                        id: w.identifier.clone(),
                        data: Some(w.serialize()),
                    })
                    .collect(),
            },
        ]
    }

    /// Biome tags for the update-tags packet, resolved to registry indices.
    pub fn biome_tag_registry(&self) -> TagRegistry {
        TagRegistry {
            registry: "minecraft:worldgen/biome".into(),
            tags: self
                .biome_tags
                .iter()
                .map(|tag| {
                    let ids = tag
                        .biomes
                        .iter()
                        .filter_map(|name| self.biome_index(name))
                        .collect();
                    (tag.identifier.clone(), ids)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_cover_every_registry() {
        let manager = RegistryManager::defaults();
        let packets = manager.registry_packets();
        let ids: Vec<&str> = packets
            .iter()
            .map(|p| match p {
                Packet::RegistryData { registry_id, .. } => registry_id.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            ids,
            vec![
                "minecraft:dimension_type",
                "minecraft:worldgen/biome",
                "minecraft:chat_type",
                "minecraft:damage_type",
                "minecraft:painting_variant",
                "minecraft:wolf_variant",
            ]
        );
    }

    #[test]
    fn test_load_compound_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "minecraft:worldgen/biome": {{
                    "minecraft:plains": {{
                        "has_precipitation": 1,
                        "temperature": 0.8,
                        "downfall": 0.4,
                        "effects": {{
                            "fog_color": 12638463,
                            "water_color": 4159204,
                            "water_fog_color": 329011,
                            "sky_color": 7907327
                        }}
                    }},
                    "minecraft:desert": {{
                        "has_precipitation": 0,
                        "temperature": 2.0,
                        "downfall": 0.0,
                        "effects": {{
                            "fog_color": 12638463,
                            "water_color": 4159204,
                            "water_fog_color": 329011,
                            "sky_color": 7254527
                        }}
                    }},
                    "minecraft:is_overworld": {{
                        "biomes": ["minecraft:plains", "minecraft:desert"]
                    }}
                }}
            }}"#
        )
        .unwrap();

        let manager = RegistryManager::load(file.path()).unwrap();
        assert_eq!(manager.biomes.len(), 2);
        assert_eq!(manager.biome_tags.len(), 1);
        // Sorted by identifier: desert before plains.
        assert_eq!(manager.biome_index("minecraft:desert"), Some(0));
        assert_eq!(manager.biome_index("minecraft:plains"), Some(1));

        let tags = manager.biome_tag_registry();
        assert_eq!(tags.tags[0].0, "minecraft:is_overworld");
        assert_eq!(tags.tags[0].1, vec![1, 0]);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let manager = RegistryManager::load(Path::new("/nonexistent/registry.json")).unwrap();
        assert_eq!(manager.biomes[0].identifier, "minecraft:plains");
        assert!(manager.biome_index("minecraft:plains").is_some());
    }
}
