//! Typed records for the static registries, parsed from JSON and emitted
//! as nameless NBT compounds during the configuration phase.

use mattock_nbt::{nbt_list, NbtValue};
use serde::{Deserialize, Deserializer};

fn bool_from_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    // The registry file encodes booleans as 0/1.
    let v = i64::deserialize(deserializer)?;
    Ok(v != 0)
}

fn nbt_bool(v: bool) -> NbtValue {
    NbtValue::Byte(v as i8)
}

/// Monster spawn light: either a flat level or an inline uniform range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MonsterSpawnLightLevel {
    Level(i32),
    Distribution { min_inclusive: i32, max_inclusive: i32 },
}

impl MonsterSpawnLightLevel {
    fn serialize(&self) -> NbtValue {
        match self {
            MonsterSpawnLightLevel::Level(level) => NbtValue::Int(*level),
            MonsterSpawnLightLevel::Distribution {
                min_inclusive,
                max_inclusive,
            } => NbtValue::Compound(vec![
                ("type".into(), NbtValue::String("minecraft:uniform".into())),
                ("min_inclusive".into(), NbtValue::Int(*min_inclusive)),
                ("max_inclusive".into(), NbtValue::Int(*max_inclusive)),
            ]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DimensionType {
    #[serde(skip)]
    pub identifier: String,
    #[serde(default)]
    pub fixed_time: Option<i64>,
    #[serde(deserialize_with = "bool_from_int")]
    pub has_skylight: bool,
    #[serde(deserialize_with = "bool_from_int")]
    pub has_ceiling: bool,
    #[serde(deserialize_with = "bool_from_int")]
    pub ultrawarm: bool,
    #[serde(deserialize_with = "bool_from_int")]
    pub natural: bool,
    pub coordinate_scale: f64,
    #[serde(deserialize_with = "bool_from_int")]
    pub bed_works: bool,
    #[serde(deserialize_with = "bool_from_int")]
    pub respawn_anchor_works: bool,
    pub min_y: i32,
    pub height: i32,
    pub logical_height: i32,
    pub infiniburn: String,
    pub effects: String,
    pub ambient_light: f32,
    #[serde(deserialize_with = "bool_from_int")]
    pub piglin_safe: bool,
    #[serde(deserialize_with = "bool_from_int")]
    pub has_raids: bool,
    pub monster_spawn_light_level: MonsterSpawnLightLevel,
    pub monster_spawn_block_light_limit: i32,
}

impl DimensionType {
    pub fn serialize(&self) -> NbtValue {
        let mut entries: Vec<(String, NbtValue)> = Vec::new();
        if let Some(fixed) = self.fixed_time {
            entries.push(("fixed_time".into(), NbtValue::Long(fixed)));
        }
        entries.push(("has_skylight".into(), nbt_bool(self.has_skylight)));
        entries.push(("has_ceiling".into(), nbt_bool(self.has_ceiling)));
        entries.push(("ultrawarm".into(), nbt_bool(self.ultrawarm)));
        entries.push(("natural".into(), nbt_bool(self.natural)));
        entries.push(("coordinate_scale".into(), NbtValue::Double(self.coordinate_scale)));
        entries.push(("bed_works".into(), nbt_bool(self.bed_works)));
        entries.push(("respawn_anchor_works".into(), nbt_bool(self.respawn_anchor_works)));
        entries.push(("min_y".into(), NbtValue::Int(self.min_y)));
        entries.push(("height".into(), NbtValue::Int(self.height)));
        entries.push(("logical_height".into(), NbtValue::Int(self.logical_height)));
        entries.push(("infiniburn".into(), NbtValue::String(self.infiniburn.clone())));
        entries.push(("effects".into(), NbtValue::String(self.effects.clone())));
        entries.push(("ambient_light".into(), NbtValue::Float(self.ambient_light)));
        entries.push(("piglin_safe".into(), nbt_bool(self.piglin_safe)));
        entries.push(("has_raids".into(), nbt_bool(self.has_raids)));
        entries.push((
            "monster_spawn_light_level".into(),
            self.monster_spawn_light_level.serialize(),
        ));
        entries.push((
            "monster_spawn_block_light_limit".into(),
            NbtValue::Int(self.monster_spawn_block_light_limit),
        ));
        NbtValue::Compound(entries)
    }

    pub fn overworld() -> Self {
        Self {
            identifier: "minecraft:overworld".into(),
            fixed_time: None,
            has_skylight: true,
            has_ceiling: false,
            ultrawarm: false,
            natural: true,
            coordinate_scale: 1.0,
            bed_works: true,
            respawn_anchor_works: false,
            min_y: -64,
            height: 384,
            logical_height: 384,
            infiniburn: "#minecraft:infiniburn_overworld".into(),
            effects: "minecraft:overworld".into(),
            ambient_light: 0.0,
            piglin_safe: false,
            has_raids: true,
            monster_spawn_light_level: MonsterSpawnLightLevel::Distribution {
                min_inclusive: 0,
                max_inclusive: 7,
            },
            monster_spawn_block_light_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoodSound {
    pub sound: String,
    pub tick_delay: i32,
    pub offset: f64,
    pub block_search_extent: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BiomeEffects {
    pub fog_color: i32,
    pub water_color: i32,
    pub water_fog_color: i32,
    pub sky_color: i32,
    #[serde(default)]
    pub foliage_color: Option<i32>,
    #[serde(default)]
    pub grass_color: Option<i32>,
    #[serde(default)]
    pub ambient_sound: Option<String>,
    #[serde(default)]
    pub mood_sound: Option<MoodSound>,
}

impl BiomeEffects {
    fn serialize(&self) -> NbtValue {
        let mut entries: Vec<(String, NbtValue)> = vec![
            ("fog_color".into(), NbtValue::Int(self.fog_color)),
            ("water_color".into(), NbtValue::Int(self.water_color)),
            ("water_fog_color".into(), NbtValue::Int(self.water_fog_color)),
            ("sky_color".into(), NbtValue::Int(self.sky_color)),
        ];
        if let Some(c) = self.foliage_color {
            entries.push(("foliage_color".into(), NbtValue::Int(c)));
        }
        if let Some(c) = self.grass_color {
            entries.push(("grass_color".into(), NbtValue::Int(c)));
        }
        if let Some(ref s) = self.ambient_sound {
            entries.push(("ambient_sound".into(), NbtValue::String(s.clone())));
        }
        if let Some(ref mood) = self.mood_sound {
            entries.push((
                "mood_sound".into(),
                NbtValue::Compound(vec![
                    ("sound".into(), NbtValue::String(mood.sound.clone())),
                    ("tick_delay".into(), NbtValue::Int(mood.tick_delay)),
                    ("offset".into(), NbtValue::Double(mood.offset)),
                    ("block_search_extent".into(), NbtValue::Int(mood.block_search_extent)),
                ]),
            ));
        }
        NbtValue::Compound(entries)
    }

    fn from_nbt(nbt: &NbtValue) -> Option<Self> {
        Some(Self {
            fog_color: nbt.get("fog_color")?.as_i32()?,
            water_color: nbt.get("water_color")?.as_i32()?,
            water_fog_color: nbt.get("water_fog_color")?.as_i32()?,
            sky_color: nbt.get("sky_color")?.as_i32()?,
            foliage_color: nbt.get("foliage_color").and_then(NbtValue::as_i32),
            grass_color: nbt.get("grass_color").and_then(NbtValue::as_i32),
            ambient_sound: nbt.get("ambient_sound").and_then(NbtValue::as_str).map(String::from),
            mood_sound: nbt.get("mood_sound").and_then(|m| {
                Some(MoodSound {
                    sound: m.get("sound")?.as_str()?.to_string(),
                    tick_delay: m.get("tick_delay")?.as_i32()?,
                    offset: match m.get("offset")? {
                        NbtValue::Double(d) => *d,
                        _ => return None,
                    },
                    block_search_extent: m.get("block_search_extent")?.as_i32()?,
                })
            }),
        })
    }
}

/// A concrete biome entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Biome {
    #[serde(skip)]
    pub identifier: String,
    #[serde(deserialize_with = "bool_from_int")]
    pub has_precipitation: bool,
    pub temperature: f32,
    #[serde(default)]
    pub temperature_modifier: Option<String>,
    pub downfall: f32,
    pub effects: BiomeEffects,
}

impl Biome {
    pub fn serialize(&self) -> NbtValue {
        let mut entries: Vec<(String, NbtValue)> = vec![
            ("has_precipitation".into(), nbt_bool(self.has_precipitation)),
            ("temperature".into(), NbtValue::Float(self.temperature)),
        ];
        if let Some(ref modifier) = self.temperature_modifier {
            entries.push(("temperature_modifier".into(), NbtValue::String(modifier.clone())));
        }
        entries.push(("downfall".into(), NbtValue::Float(self.downfall)));
        entries.push(("effects".into(), self.effects.serialize()));
        NbtValue::Compound(entries)
    }

    pub fn from_nbt(identifier: &str, nbt: &NbtValue) -> Option<Self> {
        Some(Self {
            identifier: identifier.to_string(),
            has_precipitation: nbt.get("has_precipitation")?.as_i8()? != 0,
            temperature: match nbt.get("temperature")? {
                NbtValue::Float(f) => *f,
                _ => return None,
            },
            temperature_modifier: nbt
                .get("temperature_modifier")
                .and_then(NbtValue::as_str)
                .map(String::from),
            downfall: match nbt.get("downfall")? {
                NbtValue::Float(f) => *f,
                _ => return None,
            },
            effects: BiomeEffects::from_nbt(nbt.get("effects")?)?,
        })
    }

    pub fn plains() -> Self {
        Self {
            identifier: "minecraft:plains".into(),
            has_precipitation: true,
            temperature: 0.8,
            temperature_modifier: None,
            downfall: 0.4,
            effects: BiomeEffects {
                fog_color: 12638463,
                water_color: 4159204,
                water_fog_color: 329011,
                sky_color: 7907327,
                foliage_color: None,
                grass_color: None,
                ambient_sound: None,
                mood_sound: Some(MoodSound {
                    sound: "minecraft:ambient.cave".into(),
                    tick_delay: 6000,
                    offset: 2.0,
                    block_search_extent: 8,
                }),
            },
        }
    }
}

/// A biome-tag aggregate: an identifier plus the biomes it includes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BiomeTag {
    #[serde(skip)]
    pub identifier: String,
    pub biomes: Vec<String>,
}

impl BiomeTag {
    pub fn serialize(&self) -> NbtValue {
        NbtValue::Compound(vec![(
            "biomes".into(),
            NbtValue::List(
                self.biomes
                    .iter()
                    .map(|b| NbtValue::String(b.clone()))
                    .collect(),
            ),
        )])
    }

    pub fn from_nbt(identifier: &str, nbt: &NbtValue) -> Option<Self> {
        let biomes = nbt
            .get("biomes")?
            .as_list()?
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        Some(Self {
            identifier: identifier.to_string(),
            biomes,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaintingVariant {
    #[serde(skip)]
    pub identifier: String,
    pub asset_id: String,
    pub width: i32,
    pub height: i32,
}

impl PaintingVariant {
    pub fn serialize(&self) -> NbtValue {
        NbtValue::Compound(vec![
            ("asset_id".into(), NbtValue::String(self.asset_id.clone())),
            ("width".into(), NbtValue::Int(self.width)),
            ("height".into(), NbtValue::Int(self.height)),
        ])
    }

    pub fn kebab() -> Self {
        Self {
            identifier: "minecraft:kebab".into(),
            asset_id: "minecraft:kebab".into(),
            width: 1,
            height: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WolfVariant {
    #[serde(skip)]
    pub identifier: String,
    pub wild_texture: String,
    pub tame_texture: String,
    pub angry_texture: String,
    pub biomes: String,
}

impl WolfVariant {
    pub fn serialize(&self) -> NbtValue {
        NbtValue::Compound(vec![
            ("wild_texture".into(), NbtValue::String(self.wild_texture.clone())),
            ("tame_texture".into(), NbtValue::String(self.tame_texture.clone())),
            ("angry_texture".into(), NbtValue::String(self.angry_texture.clone())),
            ("biomes".into(), NbtValue::String(self.biomes.clone())),
        ])
    }

    pub fn pale() -> Self {
        Self {
            identifier: "minecraft:pale".into(),
            wild_texture: "minecraft:textures/entity/wolf/wolf.png".into(),
            tame_texture: "minecraft:textures/entity/wolf/wolf_tame.png".into(),
            angry_texture: "minecraft:textures/entity/wolf/wolf_angry.png".into(),
            biomes: "minecraft:plains".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DamageType {
    #[serde(skip)]
    pub identifier: String,
    pub message_id: String,
    pub scaling: String,
    pub exhaustion: f32,
    #[serde(default)]
    pub effects: Option<String>,
    #[serde(default)]
    pub death_message_type: Option<String>,
}

impl DamageType {
    pub fn serialize(&self) -> NbtValue {
        let mut entries: Vec<(String, NbtValue)> = vec![
            ("message_id".into(), NbtValue::String(self.message_id.clone())),
            ("scaling".into(), NbtValue::String(self.scaling.clone())),
            ("exhaustion".into(), NbtValue::Float(self.exhaustion)),
        ];
        if let Some(ref effects) = self.effects {
            entries.push(("effects".into(), NbtValue::String(effects.clone())));
        }
        if let Some(ref kind) = self.death_message_type {
            entries.push(("death_message_type".into(), NbtValue::String(kind.clone())));
        }
        NbtValue::Compound(entries)
    }

    pub fn simple(identifier: &str, message_id: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            message_id: message_id.to_string(),
            scaling: "never".into(),
            exhaustion: 0.0,
            effects: None,
            death_message_type: None,
        }
    }
}

/// Chat types are synthesized rather than read from the registry file.
#[derive(Debug, Clone)]
pub struct ChatType {
    pub identifier: String,
    pub translation_key: String,
    pub narration_key: String,
}

impl ChatType {
    pub fn serialize(&self) -> NbtValue {
        let parameters = nbt_list![
            NbtValue::String("sender".into()),
            NbtValue::String("content".into())
        ];
        NbtValue::Compound(vec![
            (
                "chat".into(),
                NbtValue::Compound(vec![
                    ("translation_key".into(), NbtValue::String(self.translation_key.clone())),
                    ("parameters".into(), parameters.clone()),
                ]),
            ),
            (
                "narration".into(),
                NbtValue::Compound(vec![
                    ("translation_key".into(), NbtValue::String(self.narration_key.clone())),
                    ("parameters".into(), parameters),
                ]),
            ),
        ])
    }

    pub fn chat() -> Self {
        Self {
            identifier: "minecraft:chat".into(),
            translation_key: "chat.type.text".into(),
            narration_key: "chat.type.text.narrate".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biome_nbt_roundtrip() {
        let biome = Biome::plains();
        let nbt = biome.serialize();
        let parsed = Biome::from_nbt("minecraft:plains", &nbt).unwrap();
        assert_eq!(parsed, biome);
    }

    #[test]
    fn test_biome_tag_nbt_roundtrip() {
        let tag = BiomeTag {
            identifier: "minecraft:is_overworld".into(),
            biomes: vec!["minecraft:plains".into(), "minecraft:desert".into()],
        };
        let parsed = BiomeTag::from_nbt("minecraft:is_overworld", &tag.serialize()).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_dimension_type_fixed_time_optional() {
        let mut dim = DimensionType::overworld();
        assert!(dim.serialize().get("fixed_time").is_none());
        dim.fixed_time = Some(6000);
        assert_eq!(
            dim.serialize().get("fixed_time").and_then(NbtValue::as_i64),
            Some(6000)
        );
    }

    #[test]
    fn test_monster_spawn_light_level_variants() {
        let level = MonsterSpawnLightLevel::Level(7);
        assert_eq!(level.serialize(), NbtValue::Int(7));
        let dist = MonsterSpawnLightLevel::Distribution {
            min_inclusive: 0,
            max_inclusive: 7,
        };
        let nbt = dist.serialize();
        assert_eq!(nbt.get("min_inclusive").and_then(NbtValue::as_i32), Some(0));
        assert_eq!(nbt.get("max_inclusive").and_then(NbtValue::as_i32), Some(7));
    }

    #[test]
    fn test_json_bool_from_int() {
        let json = r#"{
            "has_precipitation": 1,
            "temperature": 0.8,
            "downfall": 0.4,
            "effects": {
                "fog_color": 1,
                "water_color": 2,
                "water_fog_color": 3,
                "sky_color": 4
            }
        }"#;
        let biome: Biome = serde_json::from_str(json).unwrap();
        assert!(biome.has_precipitation);
        assert_eq!(biome.effects.sky_color, 4);
    }
}
