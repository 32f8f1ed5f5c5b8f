//! A compact block-state table for the blocks this server places and
//! generates. The full registry is an external collaborator; only the
//! id arithmetic lives here.
//!
//! A block's state id for a property assignment is
//! `min_state_id + mixed_radix(values)` with the rightmost property varying
//! fastest.

/// A single state property of a block type.
#[derive(Debug, Clone, Copy)]
pub enum PropertyDef {
    /// Boolean property; values are ordered [true, false].
    Bool { name: &'static str },
    /// Bounded integer property, inclusive.
    Int {
        name: &'static str,
        min: i32,
        max: i32,
    },
    /// Enum property with an explicit value list.
    Enum {
        name: &'static str,
        values: &'static [&'static str],
    },
}

impl PropertyDef {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyDef::Bool { name } => name,
            PropertyDef::Int { name, .. } => name,
            PropertyDef::Enum { name, .. } => name,
        }
    }

    pub fn cardinality(&self) -> usize {
        match self {
            PropertyDef::Bool { .. } => 2,
            PropertyDef::Int { min, max, .. } => (max - min + 1) as usize,
            PropertyDef::Enum { values, .. } => values.len(),
        }
    }

    /// Ordinal of a textual value within this property, if valid.
    pub fn ordinal(&self, value: &str) -> Option<usize> {
        match self {
            PropertyDef::Bool { .. } => match value {
                "true" => Some(0),
                "false" => Some(1),
                _ => None,
            },
            PropertyDef::Int { min, max, .. } => {
                let v: i32 = value.parse().ok()?;
                (v >= *min && v <= *max).then(|| (v - min) as usize)
            }
            PropertyDef::Enum { values, .. } => values.iter().position(|&v| v == value),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockDef {
    pub name: &'static str,
    pub min_state_id: i32,
    /// Default state id (vanilla's pick within the range).
    pub default_state: i32,
    pub properties: &'static [PropertyDef],
}

impl BlockDef {
    pub fn state_count(&self) -> usize {
        self.properties.iter().map(PropertyDef::cardinality).product::<usize>().max(1)
    }

    pub fn max_state_id(&self) -> i32 {
        self.min_state_id + self.state_count() as i32 - 1
    }

    /// State id for an ordered assignment of property ordinals.
    pub fn state_for(&self, ordinals: &[usize]) -> Option<i32> {
        if ordinals.len() != self.properties.len() {
            return None;
        }
        let mut offset = 0usize;
        for (prop, &ord) in self.properties.iter().zip(ordinals) {
            if ord >= prop.cardinality() {
                return None;
            }
            offset = offset * prop.cardinality() + ord;
        }
        Some(self.min_state_id + offset as i32)
    }

    /// State id for named property values; unnamed properties take their
    /// default ordinal.
    pub fn state_for_named(&self, values: &[(&str, &str)]) -> Option<i32> {
        let default_offset = (self.default_state - self.min_state_id) as usize;
        let mut ordinals = Vec::with_capacity(self.properties.len());
        // Recover per-property default ordinals from the packed default.
        let mut rem = default_offset;
        let mut defaults = vec![0usize; self.properties.len()];
        for (i, prop) in self.properties.iter().enumerate().rev() {
            defaults[i] = rem % prop.cardinality();
            rem /= prop.cardinality();
        }
        for (i, prop) in self.properties.iter().enumerate() {
            let chosen = values
                .iter()
                .find(|(n, _)| *n == prop.name())
                .and_then(|(_, v)| prop.ordinal(v))
                .unwrap_or(defaults[i]);
            ordinals.push(chosen);
        }
        self.state_for(&ordinals)
    }
}

const AXIS: &[&str] = &["x", "y", "z"];

/// Block-state ids for the 1.21 block registry slice this server touches.
pub static BLOCKS: &[BlockDef] = &[
    BlockDef { name: "air", min_state_id: 0, default_state: 0, properties: &[] },
    BlockDef { name: "stone", min_state_id: 1, default_state: 1, properties: &[] },
    BlockDef { name: "granite", min_state_id: 2, default_state: 2, properties: &[] },
    BlockDef { name: "polished_granite", min_state_id: 3, default_state: 3, properties: &[] },
    BlockDef { name: "diorite", min_state_id: 4, default_state: 4, properties: &[] },
    BlockDef { name: "polished_diorite", min_state_id: 5, default_state: 5, properties: &[] },
    BlockDef { name: "andesite", min_state_id: 6, default_state: 6, properties: &[] },
    BlockDef { name: "polished_andesite", min_state_id: 7, default_state: 7, properties: &[] },
    BlockDef {
        name: "grass_block",
        min_state_id: 8,
        default_state: 9,
        properties: &[PropertyDef::Bool { name: "snowy" }],
    },
    BlockDef { name: "dirt", min_state_id: 10, default_state: 10, properties: &[] },
    BlockDef { name: "coarse_dirt", min_state_id: 11, default_state: 11, properties: &[] },
    BlockDef {
        name: "podzol",
        min_state_id: 12,
        default_state: 13,
        properties: &[PropertyDef::Bool { name: "snowy" }],
    },
    BlockDef { name: "cobblestone", min_state_id: 14, default_state: 14, properties: &[] },
    BlockDef { name: "oak_planks", min_state_id: 15, default_state: 15, properties: &[] },
    BlockDef {
        name: "oak_log",
        min_state_id: 130,
        default_state: 131,
        properties: &[PropertyDef::Enum { name: "axis", values: AXIS }],
    },
    BlockDef { name: "bedrock", min_state_id: 79, default_state: 79, properties: &[] },
    BlockDef {
        name: "water",
        min_state_id: 80,
        default_state: 80,
        properties: &[PropertyDef::Int { name: "level", min: 0, max: 15 }],
    },
    BlockDef { name: "sand", min_state_id: 112, default_state: 112, properties: &[] },
    BlockDef { name: "gravel", min_state_id: 118, default_state: 118, properties: &[] },
    BlockDef { name: "gold_ore", min_state_id: 123, default_state: 123, properties: &[] },
    BlockDef { name: "iron_ore", min_state_id: 125, default_state: 125, properties: &[] },
    BlockDef { name: "coal_ore", min_state_id: 127, default_state: 127, properties: &[] },
    BlockDef { name: "lapis_ore", min_state_id: 520, default_state: 520, properties: &[] },
    BlockDef {
        name: "redstone_ore",
        min_state_id: 5734,
        default_state: 5735,
        properties: &[PropertyDef::Bool { name: "lit" }],
    },
    BlockDef { name: "diamond_ore", min_state_id: 4274, default_state: 4274, properties: &[] },
    BlockDef { name: "emerald_ore", min_state_id: 7511, default_state: 7511, properties: &[] },
    BlockDef { name: "copper_ore", min_state_id: 22942, default_state: 22942, properties: &[] },
    BlockDef { name: "crafting_table", min_state_id: 1982, default_state: 1982, properties: &[] },
    BlockDef { name: "glass", min_state_id: 519, default_state: 519, properties: &[] },
    BlockDef { name: "snow_block", min_state_id: 521, default_state: 521, properties: &[] },
];

pub fn by_name(name: &str) -> Option<&'static BlockDef> {
    let bare = name.strip_prefix("minecraft:").unwrap_or(name);
    BLOCKS.iter().find(|b| b.name == bare)
}

/// Default state id for a block name; None when unknown.
pub fn default_state(name: &str) -> Option<i32> {
    by_name(name).map(|b| b.default_state)
}

/// Air states carry no blocks for lighting or counting purposes.
pub fn is_air(state_id: i32) -> bool {
    state_id == 0
}

/// Reverse lookup: the block definition covering a state id, plus the
/// textual property assignment that state encodes.
pub fn lookup_state(state_id: i32) -> Option<(&'static BlockDef, Vec<(&'static str, String)>)> {
    let def = BLOCKS
        .iter()
        .find(|b| state_id >= b.min_state_id && state_id <= b.max_state_id())?;
    let mut rem = (state_id - def.min_state_id) as usize;
    let mut ordinals = vec![0usize; def.properties.len()];
    for (i, prop) in def.properties.iter().enumerate().rev() {
        ordinals[i] = rem % prop.cardinality();
        rem /= prop.cardinality();
    }
    let values = def
        .properties
        .iter()
        .zip(&ordinals)
        .map(|(prop, &ord)| {
            let value = match prop {
                PropertyDef::Bool { .. } => if ord == 0 { "true".to_string() } else { "false".to_string() },
                PropertyDef::Int { min, .. } => (min + ord as i32).to_string(),
                PropertyDef::Enum { values, .. } => values[ord].to_string(),
            };
            (prop.name(), value)
        })
        .collect();
    Some((def, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookup() {
        assert_eq!(default_state("minecraft:bedrock"), Some(79));
        assert_eq!(default_state("grass_block"), Some(9));
        assert_eq!(default_state("unobtainium"), None);
    }

    #[test]
    fn test_mixed_radix_single_bool() {
        let grass = by_name("grass_block").unwrap();
        // snowy=true is ordinal 0, snowy=false ordinal 1.
        assert_eq!(grass.state_for(&[0]), Some(8));
        assert_eq!(grass.state_for(&[1]), Some(9));
        assert_eq!(grass.max_state_id(), 9);
    }

    #[test]
    fn test_mixed_radix_int_range() {
        let water = by_name("water").unwrap();
        assert_eq!(water.state_count(), 16);
        assert_eq!(water.state_for(&[0]), Some(80));
        assert_eq!(water.state_for(&[15]), Some(95));
        assert_eq!(water.state_for(&[16]), None);
    }

    #[test]
    fn test_state_for_named_with_defaults() {
        let grass = by_name("grass_block").unwrap();
        assert_eq!(grass.state_for_named(&[]), Some(9));
        assert_eq!(grass.state_for_named(&[("snowy", "true")]), Some(8));
        let log = by_name("oak_log").unwrap();
        assert_eq!(log.state_for_named(&[("axis", "x")]), Some(130));
        assert_eq!(log.state_for_named(&[]), Some(131));
    }
}
