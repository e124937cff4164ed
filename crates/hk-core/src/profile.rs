//! Structured character profile.
//!
//! A profile is a record with named sections, serialized as JSON. Sections
//! are read and replaced directly (e.g. an inventory push only touches
//! `sections.inventory`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HkError, HkResult};

/// A character profile as stored by the server and edited by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRecord {
    /// Record layout version
    pub version: u32,
    pub player_name: String,
    pub player_id: i64,
    pub sections: ProfileSections,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSections {
    pub inventory: Vec<ItemStack>,
    /// Skill name → level
    pub skills: BTreeMap<String, f32>,
    /// Crafting station name → level
    pub known_stations: BTreeMap<String, i32>,
    /// Discovered lore key → text
    pub known_texts: BTreeMap<String, String>,
    /// World name → per-world positions
    pub world_data: BTreeMap<String, WorldData>,
    /// Free-form counters (deaths, builds, ...)
    pub stats: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub name: String,
    pub stack: i32,
    #[serde(default = "default_quality")]
    pub quality: i32,
    #[serde(default)]
    pub variant: i32,
}

fn default_quality() -> i32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldData {
    pub spawn: Option<Position>,
    pub logout: Option<Position>,
    pub death: Option<Position>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl ProfileRecord {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(player_name: impl Into<String>, player_id: i64) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            player_name: player_name.into(),
            player_id,
            sections: ProfileSections::default(),
        }
    }

    pub fn to_bytes(&self) -> HkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| HkError::codec(format!("serializing profile: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> HkResult<Self> {
        serde_json::from_slice(data).map_err(|e| HkError::codec(format!("parsing profile: {e}")))
    }

    /// Whether this character has ever been played in any world.
    pub fn has_world_data(&self) -> bool {
        !self.sections.world_data.is_empty()
    }

    pub fn replace_inventory(&mut self, items: Vec<ItemStack>) {
        self.sections.inventory = items;
    }
}

/// Encode an inventory section for the inventory push event.
pub fn encode_inventory(items: &[ItemStack]) -> HkResult<Vec<u8>> {
    serde_json::to_vec(items).map_err(|e| HkError::codec(format!("serializing inventory: {e}")))
}

pub fn decode_inventory(data: &[u8]) -> HkResult<Vec<ItemStack>> {
    serde_json::from_slice(data).map_err(|e| HkError::codec(format!("parsing inventory: {e}")))
}

/// Starting kit applied to brand-new characters on servers that have one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerTemplate {
    pub skills: BTreeMap<String, f32>,
    /// Item name → stack size
    pub items: BTreeMap<String, i32>,
    pub spawn: Option<Position>,
}

impl PlayerTemplate {
    pub fn from_toml_str(s: &str) -> HkResult<Self> {
        toml::from_str(s).map_err(|e| HkError::Config(format!("parsing player template: {e}")))
    }

    pub fn from_file(path: &Path) -> HkResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HkError::Config(format!("reading player template {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Body of the template message the server sends on connect.
    pub fn encode(&self) -> HkResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| HkError::codec(format!("serializing player template: {e}")))
    }

    pub fn decode(data: &[u8]) -> HkResult<Self> {
        serde_json::from_slice(data).map_err(|e| HkError::codec(format!("parsing player template: {e}")))
    }

    /// Apply the template to a fresh record. `world` selects where the spawn
    /// point is recorded.
    pub fn apply(&self, record: &mut ProfileRecord, world: &str) {
        for (skill, level) in &self.skills {
            record.sections.skills.insert(skill.clone(), *level);
        }
        for (name, stack) in &self.items {
            record.sections.inventory.push(ItemStack {
                name: name.clone(),
                stack: *stack,
                quality: 1,
                variant: 0,
            });
        }
        if let Some(spawn) = self.spawn {
            record
                .sections
                .world_data
                .entry(world.to_string())
                .or_default()
                .spawn = Some(spawn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProfileRecord {
        let mut p = ProfileRecord::new("Freydis", 77);
        p.sections.inventory.push(ItemStack {
            name: "Wood".into(),
            stack: 50,
            quality: 1,
            variant: 0,
        });
        p.sections.skills.insert("Axes".into(), 12.5);
        p.sections.known_texts.insert("rune_1".into(), "Odin watches".into());
        p
    }

    #[test]
    fn bytes_roundtrip() {
        let p = sample();
        let back = ProfileRecord::from_bytes(&p.to_bytes().unwrap()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(ProfileRecord::from_bytes(b"\x00\x01not json").is_err());
    }

    #[test]
    fn missing_sections_default() {
        let p = ProfileRecord::from_bytes(br#"{"player_name":"Thora"}"#).unwrap();
        assert_eq!(p.player_name, "Thora");
        assert!(p.sections.inventory.is_empty());
        assert!(!p.has_world_data());
    }

    #[test]
    fn replace_inventory_touches_only_inventory() {
        let mut p = sample();
        let skills_before = p.sections.skills.clone();
        p.replace_inventory(vec![]);
        assert!(p.sections.inventory.is_empty());
        assert_eq!(p.sections.skills, skills_before);
    }

    #[test]
    fn inventory_section_codec() {
        let items = sample().sections.inventory;
        assert_eq!(decode_inventory(&encode_inventory(&items).unwrap()).unwrap(), items);
    }

    #[test]
    fn template_applies_kit_and_spawn() {
        let template = PlayerTemplate::from_toml_str(
            r#"
[skills]
Run = 10.0

[items]
Torch = 1
Club = 1

[spawn]
x = 10.0
y = 32.0
z = -4.0
"#,
        )
        .unwrap();

        let mut p = ProfileRecord::new("Gunnhild", 1);
        template.apply(&mut p, "Midgard");

        assert_eq!(p.sections.skills.get("Run"), Some(&10.0));
        assert_eq!(p.sections.inventory.len(), 2);
        let spawn = p.sections.world_data["Midgard"].spawn.unwrap();
        assert_eq!(spawn.y, 32.0);

        let sent = PlayerTemplate::decode(&template.encode().unwrap()).unwrap();
        assert_eq!(sent, template);
        assert!(PlayerTemplate::decode(b"[1, 2]").is_err());
    }
}
