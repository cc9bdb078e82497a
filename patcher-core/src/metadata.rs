use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::header::{RomName, SlotFlags};
use crate::items::PlacedItem;
use crate::players::PlayerRecord;
use crate::rewards::{MedallionRequirement, RewardAssignment};
use crate::Result;

pub fn connect_name(rom_name: &RomName) -> String {
    base64::encode(rom_name)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub player: u32,
    pub player_name: String,
    pub rom_name: String,
    pub connect_name: String,
    pub seed: u64,
    pub seed_name: String,
    pub flags: SlotFlags,
    pub locations: Vec<PlacedItem>,
    pub players: Vec<PlayerRecord>,
    pub evicted_players: Vec<u32>,
    pub aliased_players: Vec<u32>,
    pub locations_nothing: Vec<u32>,
    pub rewards: Vec<RewardAssignment>,
    pub medallions: Vec<MedallionRequirement>,
}

impl SlotMetadata {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Human-readable section for the batch spoiler log.
    pub fn spoiler(&self) -> String {
        let mut out = format!(
            "== Player {} ({}) ==\nRom name: {}\n",
            self.player, self.player_name, self.rom_name
        );

        out.push_str("Rewards:\n");
        for r in &self.rewards {
            out.push_str(&format!("  {:?}: {:?} {}\n", r.dungeon, r.kind, r.value));
        }
        for m in &self.medallions {
            out.push_str(&format!("  {:?} requires {:?}\n", m.dungeon, m.medallion));
        }

        out.push_str("Locations:\n");
        for item in &self.locations {
            out.push_str(&format!(
                "  {:>4}: {} -> player {} ({:?}{})\n",
                item.location_id,
                item.item_name,
                item.receiving_player,
                item.destination,
                if item.progression { ", progression" } else { "" }
            ));
        }
        out
    }
}

/// Batch-level data handed to the coordinating service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiworldData {
    pub seed_name: String,
    pub slot_names: BTreeMap<u32, String>,
    pub connect_names: BTreeMap<String, u32>,
}

impl MultiworldData {
    pub fn new(seed_name: &str, player_names: &BTreeMap<u32, String>) -> Self {
        let connect_names = player_names
            .iter()
            .map(|(&id, name)| (name.clone(), id))
            .collect();
        Self {
            seed_name: seed_name.to_string(),
            slot_names: player_names.clone(),
            connect_names,
        }
    }

    pub fn register_rom_name(&mut self, player: u32, rom_name: &RomName) {
        self.connect_names.insert(connect_name(rom_name), player);
    }

    pub fn to_compressed(&self) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serde_json::to_vec(self)?)?;
        Ok(encoder.finish()?)
    }

    pub fn from_compressed(data: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_compressed()?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_compressed(&fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::rom_title;

    #[test]
    fn connect_name_is_base64_of_full_field() {
        let name = rom_title("MW", 1, 5);
        let encoded = connect_name(&name);
        assert_eq!(encoded.len(), 28);
        assert_eq!(base64::decode(&encoded).unwrap(), name.to_vec());
    }

    #[test]
    fn multidata_registers_and_compresses() {
        let mut names = BTreeMap::new();
        names.insert(1, "Alice".to_string());
        names.insert(2, "Bob".to_string());

        let mut data = MultiworldData::new("S1", &names);
        let rom_name = rom_title("MW", 2, 9);
        data.register_rom_name(2, &rom_name);

        assert_eq!(data.connect_names["Alice"], 1);
        assert_eq!(data.connect_names[&connect_name(&rom_name)], 2);

        let packed = data.to_compressed().unwrap();
        assert_eq!(MultiworldData::from_compressed(&packed).unwrap(), data);
    }
}
