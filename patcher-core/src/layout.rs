use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::address::{AddressTranslator, MemoryMap, DEFAULT_MAX_OFFSET};
use crate::checksum::CHECKSUM_FIELD_LEN;
use crate::header::TITLE_LEN;
use crate::items::{ITEM_NAME_ROW_LEN, ITEM_ROW_LEN};
use crate::players::{PLAYER_ID_ROW_LEN, PLAYER_NAME_ROW_LEN};
use crate::{PatcherError, Result};

/// Where everything lives inside the target image. The defaults describe the
/// ExHiRom combo image; a different base can be described by loading a JSON
/// file with the same fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomLayout {
    pub memory_map: MemoryMap,
    pub max_offset: usize,

    /// Physical offset of the 4-byte checksum field.
    pub checksum_offset: usize,
    /// Logical addresses of every copy of the 21-byte title.
    pub title_addresses: Vec<u32>,
    pub title_prefix: String,

    pub item_table: u32,
    pub item_name_table: u32,
    pub locations_nothing_table: u32,
    pub player_name_table: u32,
    pub player_id_table: u32,
    pub seed_data: u32,

    pub config_multiworld: u32,
    pub config_remote_items: u32,
    pub config_death_link: u32,
    pub config_keysanity: u32,
    pub config_player_id: u32,

    pub location_count: u32,
    pub player_capacity: usize,
    pub max_player_id: u32,
    pub native_item_count: u16,
    pub nothing_item_code: Option<u16>,
    pub max_synthetic_items: u16,
    pub service_name: String,
}

impl Default for RomLayout {
    fn default() -> Self {
        Self {
            memory_map: MemoryMap::ExHiRom,
            max_offset: DEFAULT_MAX_OFFSET,
            checksum_offset: 0x40_FFDC,
            title_addresses: vec![0x00_FFC0, 0x80_FFC0],
            title_prefix: "MWP01".to_string(),
            item_table: 0xF8_6000,
            item_name_table: 0xF9_0000,
            locations_nothing_table: 0xF8_7000,
            player_name_table: 0xF8_5000,
            player_id_table: 0xF8_5D00,
            seed_data: 0x80_FF50,
            config_multiworld: 0xF4_7000,
            config_remote_items: 0xF4_7002,
            config_death_link: 0xF4_7004,
            config_keysanity: 0xF4_7006,
            config_player_id: 0xF4_7008,
            location_count: 512,
            player_capacity: 202,
            max_player_id: 65535,
            native_item_count: 23,
            nothing_item_code: Some(22),
            max_synthetic_items: 512,
            service_name: "Archipelago".to_string(),
        }
    }
}

impl RomLayout {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let layout: RomLayout = serde_json::from_str(&raw)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn translator(&self) -> AddressTranslator {
        AddressTranslator::new(self.memory_map, self.max_offset)
    }

    pub fn locations_nothing_len(&self) -> usize {
        (self.location_count as usize + 7) / 8
    }

    /// Checks that every table, at full capacity, still translates to an
    /// offset inside the image.
    pub fn validate(&self) -> Result<()> {
        let t = self.translator();

        if self.checksum_offset + CHECKSUM_FIELD_LEN > self.max_offset {
            return Err(PatcherError::Config(format!(
                "checksum offset 0x{:X} lies outside the image",
                self.checksum_offset
            )));
        }
        if self.location_count == 0 || self.player_capacity == 0 {
            return Err(PatcherError::Config(
                "location_count and player_capacity must be non-zero".to_string(),
            ));
        }
        if self.max_player_id > u16::MAX as u32 {
            return Err(PatcherError::Config(format!(
                "max_player_id {} does not fit the 16-bit id field",
                self.max_player_id
            )));
        }
        if let Some(code) = self.nothing_item_code {
            if code >= self.native_item_count {
                return Err(PatcherError::Config(format!(
                    "nothing item code {} is not a native item code",
                    code
                )));
            }
        }

        for &addr in &self.title_addresses {
            check_span(&t, addr, TITLE_LEN, "title")?;
        }
        check_span(
            &t,
            self.item_table,
            self.location_count as usize * ITEM_ROW_LEN,
            "item table",
        )?;
        check_span(
            &t,
            self.item_name_table,
            (self.native_item_count as usize + self.max_synthetic_items as usize) * ITEM_NAME_ROW_LEN,
            "item name table",
        )?;
        check_span(
            &t,
            self.locations_nothing_table,
            self.locations_nothing_len(),
            "locations-nothing table",
        )?;
        check_span(
            &t,
            self.player_name_table,
            self.player_capacity * PLAYER_NAME_ROW_LEN,
            "player name table",
        )?;
        check_span(
            &t,
            self.player_id_table,
            self.player_capacity * PLAYER_ID_ROW_LEN,
            "player id table",
        )?;

        for (addr, what) in [
            (self.seed_data, "seed data"),
            (self.config_multiworld, "multiworld flag"),
            (self.config_remote_items, "remote items flag"),
            (self.config_death_link, "death link flag"),
            (self.config_keysanity, "keysanity flag"),
            (self.config_player_id, "player id"),
        ] {
            check_span(&t, addr, 2, what)?;
        }

        Ok(())
    }
}

fn check_span(t: &AddressTranslator, addr: u32, len: usize, what: &str) -> Result<()> {
    let start = t.translate(addr)?;
    let last = addr
        .checked_add(len.saturating_sub(1) as u32)
        .ok_or_else(|| PatcherError::Config(format!("{} at ${:06X} overflows the bus", what, addr)))?;
    let end = t.translate(last)?;
    // A table must not straddle a bank boundary that the map folds away.
    if end != start + len.saturating_sub(1) {
        return Err(PatcherError::Config(format!(
            "{} at ${:06X} ({} bytes) is not contiguous in the image",
            what, addr, len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_consistent() {
        RomLayout::default().validate().unwrap();
    }

    #[test]
    fn default_tables_land_where_expected() {
        let layout = RomLayout::default();
        let t = layout.translator();
        assert_eq!(t.translate(layout.item_table).unwrap(), 0x38_6000);
        assert_eq!(t.translate(layout.player_name_table).unwrap(), 0x38_5000);
        assert_eq!(t.translate(layout.title_addresses[0]).unwrap(), 0x40_FFC0);
        assert_eq!(t.translate(layout.title_addresses[1]).unwrap(), 0x00_FFC0);
    }

    #[test]
    fn oversized_table_is_rejected() {
        let layout = RomLayout {
            location_count: 0x10_0000,
            ..RomLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let layout: RomLayout =
            serde_json::from_str(r#"{ "player_capacity": 16, "memory_map": "ExHiRom" }"#).unwrap();
        assert_eq!(layout.player_capacity, 16);
        assert_eq!(layout.item_table, RomLayout::default().item_table);
    }
}
