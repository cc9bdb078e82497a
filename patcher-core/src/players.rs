use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::address::AddressTranslator;
use crate::items::{center, ItemPlacement};
use crate::layout::RomLayout;
use crate::patch::PatchSet;
use crate::{PatcherError, Result};

pub const PLAYER_NAME_ROW_LEN: usize = 16;
pub const PLAYER_ID_ROW_LEN: usize = 2;

/// Id of the coordinating service, always present in the table.
pub const SERVICE_PLAYER_ID: u32 = 0;

/// Item-link group id -> member player ids.
pub type Groups = BTreeMap<u32, BTreeSet<u32>>;

pub fn is_group_member(groups: &Groups, group: u32, player: u32) -> bool {
    groups.get(&group).map_or(false, |members| members.contains(&player))
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub global_id: u32,
    pub display_name: String,
    pub rom_id: u16,
    pub rom_local_index: u16,
}

/// Every player id a slot's image has to know about: the service, the slot
/// itself, senders of items it receives, and receivers of items it holds.
pub fn referenced_players(player: u32, placements: &[ItemPlacement], groups: &Groups) -> BTreeSet<u32> {
    let mut ids = BTreeSet::new();
    ids.insert(SERVICE_PLAYER_ID);
    ids.insert(player);

    for p in placements {
        if p.receiving_player == player || is_group_member(groups, p.receiving_player, player) {
            ids.insert(p.owning_player);
        }
        if p.owning_player == player {
            ids.insert(p.receiving_player);
        }
    }
    ids
}

#[derive(Clone, Debug)]
pub struct PlayerTable {
    records: Vec<PlayerRecord>,
    evicted: Vec<u32>,
    aliased: Vec<u32>,
}

impl PlayerTable {
    pub fn build(
        player: u32,
        placements: &[ItemPlacement],
        groups: &Groups,
        names: &BTreeMap<u32, String>,
        layout: &RomLayout,
    ) -> Result<Self> {
        if player > layout.max_player_id {
            return Err(PatcherError::Config(format!(
                "Player id {} exceeds the maximum of {}",
                player, layout.max_player_id
            )));
        }

        let mut ids: Vec<u32> = referenced_players(player, placements, groups).into_iter().collect();
        let mut evicted = Vec::new();
        if ids.len() > layout.player_capacity {
            evicted = ids.split_off(layout.player_capacity);
            warn!(
                "Player {} references {} players, dropping {} above capacity {}",
                player,
                ids.len() + evicted.len(),
                evicted.len(),
                layout.player_capacity
            );
            if evicted.contains(&player) {
                return Err(PatcherError::Config(format!(
                    "Player {} would be evicted from its own player table",
                    player
                )));
            }
        }

        let mut aliased = Vec::new();
        let mut records = Vec::with_capacity(ids.len());
        for (idx, id) in ids.into_iter().enumerate() {
            let rom_local_index = u16::try_from(idx).map_err(|_| {
                PatcherError::Config(format!("Player table index {} does not fit 16 bits", idx))
            })?;
            let rom_id = match u16::try_from(id) {
                Ok(rom_id) if id <= layout.max_player_id => rom_id,
                _ => {
                    warn!("Player id {} is not representable, written as 0", id);
                    aliased.push(id);
                    0
                }
            };
            let display_name = if id == SERVICE_PLAYER_ID {
                layout.service_name.clone()
            } else {
                names.get(&id).cloned().unwrap_or_else(|| format!("Player{}", id))
            };
            records.push(PlayerRecord {
                global_id: id,
                display_name,
                rom_id,
                rom_local_index,
            });
        }

        debug!("Player table for {}: {} entries", player, records.len());
        Ok(Self {
            records,
            evicted,
            aliased,
        })
    }

    pub fn records(&self) -> &[PlayerRecord] {
        &self.records
    }

    pub fn evicted(&self) -> &[u32] {
        &self.evicted
    }

    pub fn aliased(&self) -> &[u32] {
        &self.aliased
    }

    pub fn index_of(&self, global_id: u32) -> Option<u16> {
        self.records
            .binary_search_by_key(&global_id, |r| r.global_id)
            .ok()
            .map(|i| self.records[i].rom_local_index)
    }

    pub fn encode(&self, translator: &AddressTranslator, layout: &RomLayout) -> Result<PatchSet> {
        let mut patches = PatchSet::new();
        for record in &self.records {
            let idx = record.rom_local_index as u32;
            patches.push_at(
                translator,
                layout.player_name_table + idx * PLAYER_NAME_ROW_LEN as u32,
                encode_player_name(&record.display_name),
            )?;
            patches.push_word_at(
                translator,
                layout.player_id_table + idx * PLAYER_ID_ROW_LEN as u32,
                record.rom_id,
            )?;
        }
        Ok(patches)
    }
}

pub fn encode_player_name(name: &str) -> [u8; PLAYER_NAME_ROW_LEN] {
    let upper: String = name
        .chars()
        .take(PLAYER_NAME_ROW_LEN)
        .map(|c| if c.is_ascii() { c.to_ascii_uppercase() } else { '?' })
        .collect();

    let mut row = [0u8; PLAYER_NAME_ROW_LEN];
    row.copy_from_slice(center(&upper, PLAYER_NAME_ROW_LEN).as_bytes());
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(location_id: u32, owning_player: u32, receiving_player: u32) -> ItemPlacement {
        ItemPlacement {
            location_id,
            item_name: "Thing".to_string(),
            item_code: None,
            owning_player,
            receiving_player,
            progression: false,
        }
    }

    #[test]
    fn name_row_is_upper_and_centered() {
        assert_eq!(&encode_player_name("link"), b"      LINK      ");
        assert_eq!(&encode_player_name("abc"), b"      ABC       ");
        assert_eq!(&encode_player_name("a much longer player name"), b"A MUCH LONGER PL");
        assert_eq!(&encode_player_name("Zoë"), b"      ZO?       ");
    }

    #[test]
    fn gathers_senders_and_receivers() {
        let mut groups = Groups::new();
        groups.insert(50, [1, 4].into_iter().collect());

        let placements = vec![
            placement(0, 1, 1),
            placement(1, 1, 3),
            placement(2, 2, 1),
            placement(3, 4, 50),
            placement(4, 5, 6),
        ];
        let ids = referenced_players(1, &placements, &groups);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn dense_indices_and_names() {
        let placements = vec![placement(0, 1, 7), placement(1, 3, 1)];
        let mut names = BTreeMap::new();
        names.insert(1, "Alice".to_string());
        names.insert(3, "Bob".to_string());

        let table =
            PlayerTable::build(1, &placements, &Groups::new(), &names, &RomLayout::default()).unwrap();
        let ids: Vec<(u32, u16)> = table
            .records()
            .iter()
            .map(|r| (r.global_id, r.rom_local_index))
            .collect();
        assert_eq!(ids, vec![(0, 0), (1, 1), (3, 2), (7, 3)]);
        assert_eq!(table.records()[0].display_name, "Archipelago");
        assert_eq!(table.records()[3].display_name, "Player7");
        assert_eq!(table.index_of(3), Some(2));
        assert_eq!(table.index_of(9), None);
    }

    #[test]
    fn overflow_drops_highest_ids() {
        let layout = RomLayout {
            player_capacity: 4,
            ..RomLayout::default()
        };
        let placements: Vec<ItemPlacement> = (2..8).map(|p| placement(p, p, 1)).collect();

        let table = PlayerTable::build(1, &placements, &Groups::new(), &BTreeMap::new(), &layout).unwrap();
        assert_eq!(table.records().len(), 4);
        assert_eq!(table.evicted(), &[4, 5, 6, 7]);
    }

    #[test]
    fn own_eviction_is_fatal() {
        let layout = RomLayout {
            player_capacity: 3,
            ..RomLayout::default()
        };
        let placements: Vec<ItemPlacement> = (1..5).map(|p| placement(p, p, 9)).collect();

        let err = PlayerTable::build(9, &placements, &Groups::new(), &BTreeMap::new(), &layout).unwrap_err();
        assert!(matches!(err, PatcherError::Config(_)));
    }

    #[test]
    fn unrepresentable_ids_alias_to_zero() {
        let layout = RomLayout {
            max_player_id: 100,
            ..RomLayout::default()
        };
        let placements = vec![placement(0, 1, 500)];

        let table = PlayerTable::build(1, &placements, &Groups::new(), &BTreeMap::new(), &layout).unwrap();
        assert_eq!(table.aliased(), &[500]);
        assert_eq!(table.records().last().unwrap().rom_id, 0);

        assert!(PlayerTable::build(101, &[], &Groups::new(), &BTreeMap::new(), &layout).is_err());
    }

    #[test]
    fn rows_land_at_index_offsets() {
        let layout = RomLayout::default();
        let t = layout.translator();
        let placements = vec![placement(0, 1, 2)];
        let table = PlayerTable::build(1, &placements, &Groups::new(), &BTreeMap::new(), &layout).unwrap();
        let overlay = table.encode(&t, &layout).unwrap().overlay();

        let name_base = t.translate(layout.player_name_table).unwrap();
        let id_base = t.translate(layout.player_id_table).unwrap();
        assert_eq!(overlay[&(name_base + 2 * 16 + 4)], b'P');
        assert_eq!(overlay[&(id_base + 4)], 2);
        assert_eq!(overlay[&(id_base + 5)], 0);
    }
}
