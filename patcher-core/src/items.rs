use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::address::AddressTranslator;
use crate::layout::RomLayout;
use crate::patch::PatchSet;
use crate::players::{is_group_member, Groups, PlayerTable};
use crate::{PatcherError, Result};

pub const ITEM_ROW_LEN: usize = 8;
pub const ITEM_NAME_ROW_LEN: usize = 64;

const ITEM_NAME_WIDTH: usize = 26;
const ITEM_NAME_FRAME: &str = "___";

const PROGRESSION_WORD: u16 = 0;
const FILLER_WORD: u16 = 1;

/// One filled location of the multiworld.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ItemPlacement {
    pub location_id: u32,
    pub item_name: String,
    #[serde(default)]
    pub item_code: Option<u16>,
    pub owning_player: u32,
    pub receiving_player: u32,
    #[serde(default)]
    pub progression: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Destination {
    Local,
    Remote,
    Linked,
}

impl Destination {
    pub fn tag(self) -> u16 {
        match self {
            Destination::Local => 0,
            Destination::Remote => 1,
            Destination::Linked => 2,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Destination::Local),
            1 => Some(Destination::Remote),
            2 => Some(Destination::Linked),
            _ => None,
        }
    }

    pub fn classify(receiving_player: u32, player: u32, groups: &Groups) -> Self {
        if receiving_player == player {
            Destination::Local
        } else if is_group_member(groups, receiving_player, player) {
            Destination::Linked
        } else {
            Destination::Remote
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ItemRow {
    pub destination: Destination,
    pub item_code: u16,
    pub player_index: u16,
    pub progression: bool,
}

impl ItemRow {
    pub fn encode(&self) -> [u8; ITEM_ROW_LEN] {
        let progression = if self.progression { PROGRESSION_WORD } else { FILLER_WORD };
        let mut row = [0u8; ITEM_ROW_LEN];
        for (chunk, word) in row.chunks_exact_mut(2).zip([
            self.destination.tag(),
            self.item_code,
            self.player_index,
            progression,
        ]) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        row
    }
}

pub fn decode_row(bytes: &[u8]) -> Result<ItemRow> {
    if bytes.len() != ITEM_ROW_LEN {
        return Err(PatcherError::Config(format!(
            "Item row must be {} bytes, got {}",
            ITEM_ROW_LEN,
            bytes.len()
        )));
    }
    let word = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);

    let destination = Destination::from_tag(word(0))
        .ok_or_else(|| PatcherError::Config(format!("Unknown destination tag {}", word(0))))?;
    let progression = match word(3) {
        PROGRESSION_WORD => true,
        FILLER_WORD => false,
        other => return Err(PatcherError::Config(format!("Unknown progression word {}", other))),
    };

    Ok(ItemRow {
        destination,
        item_code: word(1),
        player_index: word(2),
        progression,
    })
}

/// Centers `text` in `width` columns, odd padding going to the right.
pub(crate) fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let pad = width - len;
    let left = pad / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
}

fn glyph(c: char) -> u16 {
    match c {
        'A'..='Z' => 0x2CC0 + (c as u16 - 'A' as u16),
        '0'..='9' => 0x2C00 + (c as u16 - '0' as u16),
        ' ' => 0x2C0F,
        '!' => 0x2CDF,
        '?' => 0x2CDE,
        '\'' | '-' => 0x2CDD,
        ',' | '.' => 0x2CDA,
        '_' => 0x000F,
        '%' => 0x2C0A,
        _ => 0x2CDE,
    }
}

/// Renders an item name into a 64-byte row of 16-bit glyph codes.
pub fn encode_item_name(name: &str) -> [u8; ITEM_NAME_ROW_LEN] {
    let upper: String = name.to_uppercase().chars().take(ITEM_NAME_WIDTH).collect();
    let text = format!(
        "{frame}{}{frame}",
        center(upper.trim(), ITEM_NAME_WIDTH),
        frame = ITEM_NAME_FRAME
    );

    let mut row = [0u8; ITEM_NAME_ROW_LEN];
    for (chunk, c) in row.chunks_exact_mut(2).zip(text.chars()) {
        chunk.copy_from_slice(&glyph(c).to_le_bytes());
    }
    row
}

/// What ended up at a location, kept for metadata and the spoiler log.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlacedItem {
    pub location_id: u32,
    pub item_name: String,
    pub receiving_player: u32,
    pub destination: Destination,
    pub item_code: u16,
    pub synthetic: bool,
    pub progression: bool,
}

#[derive(Clone, Debug, Default)]
pub struct EncodedItems {
    pub patches: PatchSet,
    pub placed: Vec<PlacedItem>,
    pub nothing_locations: Vec<u32>,
    pub synthetic_count: u16,
}

pub struct ItemTableEncoder<'a> {
    translator: &'a AddressTranslator,
    layout: &'a RomLayout,
    groups: &'a Groups,
    player: u32,
    next_synthetic: u16,
    seen: BTreeSet<u32>,
    nothing: Vec<u8>,
    out: EncodedItems,
}

impl<'a> ItemTableEncoder<'a> {
    pub fn new(translator: &'a AddressTranslator, layout: &'a RomLayout, groups: &'a Groups, player: u32) -> Self {
        Self {
            translator,
            layout,
            groups,
            player,
            next_synthetic: 0,
            seen: BTreeSet::new(),
            nothing: vec![0; layout.locations_nothing_len()],
            out: EncodedItems::default(),
        }
    }

    pub fn encode(&mut self, placement: &ItemPlacement, players: &PlayerTable) -> Result<ItemRow> {
        if placement.owning_player != self.player {
            return Err(PatcherError::Config(format!(
                "Location {} belongs to player {}, not {}",
                placement.location_id, placement.owning_player, self.player
            )));
        }
        let location = placement.location_id;
        if location >= self.layout.location_count {
            return Err(PatcherError::Config(format!(
                "Location id {} is outside the {}-entry item table",
                location, self.layout.location_count
            )));
        }
        if !self.seen.insert(location) {
            return Err(PatcherError::Config(format!("Location id {} placed twice", location)));
        }

        let (item_code, synthetic) = match placement.item_code {
            Some(code) if code < self.layout.native_item_count => (code, false),
            _ => (self.allocate_synthetic(&placement.item_name)?, true),
        };

        let row = ItemRow {
            destination: Destination::classify(placement.receiving_player, self.player, self.groups),
            item_code,
            player_index: players.index_of(placement.receiving_player).unwrap_or(0),
            progression: placement.progression,
        };
        self.out.patches.push_at(
            self.translator,
            self.layout.item_table + location * ITEM_ROW_LEN as u32,
            row.encode(),
        )?;

        if !synthetic && Some(item_code) == self.layout.nothing_item_code {
            self.nothing[(location / 8) as usize] |= 1 << (location % 8);
            self.out.nothing_locations.push(location);
        }

        self.out.placed.push(PlacedItem {
            location_id: location,
            item_name: placement.item_name.clone(),
            receiving_player: placement.receiving_player,
            destination: row.destination,
            item_code,
            synthetic,
            progression: placement.progression,
        });
        Ok(row)
    }

    fn allocate_synthetic(&mut self, name: &str) -> Result<u16> {
        if self.next_synthetic >= self.layout.max_synthetic_items {
            return Err(PatcherError::Config(format!(
                "More than {} foreign items for player {}",
                self.layout.max_synthetic_items, self.player
            )));
        }
        let code = self.layout.native_item_count + self.next_synthetic;
        self.next_synthetic += 1;

        self.out.patches.push_at(
            self.translator,
            self.layout.item_name_table + code as u32 * ITEM_NAME_ROW_LEN as u32,
            encode_item_name(name),
        )?;
        Ok(code)
    }

    /// Encodes every placement owned by this slot, in request order.
    pub fn encode_all(mut self, placements: &[ItemPlacement], players: &PlayerTable) -> Result<EncodedItems> {
        let player = self.player;
        for placement in placements.iter().filter(|p| p.owning_player == player) {
            self.encode(placement, players)?;
        }
        self.finish()
    }

    pub fn finish(mut self) -> Result<EncodedItems> {
        let nothing = std::mem::take(&mut self.nothing);
        self.out
            .patches
            .push_at(self.translator, self.layout.locations_nothing_table, nothing)?;
        self.out.synthetic_count = self.next_synthetic;

        debug!(
            "Player {}: {} locations, {} foreign items, {} empty",
            self.player,
            self.out.placed.len(),
            self.out.synthetic_count,
            self.out.nothing_locations.len()
        );
        Ok(self.out)
    }
}
