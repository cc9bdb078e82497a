use serde::{Deserialize, Serialize};

use crate::address::AddressTranslator;
use crate::layout::RomLayout;
use crate::patch::PatchSet;
use crate::{PatcherError, Result};

pub const TITLE_LEN: usize = 21;
const SEED_NAME_LEN: usize = 32;

/// Format version stamped into the seed-data config word.
const FORMAT_VERSION: (u16, u16) = (0, 1);

/// The 21-byte rom name, ASCII and zero padded.
pub type RomName = [u8; TITLE_LEN];

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlotFlags {
    #[serde(default)]
    pub keysanity: bool,
    #[serde(default)]
    pub remote_items: bool,
    #[serde(default)]
    pub death_link: bool,
}

fn ascii_bytes(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' })
}

pub fn rom_title(prefix: &str, player: u32, seed: u64) -> RomName {
    let text = format!("{}{}{:>8}", prefix, player, seed);
    let mut name = [0u8; TITLE_LEN];
    for (dst, b) in name.iter_mut().zip(ascii_bytes(&text)) {
        *dst = b;
    }
    name
}

/// Printable part of a rom name, up to the first zero byte.
pub fn rom_name_text(name: &RomName) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(TITLE_LEN);
    String::from_utf8_lossy(&name[..end]).into_owned()
}

pub fn title_patches(translator: &AddressTranslator, layout: &RomLayout, name: &RomName) -> Result<PatchSet> {
    let mut patches = PatchSet::new();
    for &addr in &layout.title_addresses {
        patches.push_at(translator, addr, name.to_vec())?;
    }
    Ok(patches)
}

fn config_word(flags: &SlotFlags, race: bool) -> u16 {
    let (major, minor) = FORMAT_VERSION;
    (u16::from(race) << 15)
        | (u16::from(flags.keysanity) << 13)
        | (1 << 12)
        | ((major & 0xF) << 4)
        | (minor & 0xF)
}

/// Seed data block, multiworld and per-slot config flags.
pub fn config_patches(
    translator: &AddressTranslator,
    layout: &RomLayout,
    player: u32,
    flags: &SlotFlags,
    race: bool,
    seed: u64,
    seed_name: &str,
) -> Result<PatchSet> {
    let player_id = u16::try_from(player)
        .map_err(|_| PatcherError::Config(format!("Player id {} does not fit 16 bits", player)))?;

    let mut seed_data = Vec::with_capacity(16 + SEED_NAME_LEN);
    seed_data.extend_from_slice(&player_id.to_le_bytes());
    seed_data.extend_from_slice(&config_word(flags, race).to_le_bytes());
    seed_data.extend_from_slice(&(seed as u32).to_le_bytes());
    seed_data.extend_from_slice(&[0u8; 8]);
    let mut name = [0u8; SEED_NAME_LEN];
    for (dst, b) in name.iter_mut().zip(ascii_bytes(seed_name)) {
        *dst = b;
    }
    seed_data.extend_from_slice(&name);

    let mut patches = PatchSet::new();
    patches.push_at(translator, layout.seed_data, seed_data)?;
    patches.push_word_at(translator, layout.config_multiworld, 1)?;
    if flags.keysanity {
        patches.push_word_at(translator, layout.config_keysanity, 1)?;
    }
    patches.push_word_at(
        translator,
        layout.config_remote_items,
        0b001 | if flags.remote_items { 0b010 } else { 0 },
    )?;
    patches.push_at(translator, layout.config_death_link, vec![u8::from(flags.death_link)])?;
    patches.push_word_at(translator, layout.config_player_id, player_id)?;
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_zero_padded() {
        let name = rom_title("MWP01", 3, 42);
        assert_eq!(&name[..14], b"MWP013      42");
        assert!(name[14..].iter().all(|&b| b == 0));
        assert_eq!(rom_name_text(&name), "MWP013      42");
    }

    #[test]
    fn title_truncates_at_21() {
        let name = rom_title("MWP01", 12345, 987654321012);
        assert_eq!(&name, b"MWP011234598765432101");
    }

    #[test]
    fn title_written_to_every_copy() {
        let layout = RomLayout::default();
        let t = layout.translator();
        let name = rom_title(&layout.title_prefix, 1, 7);
        let overlay = title_patches(&t, &layout, &name).unwrap().overlay();
        assert_eq!(overlay[&0x40_FFC0], b'M');
        assert_eq!(overlay[&0x00_FFC0], b'M');
        assert_eq!(overlay.len(), TITLE_LEN * 2);
    }

    #[test]
    fn config_flags() {
        let layout = RomLayout::default();
        let t = layout.translator();
        let flags = SlotFlags {
            keysanity: true,
            remote_items: true,
            death_link: false,
        };
        let overlay = config_patches(&t, &layout, 2, &flags, false, 0x1_2345_6789, "abc")
            .unwrap()
            .overlay();

        let seed = t.translate(layout.seed_data).unwrap();
        assert_eq!(overlay[&seed], 2);
        let word = u16::from_le_bytes([overlay[&(seed + 2)], overlay[&(seed + 3)]]);
        assert_eq!(word, (1 << 13) | (1 << 12) | 1);
        assert_eq!(overlay[&(seed + 4)], 0x89);
        assert_eq!(overlay[&(seed + 7)], 0x23);
        assert_eq!(overlay[&(seed + 16)], b'a');
        assert_eq!(overlay[&(seed + 19)], 0);

        assert_eq!(overlay[&t.translate(layout.config_keysanity).unwrap()], 1);
        assert_eq!(overlay[&t.translate(layout.config_remote_items).unwrap()], 0b011);
        assert_eq!(overlay[&t.translate(layout.config_death_link).unwrap()], 0);
    }

    #[test]
    fn oversized_player_id() {
        let layout = RomLayout::default();
        let t = layout.translator();
        assert!(config_patches(&t, &layout, 70_000, &SlotFlags::default(), false, 0, "").is_err());
    }
}
