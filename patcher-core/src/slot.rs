use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::apply::{self, DeltaPatch, PatchManifest, RomImage};
use crate::handoff::RomNameSender;
use crate::header::{config_patches, rom_name_text, rom_title, title_patches, RomName, SlotFlags};
use crate::items::{ItemPlacement, ItemTableEncoder};
use crate::layout::RomLayout;
use crate::metadata::{connect_name, SlotMetadata};
use crate::patch::PatchSet;
use crate::players::{Groups, PlayerTable};
use crate::rewards::{
    standard_regions, write_dungeon_music, write_medallions, MedallionRequirement, MedallionTables,
    RewardAssigner, RewardPools, RewardRegion, RewardTables,
};
use crate::{PatcherError, PatcherSettings, Result};

const REWARD_RNG_SALT: u64 = 0xC0FF_EE00_u64;

/// Lookup tables shipped with the request. Defaults are the standard tables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticTables {
    pub rewards: RewardTables,
    pub pools: RewardPools,
    pub medallions: MedallionTables,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotRequest {
    pub player: u32,
    #[serde(default = "standard_regions")]
    pub reward_regions: Vec<RewardRegion>,
    #[serde(default)]
    pub medallions: Vec<MedallionRequirement>,
    #[serde(default)]
    pub flags: SlotFlags,
}

/// Everything the logic side decided, for every slot of this game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub seed: u64,
    pub seed_name: String,
    #[serde(default)]
    pub race: bool,
    pub player_names: BTreeMap<u32, String>,
    #[serde(default)]
    pub groups: Groups,
    pub placements: Vec<ItemPlacement>,
    pub slots: Vec<SlotRequest>,
    #[serde(default)]
    pub tables: StaticTables,
}

impl GenerationRequest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let request: GenerationRequest = serde_json::from_str(&raw)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seed_name.is_empty()
            || !self
                .seed_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PatcherError::Config(format!(
                "Seed name {:?} must be non-empty ASCII letters, digits, '-' or '_'",
                self.seed_name
            )));
        }
        if self.slots.is_empty() {
            return Err(PatcherError::Config("Request has no slots".to_string()));
        }

        let mut seen = BTreeSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.player) {
                return Err(PatcherError::Config(format!(
                    "Player {} has more than one slot",
                    slot.player
                )));
            }
        }
        Ok(())
    }

    pub fn player_name(&self, player: u32) -> String {
        self.player_names
            .get(&player)
            .cloned()
            .unwrap_or_else(|| format!("Player{}", player))
    }
}

/// A generated slot, not yet written anywhere.
#[derive(Debug)]
pub struct SlotOutput {
    pub player: u32,
    pub player_name: String,
    pub rom_name: RomName,
    pub image: RomImage,
    pub delta: DeltaPatch,
    pub metadata: SlotMetadata,
}

pub fn generate_slot(
    base: &[u8],
    request: &GenerationRequest,
    slot: &SlotRequest,
    layout: &RomLayout,
) -> Result<SlotOutput> {
    let t = layout.translator();
    let tables = &request.tables;
    let mut rng = StdRng::seed_from_u64(request.seed ^ REWARD_RNG_SALT ^ u64::from(slot.player));
    let mut patches = PatchSet::new();

    let (reward_patches, rewards) =
        RewardAssigner::new(&t, &tables.rewards, &tables.pools).assign(&slot.reward_regions, &mut rng)?;
    patches.merge(reward_patches);
    patches.merge(write_medallions(&t, &tables.medallions, &slot.medallions)?);
    patches.merge(write_dungeon_music(&t, &slot.reward_regions, slot.flags.keysanity)?);

    let players = PlayerTable::build(
        slot.player,
        &request.placements,
        &request.groups,
        &request.player_names,
        layout,
    )?;
    let items = ItemTableEncoder::new(&t, layout, &request.groups, slot.player)
        .encode_all(&request.placements, &players)?;
    patches.merge(items.patches);
    patches.merge(players.encode(&t, layout)?);

    let rom_name = rom_title(&layout.title_prefix, slot.player, request.seed);
    patches.merge(title_patches(&t, layout, &rom_name)?);
    patches.merge(config_patches(
        &t,
        layout,
        slot.player,
        &slot.flags,
        request.race,
        request.seed,
        &request.seed_name,
    )?);

    let image = apply::apply(base, &patches, layout.checksum_offset)?;
    let delta = DeltaPatch::diff(base, image.as_bytes());
    info!(
        "Player {}: {} edits ({} bytes), {} bytes differ from base",
        slot.player,
        patches.len(),
        patches.byte_count(),
        delta.changed_bytes()
    );

    let player_name = request.player_name(slot.player);
    let metadata = SlotMetadata {
        player: slot.player,
        player_name: player_name.clone(),
        rom_name: rom_name_text(&rom_name),
        connect_name: connect_name(&rom_name),
        seed: request.seed,
        seed_name: request.seed_name.clone(),
        flags: slot.flags,
        locations: items.placed,
        players: players.records().to_vec(),
        evicted_players: players.evicted().to_vec(),
        aliased_players: players.aliased().to_vec(),
        locations_nothing: items.nothing_locations,
        rewards,
        medallions: slot.medallions.clone(),
    };

    Ok(SlotOutput {
        player: slot.player,
        player_name,
        rom_name,
        image,
        delta,
        metadata,
    })
}

pub fn output_stem(seed_name: &str, player: u32, player_name: &str) -> String {
    let name: String = player_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("MW_{}_P{}_{}", seed_name, player, name)
}

#[derive(Clone, Debug)]
pub struct SlotFiles {
    pub image: Option<PathBuf>,
    pub patch: PathBuf,
    pub metadata: PathBuf,
}

/// Writes the image, patch container and metadata. When the image is not
/// kept it is removed once the patch is on disk.
pub fn write_slot_outputs(output: &SlotOutput, base: &[u8], out_dir: &Path, keep_image: bool) -> Result<SlotFiles> {
    let stem = output_stem(&output.metadata.seed_name, output.player, &output.player_name);
    let image_path = out_dir.join(format!("{}.sfc", stem));
    let patch_path = out_dir.join(format!("{}.mwpatch", stem));
    let metadata_path = out_dir.join(format!("{}.json", stem));

    let manifest = PatchManifest::new(
        output.player,
        &output.player_name,
        &output.metadata.rom_name,
        base,
        &output.delta,
    );
    let written = output
        .image
        .save(&image_path)
        .and_then(|_| apply::write_container_file(&patch_path, &manifest, &output.delta))
        .and_then(|_| output.metadata.write_json(&metadata_path));
    if let Err(e) = written {
        if !keep_image {
            if let Err(cleanup) = remove_image(&image_path) {
                warn!("{}", cleanup);
            }
        }
        return Err(e);
    }

    let image = if keep_image {
        Some(image_path)
    } else {
        remove_image(&image_path)?;
        None
    };

    Ok(SlotFiles {
        image,
        patch: patch_path,
        metadata: metadata_path,
    })
}

fn remove_image(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|source| PatcherError::Cleanup {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Debug)]
pub struct SlotReport {
    pub player: u32,
    pub player_name: String,
    pub rom_name: RomName,
    pub connect_name: String,
    pub changed_bytes: usize,
    pub files: SlotFiles,
    pub spoiler: String,
}

/// Runs one slot end to end and always resolves the handoff, whatever the
/// outcome.
pub fn process_slot(
    base: &[u8],
    request: &GenerationRequest,
    slot: &SlotRequest,
    settings: &PatcherSettings,
    out_dir: &Path,
    sender: RomNameSender,
) -> Result<SlotReport> {
    info!("Generating player {}", slot.player);

    let result = generate_slot(base, request, slot, &settings.layout).and_then(|output| {
        let files = write_slot_outputs(&output, base, out_dir, settings.keep_patched_image)?;
        Ok(SlotReport {
            player: output.player,
            player_name: output.player_name.clone(),
            rom_name: output.rom_name,
            connect_name: output.metadata.connect_name.clone(),
            changed_bytes: output.delta.changed_bytes(),
            files,
            spoiler: output.metadata.spoiler(),
        })
    });

    match &result {
        Ok(report) => {
            info!("Player {} done: {}", report.player, report.files.patch.display());
            sender.publish(report.rom_name);
        }
        Err(e) => sender.fail(e.to_string()),
    }
    result
}
