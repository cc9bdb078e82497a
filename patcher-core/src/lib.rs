use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use walkdir::WalkDir;

pub mod address;
pub mod apply;
pub mod checksum;
pub mod handoff;
pub mod header;
pub mod items;
pub mod layout;
pub mod metadata;
pub mod patch;
pub mod players;
pub mod rewards;
pub mod slot;

pub use address::{AddressTranslator, MemoryMap};
pub use apply::{DeltaPatch, RomImage};
pub use layout::RomLayout;
pub use patch::{ByteEdit, PatchSet};
pub use slot::{GenerationRequest, SlotReport, SlotRequest};

use metadata::MultiworldData;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatcherSettings {
    pub base_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default = "default_keep_image")]
    pub keep_patched_image: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub expected_base_len: Option<usize>,
    #[serde(default)]
    pub expected_base_crc32: Option<u32>,
    #[serde(default)]
    pub layout: RomLayout,
}

fn default_keep_image() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum PatcherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("address ${addr:06X} maps to offset 0x{offset:X}, past the image limit 0x{max:X}")]
    AddressOutOfRange { addr: u32, offset: usize, max: usize },
    #[error("invalid reward assignment: {0}")]
    InvalidRewardAssignment(String),
    #[error("edit of {len} bytes at 0x{offset:X} does not fit a {image_len}-byte image")]
    EditOutOfBounds {
        offset: usize,
        len: usize,
        image_len: usize,
    },
    #[error("patch does not match base image: {0}")]
    PatchMismatch(String),
    #[error("failed to remove {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("patch container error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("worker for player {0} panicked")]
    WorkerPanicked(u32),
}

pub type Result<T> = std::result::Result<T, PatcherError>;

/// Per-slot outcome of a batch.
#[derive(Debug)]
pub struct SlotOutcome {
    pub player: u32,
    pub result: Result<SlotReport>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub output_dir: PathBuf,
    pub multidata_path: PathBuf,
    pub spoiler_path: Option<PathBuf>,
    pub outcomes: Vec<SlotOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &SlotOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Resolves the base image path. A directory is searched recursively for the
/// first `.sfc`/`.smc` file in name order.
pub fn locate_base_image(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        return Err(PatcherError::Config(format!(
            "Base image path does not exist: {}",
            path.display()
        )));
    }

    WalkDir::new(path)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("sfc") || ext.eq_ignore_ascii_case("smc"))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .ok_or_else(|| {
            PatcherError::Config(format!("No .sfc/.smc image found under {}", path.display()))
        })
}

fn load_base_image(settings: &PatcherSettings) -> Result<Vec<u8>> {
    let path = locate_base_image(&settings.base_path)?;
    let data = fs::read(&path)?;

    if let Some(len) = settings.expected_base_len {
        if data.len() != len {
            return Err(PatcherError::Config(format!(
                "Base image {} is {} bytes, expected {}",
                path.display(),
                data.len(),
                len
            )));
        }
    }
    if let Some(crc) = settings.expected_base_crc32 {
        let actual = apply::crc32(&data);
        if actual != crc {
            return Err(PatcherError::Config(format!(
                "Base image {} has CRC-32 {:08X}, expected {:08X}",
                path.display(),
                actual,
                crc
            )));
        }
    }

    info!("Base image {} ({} bytes)", path.display(), data.len());
    Ok(data)
}

/// Generates every slot of the request on its own worker thread, then
/// finalizes the multiworld data once each slot has published (or failed to
/// publish) its rom name.
pub fn run(settings: PatcherSettings, request: GenerationRequest) -> Result<BatchReport> {
    settings.layout.validate()?;
    request.validate()?;

    let base: Arc<[u8]> = Arc::from(load_base_image(&settings)?);
    let output_dir = settings.output_path.join(&request.seed_name);
    fs::create_dir_all(&output_dir)?;

    let settings = Arc::new(settings);
    let request = Arc::new(request);

    let mut workers = Vec::with_capacity(request.slots.len());
    for idx in 0..request.slots.len() {
        let player = request.slots[idx].player;
        let (sender, receiver) = handoff::channel();
        let base = Arc::clone(&base);
        let settings = Arc::clone(&settings);
        let request = Arc::clone(&request);
        let output_dir = output_dir.clone();

        let handle = thread::spawn(move || {
            slot::process_slot(
                &base,
                &request,
                &request.slots[idx],
                &settings,
                &output_dir,
                sender,
            )
        });
        workers.push((player, receiver, handle));
    }

    let mut multidata = MultiworldData::new(&request.seed_name, &request.player_names);
    let mut outcomes = Vec::with_capacity(workers.len());

    for (player, receiver, handle) in workers {
        match receiver.wait() {
            Ok(rom_name) => multidata.register_rom_name(player, &rom_name),
            Err(e) => warn!("Skipping connect name for player {}: {}", player, e),
        }

        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => Err(PatcherError::WorkerPanicked(player)),
        };
        if let Err(e) = &result {
            warn!("Player {} failed: {}", player, e);
        }
        outcomes.push(SlotOutcome { player, result });
    }

    let multidata_path = output_dir.join(format!("{}.mwdata", request.seed_name));
    multidata.write(&multidata_path)?;
    info!("Wrote {}", multidata_path.display());

    let spoiler_path = if settings.debug {
        let path = output_dir.join("spoiler_log.txt");
        write_spoiler_log(&path, &request, &outcomes)?;
        Some(path)
    } else {
        None
    };

    Ok(BatchReport {
        output_dir,
        multidata_path,
        spoiler_path,
        outcomes,
    })
}

fn write_spoiler_log(path: &Path, request: &GenerationRequest, outcomes: &[SlotOutcome]) -> Result<()> {
    let mut log = String::new();
    log.push_str(&format!("Seed: {} ({})\n\n", request.seed_name, request.seed));
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => log.push_str(&report.spoiler),
            Err(e) => log.push_str(&format!("== Player {} ==\nFAILED: {}\n", outcome.player, e)),
        }
        log.push('\n');
    }
    fs::write(path, log)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("patcher-core-lib-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn base_image_found_in_directory() {
        let dir = scratch_dir("locate");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("readme.txt"), b"x").unwrap();
        fs::write(dir.join("nested").join("base.SFC"), b"rom").unwrap();

        let found = locate_base_image(&dir).unwrap();
        assert_eq!(found, dir.join("nested").join("base.SFC"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_base_image_is_config_error() {
        let dir = scratch_dir("missing");
        assert!(matches!(locate_base_image(&dir), Err(PatcherError::Config(_))));
        assert!(matches!(
            locate_base_image(&dir.join("nope.sfc")),
            Err(PatcherError::Config(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn base_image_checks_length_and_crc() {
        let dir = scratch_dir("checks");
        let path = dir.join("base.sfc");
        fs::write(&path, vec![0u8; 64]).unwrap();

        let mut settings = PatcherSettings {
            base_path: path,
            output_path: dir.clone(),
            keep_patched_image: true,
            debug: false,
            expected_base_len: Some(64),
            expected_base_crc32: Some(apply::crc32(&[0u8; 64])),
            layout: RomLayout::default(),
        };
        assert_eq!(load_base_image(&settings).unwrap().len(), 64);

        settings.expected_base_len = Some(65);
        assert!(load_base_image(&settings).is_err());

        settings.expected_base_len = None;
        settings.expected_base_crc32 = Some(0);
        assert!(load_base_image(&settings).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn settings_defaults_from_json() {
        let settings: PatcherSettings =
            serde_json::from_str(r#"{ "base_path": "base.sfc", "output_path": "out" }"#).unwrap();
        assert!(settings.keep_patched_image);
        assert!(!settings.debug);
        assert_eq!(settings.layout, RomLayout::default());
    }
}
