use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::PathBuf;

use patcher_core::{apply::apply_patch_file, run, GenerationRequest, PatcherSettings, RomLayout};

#[derive(Debug, Parser)]
#[command(name = "multiworld-patcher", version, about = "Multiworld ROM patch generator")]
struct Args {
    /// Generation request (JSON) describing every slot to build.
    #[arg(long, required_unless_present = "apply_patch")]
    request: Option<PathBuf>,

    /// Base image file, or a directory to search for one.
    #[arg(long)]
    base: PathBuf,

    /// Output directory, or the output image when applying a patch.
    #[arg(long)]
    output: PathBuf,

    /// Layout description (JSON). Defaults to the ExHiRom combo layout.
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Keep the patched image next to the patch (`--keep-image false` to drop it).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    keep_image: bool,

    #[arg(long)]
    expected_len: Option<usize>,

    /// Expected CRC-32 of the base image, in hex.
    #[arg(long, value_parser = parse_hex_u32)]
    expected_crc: Option<u32>,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Rebuild a patched image from a .mwpatch container and exit.
    #[arg(long, value_name = "PATCH")]
    apply_patch: Option<PathBuf>,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid CRC-32 {:?}: {}", s, e))
}

fn init_logging(debug: bool) {
    let default = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    // Client path: apply a patch container and exit.
    if let Some(patch) = args.apply_patch.as_ref() {
        match apply_patch_file(&args.base, patch, &args.output) {
            Ok(manifest) => info!("Rebuilt image for {} ({})", manifest.player_name, manifest.rom_name),
            Err(e) => {
                error!("Failed to apply {}: {}", patch.display(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    let layout = match args.layout.as_ref() {
        Some(path) => match RomLayout::load(path) {
            Ok(layout) => layout,
            Err(e) => {
                error!("Failed to load layout {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => RomLayout::default(),
    };

    let request_path = match args.request {
        Some(path) => path,
        None => {
            error!("--request is required");
            std::process::exit(2);
        }
    };
    let request = match GenerationRequest::load(&request_path) {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to load request {}: {}", request_path.display(), e);
            std::process::exit(1);
        }
    };

    let settings = PatcherSettings {
        base_path: args.base,
        output_path: args.output,
        keep_patched_image: args.keep_image,
        debug: args.debug,
        expected_base_len: args.expected_len,
        expected_base_crc32: args.expected_crc,
        layout,
    };

    let report = match run(settings, request) {
        Ok(report) => report,
        Err(err) => {
            error!("Error: {err}");
            std::process::exit(1);
        }
    };

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(slot) => println!(
                "Player {} ({}): {} ({} bytes changed)",
                slot.player,
                slot.player_name,
                slot.files.patch.display(),
                slot.changed_bytes
            ),
            Err(e) => println!("Player {}: FAILED: {}", outcome.player, e),
        }
    }
    println!("Multiworld data: {}", report.multidata_path.display());

    if !report.all_succeeded() {
        std::process::exit(1);
    }
}
