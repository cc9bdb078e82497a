use flate2::Crc;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::checksum::write_checksum;
use crate::patch::{ByteEdit, PatchSet};
use crate::{PatcherError, Result};

const DELTA_MAGIC: &[u8; 4] = b"MWDP";
const DELTA_VERSION: u8 = 1;
const CONTAINER_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "manifest.json";
const DELTA_ENTRY: &str = "delta.bin";

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

/// A slot's private copy of the image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RomImage {
    data: Vec<u8>,
}

impl RomImage {
    pub fn from_base(base: &[u8]) -> Self {
        Self { data: base.to_vec() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn write(&mut self, edit: &ByteEdit) -> Result<()> {
        let image_len = self.data.len();
        let dst = self
            .data
            .get_mut(edit.offset()..edit.end())
            .ok_or(PatcherError::EditOutOfBounds {
                offset: edit.offset(),
                len: edit.bytes().len(),
                image_len,
            })?;
        dst.copy_from_slice(edit.bytes());
        Ok(())
    }

    /// Plays every edit in order; later edits overwrite earlier ones.
    pub fn apply(&mut self, patches: &PatchSet) -> Result<()> {
        for edit in patches {
            self.write(edit)?;
        }
        Ok(())
    }

    pub fn finalize_checksum(&mut self, offset: usize) -> Result<u16> {
        write_checksum(&mut self.data, offset)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }
}

/// Copies `base`, applies the patches and stamps the checksum.
pub fn apply(base: &[u8], patches: &PatchSet, checksum_offset: usize) -> Result<RomImage> {
    let mut image = RomImage::from_base(base);
    image.apply(patches)?;
    image.finalize_checksum(checksum_offset)?;
    Ok(image)
}

/// Byte runs that turn one exact base image into the target image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeltaPatch {
    target_len: usize,
    runs: Vec<ByteEdit>,
}

impl DeltaPatch {
    pub fn diff(base: &[u8], target: &[u8]) -> Self {
        let differs = |i: usize| i >= base.len() || base[i] != target[i];

        let mut runs = Vec::new();
        let mut i = 0;
        while i < target.len() {
            if !differs(i) {
                i += 1;
                continue;
            }
            let start = i;
            while i < target.len() && differs(i) {
                i += 1;
            }
            runs.push(ByteEdit::new(start, target[start..i].to_vec()));
        }

        Self {
            target_len: target.len(),
            runs,
        }
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    pub fn runs(&self) -> &[ByteEdit] {
        &self.runs
    }

    pub fn changed_bytes(&self) -> usize {
        self.runs.iter().map(|r| r.bytes().len()).sum()
    }

    pub fn apply_to(&self, base: &[u8]) -> Result<Vec<u8>> {
        let mut out = base.to_vec();
        out.resize(self.target_len, 0);
        for run in &self.runs {
            let dst = out
                .get_mut(run.offset()..run.end())
                .ok_or_else(|| {
                    PatcherError::PatchMismatch(format!(
                        "run at 0x{:X} ({} bytes) is past the {}-byte target",
                        run.offset(),
                        run.bytes().len(),
                        self.target_len
                    ))
                })?;
            dst.copy_from_slice(run.bytes());
        }
        Ok(out)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + self.changed_bytes() + self.runs.len() * 8);
        out.extend_from_slice(DELTA_MAGIC);
        out.push(DELTA_VERSION);
        out.extend_from_slice(&(self.target_len as u32).to_le_bytes());
        out.extend_from_slice(&(self.runs.len() as u32).to_le_bytes());
        for run in &self.runs {
            out.extend_from_slice(&(run.offset() as u32).to_le_bytes());
            out.extend_from_slice(&(run.bytes().len() as u32).to_le_bytes());
            out.extend_from_slice(run.bytes());
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = DeltaReader { data, pos: 0 };
        if reader.take(4)? != DELTA_MAGIC {
            return Err(PatcherError::PatchMismatch("not a delta payload".to_string()));
        }
        let version = reader.take(1)?[0];
        if version != DELTA_VERSION {
            return Err(PatcherError::PatchMismatch(format!(
                "unsupported delta version {}",
                version
            )));
        }

        let target_len = reader.u32()? as usize;
        let count = reader.u32()?;
        let mut runs = Vec::new();
        for _ in 0..count {
            let offset = reader.u32()? as usize;
            let len = reader.u32()? as usize;
            runs.push(ByteEdit::new(offset, reader.take(len)?.to_vec()));
        }
        if reader.pos != data.len() {
            return Err(PatcherError::PatchMismatch(
                "trailing bytes after delta runs".to_string(),
            ));
        }

        Ok(Self { target_len, runs })
    }
}

struct DeltaReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DeltaReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| PatcherError::PatchMismatch("truncated delta payload".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PatchManifest {
    pub format_version: u32,
    pub player: u32,
    pub player_name: String,
    pub rom_name: String,
    pub base_len: usize,
    pub base_crc32: u32,
    pub target_len: usize,
}

impl PatchManifest {
    pub fn new(player: u32, player_name: &str, rom_name: &str, base: &[u8], delta: &DeltaPatch) -> Self {
        Self {
            format_version: CONTAINER_VERSION,
            player,
            player_name: player_name.to_string(),
            rom_name: rom_name.to_string(),
            base_len: base.len(),
            base_crc32: crc32(base),
            target_len: delta.target_len(),
        }
    }

    pub fn check_base(&self, base: &[u8]) -> Result<()> {
        if base.len() != self.base_len {
            return Err(PatcherError::PatchMismatch(format!(
                "base is {} bytes, patch expects {}",
                base.len(),
                self.base_len
            )));
        }
        let crc = crc32(base);
        if crc != self.base_crc32 {
            return Err(PatcherError::PatchMismatch(format!(
                "base CRC-32 is {:08X}, patch expects {:08X}",
                crc, self.base_crc32
            )));
        }
        Ok(())
    }
}

pub fn write_container<W: Write + Seek>(writer: W, manifest: &PatchManifest, delta: &DeltaPatch) -> Result<W> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(manifest)?)?;
    zip.start_file(DELTA_ENTRY, options)?;
    zip.write_all(&delta.to_bytes())?;

    Ok(zip.finish()?)
}

pub fn read_container<R: Read + Seek>(reader: R) -> Result<(PatchManifest, DeltaPatch)> {
    let mut archive = ZipArchive::new(reader)?;

    let mut raw = Vec::new();
    archive.by_name(MANIFEST_ENTRY)?.read_to_end(&mut raw)?;
    let manifest: PatchManifest = serde_json::from_slice(&raw)?;
    if manifest.format_version != CONTAINER_VERSION {
        return Err(PatcherError::PatchMismatch(format!(
            "unsupported container version {}",
            manifest.format_version
        )));
    }

    raw.clear();
    archive.by_name(DELTA_ENTRY)?.read_to_end(&mut raw)?;
    let delta = DeltaPatch::from_bytes(&raw)?;
    if delta.target_len() != manifest.target_len {
        return Err(PatcherError::PatchMismatch(format!(
            "manifest target length {} disagrees with delta {}",
            manifest.target_len,
            delta.target_len()
        )));
    }

    Ok((manifest, delta))
}

pub fn write_container_file(path: &Path, manifest: &PatchManifest, delta: &DeltaPatch) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut file = write_container(file, manifest, delta)?;
    file.flush()?;
    Ok(())
}

pub fn read_container_file(path: &Path) -> Result<(PatchManifest, DeltaPatch)> {
    read_container(BufReader::new(File::open(path)?))
}

/// Rebuilds a patched image from a base image and a patch container.
pub fn apply_container(base: &[u8], manifest: &PatchManifest, delta: &DeltaPatch) -> Result<Vec<u8>> {
    manifest.check_base(base)?;
    delta.apply_to(base)
}

pub fn apply_patch_file(base_path: &Path, patch_path: &Path, output_path: &Path) -> Result<PatchManifest> {
    let base = fs::read(base_path)?;
    let (manifest, delta) = read_container_file(patch_path)?;
    let image = apply_container(&base, &manifest, &delta)?;
    fs::write(output_path, image)?;
    info!(
        "Applied {} for player {} to {}",
        patch_path.display(),
        manifest.player,
        output_path.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn edits_play_in_order_then_checksum() {
        let mut patches = PatchSet::new();
        patches.push(0, vec![1, 1, 1]);
        patches.push(1, vec![2]);

        let image = apply(&[0u8; 32], &patches, 16).unwrap();
        assert_eq!(&image.as_bytes()[..3], &[1, 2, 1]);
        assert_eq!(&image.as_bytes()[16..20], &[0xFB, 0xFF, 0x04, 0x00]);
    }

    #[test]
    fn edit_past_end_is_rejected() {
        let mut patches = PatchSet::new();
        patches.push(30, vec![1, 2, 3]);
        match apply(&[0u8; 32], &patches, 0) {
            Err(PatcherError::EditOutOfBounds { offset, len, image_len }) => {
                assert_eq!((offset, len, image_len), (30, 3, 32));
            }
            other => panic!("expected EditOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    fn diff_finds_maximal_runs() {
        let base = [0u8, 0, 0, 0, 0, 0];
        let target = [0u8, 1, 2, 0, 3, 0, 9, 9];
        let delta = DeltaPatch::diff(&base, &target);

        assert_eq!(
            delta.runs(),
            &[
                ByteEdit::new(1, vec![1, 2]),
                ByteEdit::new(4, vec![3]),
                ByteEdit::new(6, vec![9, 9]),
            ]
        );
        assert_eq!(delta.target_len(), 8);
        assert_eq!(delta.apply_to(&base).unwrap(), target.to_vec());
    }

    #[test]
    fn identical_images_give_empty_delta() {
        let data = vec![7u8; 100];
        let delta = DeltaPatch::diff(&data, &data);
        assert!(delta.runs().is_empty());
        assert_eq!(delta.apply_to(&data).unwrap(), data);
    }

    #[test]
    fn shorter_target_truncates() {
        let delta = DeltaPatch::diff(&[1, 2, 3, 4], &[1, 5]);
        assert_eq!(delta.apply_to(&[1, 2, 3, 4]).unwrap(), vec![1, 5]);
    }

    #[test]
    fn delta_bytes_layout() {
        let delta = DeltaPatch::diff(&[0, 0, 0], &[0, 0xAB, 0]);
        let bytes = delta.to_bytes();
        assert_eq!(&bytes[..5], b"MWDP\x01");
        assert_eq!(&bytes[5..9], &3u32.to_le_bytes());
        assert_eq!(&bytes[9..13], &1u32.to_le_bytes());
        assert_eq!(&bytes[13..], &[1, 0, 0, 0, 1, 0, 0, 0, 0xAB]);
        assert_eq!(DeltaPatch::from_bytes(&bytes).unwrap(), delta);
    }

    #[test]
    fn malformed_delta_is_mismatch() {
        assert!(matches!(DeltaPatch::from_bytes(b"MWD"), Err(PatcherError::PatchMismatch(_))));
        assert!(matches!(
            DeltaPatch::from_bytes(b"XXXX\x01\0\0\0\0\0\0\0\0"),
            Err(PatcherError::PatchMismatch(_))
        ));
        let mut bytes = DeltaPatch::diff(&[0], &[1]).to_bytes();
        bytes.pop();
        assert!(matches!(DeltaPatch::from_bytes(&bytes), Err(PatcherError::PatchMismatch(_))));
    }

    #[test]
    fn container_checks_base() {
        let base = vec![0u8; 64];
        let mut target = base.clone();
        target[10] = 0x55;
        let delta = DeltaPatch::diff(&base, &target);
        let manifest = PatchManifest::new(1, "Alice", "MWP011", &base, &delta);

        let cursor = write_container(Cursor::new(Vec::new()), &manifest, &delta).unwrap();
        let (read_manifest, read_delta) = read_container(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(read_manifest, manifest);
        assert_eq!(apply_container(&base, &read_manifest, &read_delta).unwrap(), target);

        let mut wrong = base.clone();
        wrong[0] = 1;
        assert!(matches!(
            apply_container(&wrong, &read_manifest, &read_delta),
            Err(PatcherError::PatchMismatch(_))
        ));
        assert!(matches!(
            apply_container(&base[..63], &read_manifest, &read_delta),
            Err(PatcherError::PatchMismatch(_))
        ));
    }
}
