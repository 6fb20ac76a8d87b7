// src/install/extract.rs

//! Package artifact extraction
//!
//! Artifacts are tar archives, optionally compressed with gzip, xz or zstd.
//! Compression is detected from magic bytes, not the URL.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use tar::Archive;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Artifact compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Xz,
    Zstd,
    /// Uncompressed tar
    None,
}

/// Detect compression from the first bytes of the artifact
pub fn detect_compression(path: &Path) -> Result<CompressionFormat> {
    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open artifact {}: {}", path.display(), e))
    })?;
    let mut magic = [0u8; 6];
    let read = file.read(&mut magic)?;
    let magic = &magic[..read];

    // gzip: 0x1F 0x8B
    if magic.starts_with(&[0x1F, 0x8B]) {
        return Ok(CompressionFormat::Gzip);
    }

    // xz: 0xFD '7zXZ' 0x00
    if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
        return Ok(CompressionFormat::Xz);
    }

    // zstd: 0x28 0xB5 0x2F 0xFD
    if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        return Ok(CompressionFormat::Zstd);
    }

    Ok(CompressionFormat::None)
}

/// Open the artifact as a decompressed tar stream
fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let compression = detect_compression(path)?;
    debug!("Artifact {} compression: {:?}", path.display(), compression);

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
        CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(file).map_err(|e| {
                Error::IoError(format!("Failed to create zstd decoder: {}", e))
            })?;
            Box::new(decoder)
        }
        CompressionFormat::None => Box::new(file),
    };

    Ok(Archive::new(reader))
}

/// Unpack `artifact` into `dest`, returning the number of entries written
///
/// Entries that would land outside `dest` are skipped.
pub fn unpack(artifact: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).map_err(|e| {
        Error::IoError(format!("Failed to create directory {}: {}", dest.display(), e))
    })?;

    let mut archive = open_archive(artifact)?;
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let extract_error =
        |e: std::io::Error| Error::IoError(format!("Failed to extract {}: {}", artifact.display(), e));

    let mut count = 0;
    for entry in archive.entries().map_err(extract_error)? {
        let mut entry = entry.map_err(extract_error)?;
        let entry_path = entry
            .path()
            .map_err(extract_error)?
            .to_string_lossy()
            .to_string();

        if entry.unpack_in(dest).map_err(extract_error)? {
            count += 1;
        } else {
            warn!("Skipping archive entry outside the payload: {}", entry_path);
        }
    }

    debug!("Extracted {} entries into {}", count, dest.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    fn tar_bytes() -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let data = b"#!/bin/sh\necho hi\n";
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        builder
            .append_data(&mut header, "TARGET/bin/hello", &data[..])
            .unwrap();
        builder.into_inner().unwrap()
    }

    fn write_artifact(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_compression_detection() {
        let dir = tempfile::tempdir().unwrap();

        let gz = write_artifact(&dir, "a", &[0x1F, 0x8B, 0x08, 0, 0, 0]);
        let xz = write_artifact(&dir, "b", &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]);
        let zst = write_artifact(&dir, "c", &[0x28, 0xB5, 0x2F, 0xFD, 0, 0]);
        let plain = write_artifact(&dir, "d", b"TARGET");
        let tiny = write_artifact(&dir, "e", &[0x1F]);

        assert_eq!(detect_compression(&gz).unwrap(), CompressionFormat::Gzip);
        assert_eq!(detect_compression(&xz).unwrap(), CompressionFormat::Xz);
        assert_eq!(detect_compression(&zst).unwrap(), CompressionFormat::Zstd);
        assert_eq!(detect_compression(&plain).unwrap(), CompressionFormat::None);
        assert_eq!(detect_compression(&tiny).unwrap(), CompressionFormat::None);
    }

    #[test]
    fn test_unpack_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes()).unwrap();
        let artifact = write_artifact(&dir, "pkg.tar.gz", &encoder.finish().unwrap());

        let dest = dir.path().join("out");
        assert_eq!(unpack(&artifact, &dest).unwrap(), 1);
        assert!(dest.join("TARGET/bin/hello").is_file());
    }

    #[test]
    fn test_unpack_xz_and_zstd() {
        let dir = tempfile::tempdir().unwrap();

        let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
        xz.write_all(&tar_bytes()).unwrap();
        let xz_artifact = write_artifact(&dir, "pkg.tar.xz", &xz.finish().unwrap());

        let zst = zstd::encode_all(&tar_bytes()[..], 3).unwrap();
        let zst_artifact = write_artifact(&dir, "pkg.tar.zst", &zst);

        for (artifact, out) in [(xz_artifact, "xz"), (zst_artifact, "zst")] {
            let dest = dir.path().join(out);
            unpack(&artifact, &dest).unwrap();
            assert_eq!(
                fs::read(dest.join("TARGET/bin/hello")).unwrap(),
                b"#!/bin/sh\necho hi\n"
            );
        }
    }

    #[test]
    fn test_unpack_plain_tar() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(&dir, "pkg.tar", &tar_bytes());

        let dest = dir.path().join("out");
        unpack(&artifact, &dest).unwrap();
        assert!(dest.join("TARGET/bin/hello").exists());
    }

    #[test]
    fn test_entries_escaping_payload_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        let name = b"../evil.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        let artifact = write_artifact(&dir, "evil.tar", &builder.into_inner().unwrap());

        let dest = dir.path().join("out");
        assert_eq!(unpack(&artifact, &dest).unwrap(), 0);
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_garbage_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0xAB; 700]).unwrap();
        let artifact = write_artifact(&dir, "bad.tar.gz", &encoder.finish().unwrap());

        let result = unpack(&artifact, &dir.path().join("out"));
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
