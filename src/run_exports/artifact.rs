// src/run_exports/artifact.rs

//! Reading run exports out of a package artifact
//!
//! The last-resort source: download the whole artifact into a scratch
//! directory and read `info/run_exports.json` from it. Two container formats
//! exist:
//!
//! - `.tar.bz2`: a bzip2-compressed tarball
//! - `.conda`: a zip archive whose `info-*.tar.zst` member holds the metadata

use crate::compression::Encoding;
use crate::error::{Error, Result};
use crate::repository::MetadataFetcher;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Path of the run-export declaration inside an artifact
pub const RUN_EXPORTS_MEMBER: &str = "info/run_exports.json";

/// Download an artifact into a fresh scratch directory and read its run exports
///
/// The scratch directory is removed when this returns, whatever the outcome.
pub(crate) fn download_run_exports(
    fetcher: &dyn MetadataFetcher,
    url: &str,
    filename: &str,
    scratch_root: Option<&Path>,
) -> Result<Option<Value>> {
    let dir = match scratch_root {
        Some(root) => tempfile::Builder::new()
            .prefix("run-exports-")
            .tempdir_in(root)?,
        None => tempfile::Builder::new().prefix("run-exports-").tempdir()?,
    };

    let dest = dir.path().join(filename);
    fetcher.download_file(url, &dest)?;
    read_run_exports(&dest)
}

/// Read `info/run_exports.json` from a local artifact
///
/// Returns `Ok(None)` when the artifact does not declare run exports.
pub fn read_run_exports(path: &Path) -> Result<Option<Value>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.ends_with(".conda") {
        read_from_conda(path)
    } else if name.ends_with(".tar.bz2") {
        let file = File::open(path)?;
        let decoder = Encoding::Bzip2.reader(file)?;
        read_from_tar(decoder)
    } else {
        Err(Error::ParseError(format!(
            "Unknown artifact format: {}",
            path.display()
        )))
    }
}

fn read_from_conda(path: &Path) -> Result<Option<Value>> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::ParseError(format!("Invalid .conda archive {}: {e}", path.display())))?;

    for idx in 0..archive.len() {
        let member = archive
            .by_index(idx)
            .map_err(|e| Error::ParseError(format!("Corrupt .conda member: {e}")))?;
        let member_name = member.name().to_string();
        if member_name.starts_with("info-") && member_name.ends_with(".tar.zst") {
            debug!("Reading {} from {}", member_name, path.display());
            let decoder = Encoding::Zstd.reader(member)?;
            return read_from_tar(decoder);
        }
    }

    Ok(None)
}

fn read_from_tar<R: Read>(reader: R) -> Result<Option<Value>> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_run_exports = entry
            .path()
            .map(|p| p.as_ref() == Path::new(RUN_EXPORTS_MEMBER))
            .unwrap_or(false);
        if is_run_exports {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(Some(serde_json::from_str(&contents)?));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tarball(members: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_read_tar_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libfoo-1.0-h0_0.tar.bz2");

        let tar = tarball(&[
            ("info/index.json", "{}"),
            (RUN_EXPORTS_MEMBER, r#"{"weak": ["libfoo >=1.0,<2.0a0"]}"#),
        ]);
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&tar).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let value = read_run_exports(&path).unwrap().unwrap();
        assert_eq!(value["weak"][0], "libfoo >=1.0,<2.0a0");
    }

    #[test]
    fn test_read_conda() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libbar-2.0-h0_0.conda");

        let info = zstd::encode_all(
            &tarball(&[(RUN_EXPORTS_MEMBER, r#"{"strong": ["libbar >=2.0"]}"#)])[..],
            3,
        )
        .unwrap();

        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = || {
            zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
        };
        writer.start_file("metadata.json", options()).unwrap();
        writer.write_all(br#"{"conda_pkg_format_version": 2}"#).unwrap();
        writer.start_file("info-libbar-2.0-h0_0.tar.zst", options()).unwrap();
        writer.write_all(&info).unwrap();
        writer.finish().unwrap();

        let value = read_run_exports(&path).unwrap().unwrap();
        assert_eq!(value["strong"][0], "libbar >=2.0");
    }

    #[test]
    fn test_artifact_without_run_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain-1.0-0.tar.bz2");
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&tarball(&[("info/index.json", "{}")])).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        assert!(read_run_exports(&path).unwrap().is_none());
    }

    #[test]
    fn test_unknown_format() {
        assert!(read_run_exports(Path::new("/tmp/whatever.zip")).is_err());
    }
}
