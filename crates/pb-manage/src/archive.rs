//! Local handling of environment archives (`.tar.gz`, root = data dir contents).

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::path(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|e| Error::path(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| Error::path(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| Error::msg(format!("failed to extract {}: {e}", archive.display())))
}

/// Replaces `target` with the contents of `archive`.
///
/// The archive is extracted into a sibling temp dir first, so a corrupt
/// archive leaves the existing directory untouched.
pub fn replace_dir(archive: &Path, target: &Path) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| Error::path(parent, e))?;

    let staging = tempfile::Builder::new()
        .prefix(".pb-pull-")
        .tempdir_in(parent)
        .map_err(|e| Error::path(parent, e))?;
    unpack(archive, staging.path())?;

    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| Error::path(target, e))?;
    }
    let staged = staging.keep();
    if let Err(e) = fs::rename(&staged, target) {
        let _ = fs::remove_dir_all(&staged);
        return Err(Error::path(target, e));
    }
    Ok(())
}
