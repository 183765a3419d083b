//! Package tarball extraction.
//!
//! Registry tarballs are gzip'd tar archives holding one top-level directory
//! (`package/` for npm). These functions block and are run on the blocking
//! pool.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

/// Unpack a gzip'd tarball into `dest`.
pub(crate) fn unpack(tarball: &[u8], dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(tarball));
    archive.set_preserve_permissions(false);
    archive.unpack(dest)
}

/// The single directory an archive was unpacked into.
pub(crate) fn top_level_dir(dest: &Path) -> io::Result<PathBuf> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        n => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected one top-level directory in package archive, found {n}"),
        )),
    }
}
