//! Filesystem utilities: directory size, free-space probing, and the
//! recursive copy that backs [`crate::Db::backup`].

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size in bytes of all files under `dir`, recursively.
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Free bytes on the filesystem holding `dir`.
pub(crate) fn available_disk_size(dir: &Path) -> Result<u64> {
    Ok(fs4::available_space(dir)?)
}

/// Recursively copies `src` into `dst`, skipping entries whose file name
/// matches one of `exclude`.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name == *skip) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path, exclude)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
