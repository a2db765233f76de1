use anyhow::{Context, Result};
use std::fs::{rename, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Writes a finished table image to `path`.
///
/// The image goes to `<path>.tmp` first, is fsynced, then renamed into
/// place, and the parent directory is synced so the rename survives a crash.
/// A crash mid-write leaves only the temp file, which recovery ignores.
///
/// # Errors
///
/// Refuses an empty image, and fails on any I/O error.
pub fn write_table_file(path: &Path, image: &[u8]) -> Result<()> {
    if image.is_empty() {
        anyhow::bail!("refusing to write an empty table to {}", path.display());
    }
    let tmp_path = path.with_extension("sst.tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    file.write_all(image)?;
    file.sync_all()?;
    drop(file);

    rename(&tmp_path, path)
        .with_context(|| format!("renaming {} into place", tmp_path.display()))?;

    // ext4/XFS can lose the new directory entry without this.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
