use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{MlErr, Result};

/// Recursively finds every `.wav` file under `dir`.
///
/// # Returns
/// The sorted list of files, or `EmptyCorpus` if there are none.
pub fn find_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|e| MlErr::Audio {
            path: current.clone(),
            reason: e.to_string(),
        })?;

        for entry in entries {
            let path = entry?.path();

            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
            {
                files.push(path);
            }
        }
    }

    if files.is_empty() {
        return Err(MlErr::EmptyCorpus(dir.to_path_buf()));
    }

    files.sort();
    Ok(files)
}
