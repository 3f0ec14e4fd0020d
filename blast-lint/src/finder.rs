//! Pipeline root discovery
//!
//! A pipeline root is any directory containing the pipeline definition
//! file. Discovery walks the tree recursively and keeps going into nested
//! directories even after a match, so nested pipelines are found (and then
//! rejected by the linter).

use crate::Result;
use blast_core::FileSystem;
use std::path::{Path, PathBuf};

/// Find every directory under `root` (inclusive) containing
/// `pipeline_file_name`.
pub fn find_pipeline_roots(
    fs: &dyn FileSystem,
    root: &Path,
    pipeline_file_name: &str,
) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    walk(fs, root, pipeline_file_name, &mut roots)?;
    Ok(roots)
}

fn walk(
    fs: &dyn FileSystem,
    dir: &Path,
    pipeline_file_name: &str,
    roots: &mut Vec<PathBuf>,
) -> Result<()> {
    if !fs.is_dir(dir) {
        return Ok(());
    }
    if fs.is_file(&dir.join(pipeline_file_name)) {
        roots.push(dir.to_path_buf());
    }
    for entry in fs.read_dir(dir)? {
        if fs.is_dir(&entry) {
            walk(fs, &entry, pipeline_file_name, roots)?;
        }
    }
    Ok(())
}
