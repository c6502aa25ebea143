//! Standard library location and discovery.
//!
//! `import math` style imports resolve against a directory of `.sbl`
//! units. The directory is found through the `SABLE_STDLIB` environment
//! variable, a `stdlib/` directory next to the executable, or `stdlib/`
//! under the current directory, in that order.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;

pub const STDLIB_ENV: &str = "SABLE_STDLIB";

pub fn default_root() -> PathBuf {
    if let Some(path) = env::var_os(STDLIB_ENV) {
        return PathBuf::from(path);
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(beside) = exe.parent().map(|dir| dir.join("stdlib")) {
            if beside.is_dir() {
                return beside;
            }
        }
    }
    PathBuf::from("stdlib")
}

/// Every `.sbl` unit under `root`, as dotted module names relative to
/// it, sorted.
pub fn modules(root: &Path) -> Result<Vec<String>, CoreError> {
    if !root.is_dir() {
        return Err(CoreError::MissingStdlib(root.to_path_buf()));
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension() != Some("sbl".as_ref()) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join(".");
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_units_recursively_and_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("math.sbl"), "").expect("write");
        fs::write(dir.path().join("fmt.sbl"), "").expect("write");
        fs::create_dir(dir.path().join("net")).expect("mkdir");
        fs::write(dir.path().join("net/url.sbl"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "").expect("write");

        let found = modules(dir.path()).expect("modules");
        assert_eq!(found, vec!["fmt", "math", "net.url"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("absent");
        assert!(matches!(
            modules(&root),
            Err(CoreError::MissingStdlib(p)) if p == root
        ));
    }
}
