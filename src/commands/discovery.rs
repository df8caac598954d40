//! Command discovery: scans the modules directory for `cmd_*` units.

use super::loader::command_name_from_path;
use crate::error::RuntimeError;
use std::path::{Path, PathBuf};

/// Outcome of a directory load. Individual failures never abort the scan.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, RuntimeError)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Files in `dir` that follow the unit naming convention, sorted by path.
/// A missing or unreadable directory yields nothing.
pub fn scan_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut units: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| command_name_from_path(path).is_some())
        .collect();
    units.sort();
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::loader::unit_file_name;
    use std::fs;

    #[test]
    fn scan_missing_dir_is_empty() {
        assert!(scan_dir(Path::new("/nonexistent/modules")).is_empty());
    }

    #[test]
    fn scan_keeps_units_sorted_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(unit_file_name("zeta")), b"").unwrap();
        fs::write(dir.path().join(unit_file_name("alpha")), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join(unit_file_name("dir"))).unwrap();

        let found = scan_dir(dir.path());
        let names: Vec<String> = found
            .iter()
            .filter_map(|p| command_name_from_path(p))
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
