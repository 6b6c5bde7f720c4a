//! Manifest and filesystem assertions

use std::path::Path;

/// Data rows of a CSV manifest (header excluded)
pub fn manifest_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path)
        .unwrap_or_else(|e| panic!("cannot open manifest {}: {e}", path.display()));
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| panic!("cannot parse manifest {}: {e}", path.display()))
}

/// Value of `column` in `row`, looked up by header name
pub fn column<'a>(path: &Path, row: &'a csv::StringRecord, name: &str) -> &'a str {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let index = reader
        .headers()
        .unwrap()
        .iter()
        .position(|h| h == name)
        .unwrap_or_else(|| panic!("manifest {} has no column {name}", path.display()));
    &row[index]
}

/// Number of regular files below `dir`, manifests included
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                count_files(&entry.path())
            } else {
                1
            }
        })
        .sum()
}
