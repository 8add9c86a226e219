// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Directory search cursor
//!
//! The legacy find-first/find-next pair is backed by at most one open host
//! directory. Only the "everything in the current directory" wildcard opens
//! one; any other pattern names a single path whose own metadata is the one
//! and only result.

use std::fs::{self, Metadata, ReadDir};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use retrocoff_shim::syscalls::dos::{DosDateTime, DosError, DosResult, file_attributes};
use retrocoff_shim::syscalls::dta::DirectoryEntry;

use crate::host_time;
use crate::paths;

/// Pattern that enumerates the current directory
pub const WILDCARD_CURRENT_DIR: &str = ".\\*.*";

/// At most one active search
#[derive(Debug, Default)]
pub struct DirectorySearch {
    cursor: Option<ReadDir>,
}

impl DirectorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new search for `pattern`, discarding any search in progress,
    /// and return the first result.
    pub fn begin(&mut self, pattern: &str) -> DosResult<DirectoryEntry> {
        self.close();

        if pattern == WILDCARD_CURRENT_DIR {
            let cursor = fs::read_dir(".").map_err(|_| DosError::Unreported)?;
            let first = entry_for(Path::new("."), b".".to_vec())?;
            self.cursor = Some(cursor);
            return Ok(first);
        }

        let host = paths::translate(pattern);
        let name = paths::base_name(&host).to_vec();
        entry_for(&host, name)
    }

    /// Next result of the current search
    pub fn next(&mut self) -> DosResult<DirectoryEntry> {
        let cursor = self.cursor.as_mut().ok_or(DosError::Unreported)?;
        let entry = cursor
            .next()
            .ok_or(DosError::Unreported)?
            .map_err(|_| DosError::Unreported)?;
        entry_for(&entry.path(), entry.file_name().as_bytes().to_vec())
    }

    /// Drop the host directory handle, if any
    pub fn close(&mut self) {
        self.cursor = None;
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.cursor.is_some()
    }
}

fn entry_for(path: &Path, name: Vec<u8>) -> DosResult<DirectoryEntry> {
    let metadata = fs::metadata(path).map_err(|_| DosError::Unreported)?;
    Ok(DirectoryEntry {
        name,
        attributes: attributes_of(&metadata),
        modified: modified_of(&metadata),
        size: metadata.len(),
    })
}

/// Legacy attribute bits of a host file: directories and regular files map
/// to their bit, anything else reports no attributes.
pub fn attributes_of(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        file_attributes::DIRECTORY
    } else if metadata.is_file() {
        file_attributes::ARCHIVE
    } else {
        0
    }
}

/// Packed modification time of a host file
pub fn modified_of(metadata: &Metadata) -> DosDateTime {
    use std::os::unix::fs::MetadataExt;
    DosDateTime::from(host_time::civil_from_unix(metadata.mtime()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_without_search_fails() {
        let mut search = DirectorySearch::new();
        assert_eq!(search.next().unwrap_err(), DosError::Unreported);
        assert!(!search.is_active());
    }

    #[test]
    fn test_single_path_search() {
        let dir = std::env::temp_dir().join(format!("retrocoff_search_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Hello.C"), b"int main;").unwrap();

        let mut search = DirectorySearch::new();
        let entry = search
            .begin(&format!("{}/HELLO.C", dir.display()))
            .unwrap();
        assert_eq!(entry.name, b"Hello.C");
        assert_eq!(entry.attributes, file_attributes::ARCHIVE);
        assert_eq!(entry.size, 9);
        assert!(!search.is_active());

        let entry = search.begin(dir.to_str().unwrap()).unwrap();
        assert_eq!(entry.attributes, file_attributes::DIRECTORY);

        assert_eq!(
            search.begin(&format!("{}/missing.c", dir.display())).unwrap_err(),
            DosError::Unreported
        );
        let _ = fs::remove_dir_all(dir);
    }
}
