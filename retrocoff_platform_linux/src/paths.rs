// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Legacy path translation
//!
//! Programs hand over paths such as `C:\SRC\Main.C`. The host needs
//! `/src/main.c`: backslashes become slashes, the drive prefix goes, and each
//! component is matched case-insensitively against what is on disk. Names
//! that do not exist yet are passed through unchanged so that create-style
//! calls still work.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Translate a legacy path into a host path.
pub fn translate(path: &str) -> PathBuf {
    if is_readable(Path::new(path)) {
        return PathBuf::from(path);
    }

    let normalized = normalize(path);
    if is_readable(Path::new(&normalized)) {
        return PathBuf::from(normalized);
    }

    resolve_case(&normalized)
}

/// Rewrite separators, then strip a drive prefix and a doubled leading
/// separator.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let bytes = path.as_bytes();
    let mut rest = path.as_str();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        rest = &rest[2..];
    }
    if rest.starts_with("//") {
        rest = &rest[1..];
    }
    rest.to_string()
}

/// Host path to legacy form (`/` becomes `\`)
pub fn to_legacy(path: &str) -> String {
    path.replace('/', "\\")
}

/// Walk `path` component by component, substituting the on-disk spelling of
/// every component that matches case-insensitively. The walk stops at the
/// first component with no match; the rest is appended unchanged.
pub fn resolve_case(path: &str) -> PathBuf {
    let (mut resolved, rest) = match path.strip_prefix('/') {
        Some(rest) => (PathBuf::from("/"), rest),
        None => (PathBuf::new(), path),
    };

    let mut components = rest.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(component) = components.next() {
        if component == "." || component == ".." {
            resolved.push(component);
            continue;
        }

        match find_entry(&resolved, component) {
            Some(real) => resolved.push(real),
            None => {
                resolved.push(component);
                for remaining in components.by_ref() {
                    resolved.push(remaining);
                }
                break;
            }
        }

        if components.peek().is_some() && !dir_of(&resolved).is_dir() {
            resolved.extend(components.by_ref());
            break;
        }
    }

    if rest.ends_with('/') && !resolved.as_os_str().is_empty() {
        let mut raw = resolved.into_os_string().into_vec();
        if raw.last() != Some(&b'/') {
            raw.push(b'/');
        }
        resolved = PathBuf::from(OsString::from_vec(raw));
    }

    resolved
}

/// Entry of `dir` named `name`, preferring an exact match over a
/// case-insensitive one
fn find_entry(dir: &Path, name: &str) -> Option<OsString> {
    let entries = fs::read_dir(dir_of(dir)).ok()?;
    let mut folded = None;
    for entry in entries.flatten() {
        let candidate = entry.file_name();
        if candidate.as_bytes() == name.as_bytes() {
            return Some(candidate);
        }
        if folded.is_none() && candidate.as_bytes().eq_ignore_ascii_case(name.as_bytes()) {
            folded = Some(candidate);
        }
    }
    folded
}

fn dir_of(path: &Path) -> &Path {
    if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    }
}

fn is_readable(path: &Path) -> bool {
    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string.
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK) == 0 }
}

/// Last component of a host path, as raw bytes
pub fn base_name(path: &Path) -> &[u8] {
    path.file_name().map_or(path.as_os_str(), OsStr::new).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("retrocoff_paths_{}_{tag}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("C:\\SRC\\MAIN.C"), "/SRC/MAIN.C");
        assert_eq!(normalize("c:foo.o"), "foo.o");
        assert_eq!(normalize("\\\\tmp\\x"), "/tmp/x");
        assert_eq!(normalize("plain/name"), "plain/name");
    }

    #[test]
    fn test_to_legacy() {
        assert_eq!(to_legacy("/usr/lib/cc1.out"), "\\usr\\lib\\cc1.out");
    }

    #[test]
    fn test_case_insensitive_resolution() {
        let root = scratch("case");
        fs::create_dir(root.join("foo")).unwrap();
        fs::write(root.join("foo").join("Bar.txt"), b"x").unwrap();

        let legacy = format!("{}/FOO/bar.TXT", root.display());
        assert_eq!(translate(&legacy), root.join("foo").join("Bar.txt"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_translation_is_idempotent() {
        let root = scratch("idem");
        fs::create_dir(root.join("Inc")).unwrap();
        fs::write(root.join("Inc").join("stdio.h"), b"").unwrap();

        let once = translate(&format!("{}\\INC\\STDIO.H", root.display()));
        assert_eq!(once, root.join("Inc").join("stdio.h"));
        let twice = translate(once.to_str().unwrap());
        assert_eq!(twice, once);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_leaf_is_kept() {
        let root = scratch("leaf");
        fs::create_dir(root.join("Out")).unwrap();

        let translated = translate(&format!("{}/OUT/New.O", root.display()));
        assert_eq!(translated, root.join("Out").join("New.O"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_directory_stops_the_walk() {
        let root = scratch("stop");
        let translated = translate(&format!("{}/Nope/Deeper/x.c", root.display()));
        assert_eq!(translated, root.join("Nope").join("Deeper").join("x.c"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/usr/bin/exew32.exe")), b"exew32.exe");
        assert_eq!(base_name(Path::new("cc1.out")), b"cc1.out");
    }
}
