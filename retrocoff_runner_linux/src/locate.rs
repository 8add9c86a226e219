// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Finding the program image on the host

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use retrocoff_platform_linux::paths;
use retrocoff_shim::LoadError;

/// Extension every loadable program carries
pub const PROGRAM_EXTENSION: &str = ".out";

/// How the runner was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Under its own name, with the program as the first argument
    Direct,
    /// Through a link named after the program
    Alias,
}

/// Append `.out` unless the name already ends in it, in any case.
pub fn fix_program_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let has_extension = bytes.len() >= PROGRAM_EXTENSION.len()
        && bytes[bytes.len() - PROGRAM_EXTENSION.len()..]
            .eq_ignore_ascii_case(PROGRAM_EXTENSION.as_bytes());
    if has_extension {
        name.to_string()
    } else {
        format!("{name}{PROGRAM_EXTENSION}")
    }
}

/// Directory holding the runner binary, with links resolved
///
/// `invoked_as` is the name the process was started under. A name without a
/// separator came from a `PATH` search, so the running executable is asked
/// instead.
pub fn loader_directory(invoked_as: &OsStr) -> io::Result<PathBuf> {
    let resolved = if invoked_as.as_encoded_bytes().contains(&b'/') {
        std::fs::canonicalize(invoked_as).or_else(|_| std::env::current_exe())?
    } else {
        std::env::current_exe()?
    };
    resolved
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "runner path has no parent"))
}

/// An opened program image and the host path it was found at
#[derive(Debug)]
pub struct LocatedProgram {
    pub path: PathBuf,
    pub file: File,
}

/// Search order for program images
#[derive(Debug, Clone)]
pub struct ProgramLocator {
    loader_dir: PathBuf,
    base_path: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl ProgramLocator {
    /// Search relative to `loader_dir` and then the host `PATH`.
    pub fn new(loader_dir: PathBuf) -> Self {
        Self {
            loader_dir,
            base_path: None,
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Also search `base_path`, taken relative to the runner's directory,
    /// before `PATH`.
    #[must_use]
    pub fn with_base_path(mut self, base_path: Option<PathBuf>) -> Self {
        self.base_path = base_path;
        self
    }

    /// Replace the `:`-separated directory list searched last.
    #[must_use]
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Find and open `name`.
    ///
    /// When nothing matches, the lookup is repeated once with an absolute
    /// name case-resolved against the filesystem, or any other name
    /// upper-cased.
    pub fn locate(&self, name: &str, mode: LaunchMode) -> Result<LocatedProgram, LoadError> {
        if let Some(found) = self.try_locate(name, mode) {
            return Ok(found);
        }

        let retry = if name.starts_with('/') {
            paths::resolve_case(name).to_string_lossy().into_owned()
        } else {
            name.to_ascii_uppercase()
        };
        self.try_locate(&retry, mode)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }

    fn try_locate(&self, name: &str, mode: LaunchMode) -> Option<LocatedProgram> {
        match mode {
            LaunchMode::Alias => {
                self.by_bare_name(OsStr::from_bytes(paths::base_name(Path::new(name))))
            }
            LaunchMode::Direct if name.starts_with('/') => open(PathBuf::from(name)),
            LaunchMode::Direct if name.contains('/') => self.relative(name.as_ref()),
            LaunchMode::Direct => self.by_bare_name(name.as_ref()),
        }
    }

    fn relative(&self, name: &OsStr) -> Option<LocatedProgram> {
        open(self.loader_dir.join(name))
    }

    fn by_bare_name(&self, name: &OsStr) -> Option<LocatedProgram> {
        self.relative(name)
            .or_else(|| {
                let base = self.base_path.as_ref()?;
                self.relative(base.join(name).as_os_str())
            })
            .or_else(|| self.from_search_path(name))
    }

    fn from_search_path(&self, name: &OsStr) -> Option<LocatedProgram> {
        let search_path = self.search_path.as_ref()?;
        search_path
            .as_encoded_bytes()
            .split(|&b| b == b':')
            .find_map(|dir| {
                let mut candidate = OsStr::from_bytes(dir).to_os_string();
                candidate.push("/");
                candidate.push(name);
                open(PathBuf::from(candidate))
            })
    }
}

fn open(path: PathBuf) -> Option<LocatedProgram> {
    let file = File::open(&path).ok()?;
    if file.metadata().is_ok_and(|m| m.is_dir()) {
        return None;
    }
    Some(LocatedProgram { path, file })
}
