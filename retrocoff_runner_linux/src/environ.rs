// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! What the guest sees of its own invocation: the flattened environment
//! block, the argument string and the legacy program name.

use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use retrocoff_platform_linux::paths;

/// Drive prefix of every legacy program name
pub const DEFAULT_DRIVE: &str = "C:\\";

/// Encode host variables as consecutive `KEY=VALUE\0` strings followed by an
/// empty string. `PATH` uses the legacy `;` separator.
pub fn flatten_environment<I>(vars: I) -> Vec<u8>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut block = Vec::new();
    for (key, value) in vars {
        let is_path = key.as_bytes() == b"PATH";
        block.extend_from_slice(key.as_bytes());
        block.push(b'=');
        if is_path {
            block.extend(
                value
                    .as_bytes()
                    .iter()
                    .map(|&b| if b == b':' { b';' } else { b }),
            );
        } else {
            block.extend_from_slice(value.as_bytes());
        }
        block.push(0);
    }
    block.push(0);
    block
}

/// Join guest arguments into one command line. Arguments holding a space or
/// a tab are double-quoted; no arguments means no argument string at all.
pub fn join_args(arguments: &[String]) -> Option<String> {
    if arguments.is_empty() {
        return None;
    }
    let quoted: Vec<String> = arguments
        .iter()
        .map(|arg| {
            if arg.contains([' ', '\t']) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect();
    Some(quoted.join(" "))
}

/// `C:\` followed by the host path with `\` separators
pub fn legacy_program_name(path: &Path) -> String {
    format!(
        "{DEFAULT_DRIVE}{}",
        paths::to_legacy(&path.to_string_lossy())
    )
}
