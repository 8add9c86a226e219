// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wrapper table layout
//!
//! The table is an array of 31 function pointers followed by a null
//! terminator. Programs call entries by index, so the order below is fixed.

use crate::tracing::ApiCategory;

/// Number of wrapper entries, terminator excluded
pub const WRAPPER_COUNT: usize = 31;

/// First sentinel word passed to the entry point
pub const ENTRY_SENTINEL_LOW: u32 = 0x0;

/// Second sentinel word passed to the entry point
pub const ENTRY_SENTINEL_HIGH: u32 = 0x8765_4321;

/// Index of every wrapper entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WrapperIndex {
    GrowHeap = 0,
    OpenFile = 1,
    CreateFile = 2,
    Write = 3,
    Read = 4,
    Close = 5,
    Seek = 6,
    FileAttributes = 7,
    SetDta = 8,
    FindFirst = 9,
    FindNext = 10,
    FindClose = 11,
    IsTerminal = 12,
    GetFileTime = 13,
    GetLocalTime = 14,
    SetFileTime = 15,
    MakeDir = 16,
    RemoveDir = 17,
    RemoveFile = 18,
    Rename = 19,
    GetCurrentDir = 20,
    ChangeDir = 21,
    GetDrive = 22,
    Spawn = 23,
    GetExitStatus = 24,
    Dup = 25,
    Dup2 = 26,
    GetVersion = 27,
    Exit = 28,
    Reserved = 29,
    Sleep = 30,
}

impl WrapperIndex {
    /// Every entry in table order
    pub const ALL: [WrapperIndex; WRAPPER_COUNT] = [
        WrapperIndex::GrowHeap,
        WrapperIndex::OpenFile,
        WrapperIndex::CreateFile,
        WrapperIndex::Write,
        WrapperIndex::Read,
        WrapperIndex::Close,
        WrapperIndex::Seek,
        WrapperIndex::FileAttributes,
        WrapperIndex::SetDta,
        WrapperIndex::FindFirst,
        WrapperIndex::FindNext,
        WrapperIndex::FindClose,
        WrapperIndex::IsTerminal,
        WrapperIndex::GetFileTime,
        WrapperIndex::GetLocalTime,
        WrapperIndex::SetFileTime,
        WrapperIndex::MakeDir,
        WrapperIndex::RemoveDir,
        WrapperIndex::RemoveFile,
        WrapperIndex::Rename,
        WrapperIndex::GetCurrentDir,
        WrapperIndex::ChangeDir,
        WrapperIndex::GetDrive,
        WrapperIndex::Spawn,
        WrapperIndex::GetExitStatus,
        WrapperIndex::Dup,
        WrapperIndex::Dup2,
        WrapperIndex::GetVersion,
        WrapperIndex::Exit,
        WrapperIndex::Reserved,
        WrapperIndex::Sleep,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in traces
    pub fn name(self) -> &'static str {
        match self {
            WrapperIndex::GrowHeap => "grow_heap",
            WrapperIndex::OpenFile => "open_file",
            WrapperIndex::CreateFile => "create_file",
            WrapperIndex::Write => "write",
            WrapperIndex::Read => "read",
            WrapperIndex::Close => "close",
            WrapperIndex::Seek => "seek",
            WrapperIndex::FileAttributes => "file_attributes",
            WrapperIndex::SetDta => "set_dta",
            WrapperIndex::FindFirst => "find_first",
            WrapperIndex::FindNext => "find_next",
            WrapperIndex::FindClose => "find_close",
            WrapperIndex::IsTerminal => "isatty",
            WrapperIndex::GetFileTime => "get_file_time",
            WrapperIndex::GetLocalTime => "get_local_time",
            WrapperIndex::SetFileTime => "set_file_time",
            WrapperIndex::MakeDir => "mkdir",
            WrapperIndex::RemoveDir => "rmdir",
            WrapperIndex::RemoveFile => "remove",
            WrapperIndex::Rename => "rename",
            WrapperIndex::GetCurrentDir => "get_current_dir",
            WrapperIndex::ChangeDir => "chdir",
            WrapperIndex::GetDrive => "get_drive",
            WrapperIndex::Spawn => "spawn",
            WrapperIndex::GetExitStatus => "get_exit_status",
            WrapperIndex::Dup => "dup",
            WrapperIndex::Dup2 => "dup2",
            WrapperIndex::GetVersion => "get_version",
            WrapperIndex::Exit => "exit",
            WrapperIndex::Reserved => "reserved",
            WrapperIndex::Sleep => "sleep",
        }
    }

    pub fn category(self) -> ApiCategory {
        match self {
            WrapperIndex::GrowHeap => ApiCategory::Memory,
            WrapperIndex::OpenFile
            | WrapperIndex::CreateFile
            | WrapperIndex::Write
            | WrapperIndex::Read
            | WrapperIndex::Close
            | WrapperIndex::Seek
            | WrapperIndex::FileAttributes
            | WrapperIndex::IsTerminal
            | WrapperIndex::RemoveFile
            | WrapperIndex::Rename
            | WrapperIndex::Dup
            | WrapperIndex::Dup2 => ApiCategory::FileIo,
            WrapperIndex::SetDta
            | WrapperIndex::FindFirst
            | WrapperIndex::FindNext
            | WrapperIndex::FindClose
            | WrapperIndex::MakeDir
            | WrapperIndex::RemoveDir
            | WrapperIndex::GetCurrentDir
            | WrapperIndex::ChangeDir
            | WrapperIndex::GetDrive => ApiCategory::Directory,
            WrapperIndex::GetFileTime
            | WrapperIndex::GetLocalTime
            | WrapperIndex::SetFileTime
            | WrapperIndex::Sleep => ApiCategory::Time,
            WrapperIndex::Spawn | WrapperIndex::GetExitStatus | WrapperIndex::Exit => {
                ApiCategory::Process
            }
            WrapperIndex::GetVersion | WrapperIndex::Reserved => ApiCategory::System,
        }
    }
}
