// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Linux platform implementation of the legacy wrapper table
//!
//! This crate is the host side of a loader session: it maps fixed-address
//! memory, owns the descriptor table and the directory search cursor, and
//! implements every [`DosApi`] service with Linux calls. The native-call
//! thunks in [`thunks`] route the guest's table calls to the active session,
//! and [`entry`] holds the single call into loaded code.

extern crate std;

pub mod entry;
pub mod fd_table;
pub mod guest;
pub mod host_time;
pub mod memory;
pub mod paths;
pub mod search;
pub mod spawn;
pub mod thunks;

use std::cell::RefCell;
use std::ffi::NulError;
use std::fs::{self, File};
use std::io::SeekFrom;
use std::os::unix::ffi::OsStringExt;
use std::rc::Rc;
use std::time::Duration;

use retrocoff_shim::loader::context::ContextBlock;
use retrocoff_shim::loader::memmap::{HEAP_BASE, RegionMap};
use retrocoff_shim::syscalls::dos::{
    AccessMode, DosApi, DosDateTime, DosError, DosResult, MAX_PATH, SeekOrigin, SpawnRequest,
    SystemTimeRecord,
};
use retrocoff_shim::syscalls::dta::{DTA_SIZE, DirectoryEntry};
use thiserror::Error;

pub use fd_table::{FD_TABLE_SIZE, FdTable, HostStream};
pub use memory::MmapMapper;
pub use search::DirectorySearch;
pub use thunks::{ActiveSession, WrapperTable, activate};

/// Platform errors
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("string contains an interior NUL byte: {0}")]
    InteriorNul(#[from] NulError),

    #[error("entering loaded code requires a 32-bit x86 host")]
    UnsupportedArchitecture,
}

pub type Result<T> = core::result::Result<T, PlatformError>;

/// One loader session on Linux
///
/// Owns everything a running guest can reach: the mapped regions and heap,
/// the execution context block, the descriptor table, the directory search
/// cursor and the last child exit status.
pub struct LinuxPlatform {
    memory: RegionMap<MmapMapper>,
    context: ContextBlock,
    files: FdTable,
    search: DirectorySearch,
    exit_status: i32,
    teardown: Vec<Box<dyn FnOnce()>>,
    shut_down: bool,
}

impl LinuxPlatform {
    /// Create a session with an empty address space and the standard
    /// descriptors bound.
    ///
    /// `program_name` and `arguments` are stored in the execution context as
    /// given; `environment` is a flattened `KEY=VALUE\0...\0` block.
    pub fn new(program_name: &str, arguments: Option<&str>, environment: Vec<u8>) -> Result<Self> {
        let context = ContextBlock::new(HEAP_BASE, program_name, arguments, environment)?;
        Ok(Self {
            memory: RegionMap::new(MmapMapper::new()),
            context,
            files: FdTable::new(),
            search: DirectorySearch::new(),
            exit_status: 0,
            teardown: Vec::new(),
            shut_down: false,
        })
    }

    pub fn memory(&self) -> &RegionMap<MmapMapper> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut RegionMap<MmapMapper> {
        &mut self.memory
    }

    pub fn context(&self) -> &ContextBlock {
        &self.context
    }

    pub fn files(&self) -> &FdTable {
        &self.files
    }

    /// Register work to run once at teardown, before memory is released.
    pub fn add_teardown_hook(&mut self, hook: impl FnOnce() + 'static) {
        self.teardown.push(Box::new(hook));
    }

    /// Run the teardown hooks and unmap every region. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.search.close();
        for hook in self.teardown.drain(..) {
            hook();
        }
        self.memory.release_all();
    }

    fn stream(&self, fd: i32) -> DosResult<Rc<RefCell<HostStream>>> {
        self.files.get(fd).map(Rc::clone)
    }

    fn store_entry(&mut self, entry: &DirectoryEntry) -> DosResult<()> {
        let dta = self.context.dta();
        if dta == 0 {
            return Err(DosError::Unreported);
        }
        // SAFETY: the guest registered `dta` as the address of its transfer
        // area, which spans DTA_SIZE bytes and is not borrowed by the host.
        let record = unsafe { guest::slice_mut(dta as *mut u8, DTA_SIZE) };
        entry.store(record).ok_or(DosError::Unreported)
    }

    fn open_with(&mut self, options: &fs::OpenOptions, path: &str, missing: DosError) -> DosResult<i32> {
        let host = paths::translate(path);
        let file: File = options
            .open(&host)
            .map_err(|e| DosError::from_host(&e, missing))?;
        self.files
            .insert(Rc::new(RefCell::new(HostStream::File(file))))
    }
}

impl Drop for LinuxPlatform {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DosApi for LinuxPlatform {
    fn record_error(&mut self, code: u16) {
        self.context.set_error(i32::from(code));
    }

    fn grow_heap(&mut self, new_top: usize) -> DosResult<()> {
        self.memory
            .grow_heap(new_top)
            .map_err(|_| DosError::NotEnoughMemory)
    }

    fn open(&mut self, path: &str, mode: i32) -> DosResult<i32> {
        let mut options = fs::OpenOptions::new();
        match AccessMode::try_from(mode)? {
            AccessMode::Read => options.read(true),
            AccessMode::Write => options.write(true).create(true).truncate(true),
            AccessMode::ReadWrite => options.read(true).write(true),
        };
        self.open_with(&options, path, DosError::FileNotFound)
    }

    fn create(&mut self, path: &str, _attributes: i32) -> DosResult<i32> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        self.open_with(&options, path, DosError::PathNotFound)
    }

    fn write(&mut self, fd: i32, data: &[u8]) -> DosResult<usize> {
        let stream = self.stream(fd)?;
        let written = stream
            .borrow_mut()
            .write(data)
            .map_err(|_| DosError::AccessDenied)?;
        Ok(written)
    }

    fn read(&mut self, fd: i32, buffer: &mut [u8]) -> DosResult<usize> {
        let stream = self.stream(fd)?;
        let read = stream
            .borrow_mut()
            .read(buffer)
            .map_err(|_| DosError::AccessDenied)?;
        Ok(read)
    }

    fn close(&mut self, fd: i32) -> DosResult<()> {
        self.files.close(fd)
    }

    fn seek(&mut self, fd: i32, offset: i64, whence: i32) -> DosResult<u64> {
        let stream = self.stream(fd)?;
        let position = match SeekOrigin::try_from(whence)? {
            SeekOrigin::Start => SeekFrom::Start(u64::try_from(offset).map_err(|_| DosError::Seek)?),
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        };
        let result = stream.borrow_mut().seek(position);
        result.map_err(|_| DosError::Seek)
    }

    fn get_attributes(&mut self, path: &str) -> DosResult<u32> {
        let metadata = fs::metadata(paths::translate(path))
            .map_err(|e| DosError::from_host(&e, DosError::FileNotFound))?;
        match search::attributes_of(&metadata) {
            0 => Err(DosError::Unreported),
            attributes => Ok(attributes),
        }
    }

    fn set_attributes(&mut self, _path: &str, _attributes: u32) -> DosResult<()> {
        Ok(())
    }

    fn set_dta(&mut self, address: usize) {
        self.context.set_dta(address);
    }

    fn find_first(&mut self, pattern: &str, _attributes: u32) -> DosResult<()> {
        let entry = self.search.begin(pattern)?;
        // a search the guest was told failed must not be continued
        self.store_entry(&entry).inspect_err(|_| self.search.close())
    }

    fn find_next(&mut self) -> DosResult<()> {
        let entry = self.search.next()?;
        self.store_entry(&entry)
    }

    fn find_close(&mut self) {
        self.search.close();
    }

    fn is_terminal(&mut self, fd: i32) -> DosResult<bool> {
        Ok(self.stream(fd)?.borrow().is_terminal())
    }

    fn file_time(&mut self, fd: i32) -> DosResult<DosDateTime> {
        let stream = self.stream(fd)?;
        let metadata = stream
            .borrow()
            .metadata()
            .map_err(|e| DosError::from_host(&e, DosError::InvalidHandle))?;
        Ok(search::modified_of(&metadata))
    }

    fn local_time(&mut self) -> DosResult<SystemTimeRecord> {
        Ok(SystemTimeRecord::from(host_time::now()))
    }

    fn set_file_time(&mut self, _fd: i32, _stamp: DosDateTime) -> DosResult<()> {
        Err(DosError::InvalidFunction)
    }

    fn make_dir(&mut self, path: &str) -> DosResult<()> {
        fs::create_dir(paths::translate(path))
            .map_err(|e| DosError::from_host(&e, DosError::PathNotFound))
    }

    fn remove_dir(&mut self, path: &str) -> DosResult<()> {
        fs::remove_dir(paths::translate(path))
            .map_err(|e| DosError::from_host(&e, DosError::PathNotFound))
    }

    fn remove_file(&mut self, path: &str) -> DosResult<()> {
        fs::remove_file(paths::translate(path))
            .map_err(|e| DosError::from_host(&e, DosError::FileNotFound))
    }

    fn rename(&mut self, from: &str, to: &str) -> DosResult<()> {
        fs::rename(paths::translate(from), paths::translate(to))
            .map_err(|e| DosError::from_host(&e, DosError::PathNotFound))
    }

    fn current_dir(&mut self) -> DosResult<String> {
        let cwd = std::env::current_dir().map_err(|_| DosError::PathNotFound)?;
        let legacy = paths::to_legacy(&cwd.to_string_lossy());
        if legacy.len() >= MAX_PATH {
            return Err(DosError::PathNotFound);
        }
        Ok(legacy)
    }

    fn change_dir(&mut self, path: &str) -> DosResult<()> {
        std::env::set_current_dir(paths::translate(path))
            .map_err(|e| DosError::from_host(&e, DosError::PathNotFound))
    }

    fn spawn(&mut self, program: &str, request: &SpawnRequest) -> DosResult<()> {
        let host = paths::translate(program);
        let mut arguments = spawn::command_tail_arguments(&request.command_tail);

        if paths::base_name(&host) == spawn::LAUNCHER_NAME {
            if let Some(target) = arguments.first_mut() {
                let translated = paths::translate(&String::from_utf8_lossy(target));
                *target = translated.into_os_string().into_vec();
            }
        }

        let status = spawn::spawn_and_wait(&host, &arguments, &request.environment)
            .map_err(|_| DosError::Unreported)?;
        self.exit_status = status;
        Ok(())
    }

    fn exit_status(&mut self) -> i32 {
        self.exit_status
    }

    fn dup(&mut self, fd: i32) -> DosResult<i32> {
        self.files.dup(fd)
    }

    fn dup2(&mut self, src: i32, dst: i32) -> DosResult<i32> {
        self.files.dup2(src, dst)
    }

    fn terminate(&mut self, status: i32) -> ! {
        self.shutdown();
        std::process::exit(status)
    }

    fn sleep(&mut self, milliseconds: u64) {
        std::thread::sleep(Duration::from_millis(milliseconds));
    }
}
