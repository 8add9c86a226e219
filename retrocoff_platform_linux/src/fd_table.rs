// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Small-integer file descriptor table
//!
//! Slots hold shared host streams, so `dup` and `dup2` make two slots refer
//! to one open file with one file position. A stream is closed when the last
//! slot referring to it lets go. The standard streams are never closed on
//! the host.

use std::cell::RefCell;
use std::fs::{File, Metadata};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::rc::Rc;

use retrocoff_shim::syscalls::dos::{DosError, DosResult};

/// Number of descriptor slots
pub const FD_TABLE_SIZE: usize = 32;

/// Host side of a descriptor
#[derive(Debug)]
pub enum HostStream {
    Stdin,
    Stdout,
    Stderr,
    File(File),
}

impl HostStream {
    /// Read up to `buffer.len()` bytes. Files are read until the buffer is
    /// full or end of file; standard input returns what one read delivers.
    pub fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self {
            HostStream::Stdin => io::stdin().lock().read(buffer),
            HostStream::File(file) => {
                let mut total = 0;
                while total < buffer.len() {
                    match file.read(&mut buffer[total..]) {
                        Ok(0) => break,
                        Ok(n) => total += n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(total)
            }
            HostStream::Stdout | HostStream::Stderr => {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            }
        }
    }

    /// Write everything and flush
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            HostStream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()?;
            }
            HostStream::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(data)?;
                err.flush()?;
            }
            HostStream::File(file) => {
                file.write_all(data)?;
                file.flush()?;
            }
            HostStream::Stdin => return Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        }
        Ok(data.len())
    }

    pub fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        match self {
            HostStream::File(file) => file.seek(position),
            _ => {
                // Standard streams may be redirected to a regular file.
                let mut file = self.duplicate_file()?;
                file.seek(position)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            HostStream::Stdin => io::stdin().is_terminal(),
            HostStream::Stdout => io::stdout().is_terminal(),
            HostStream::Stderr => io::stderr().is_terminal(),
            HostStream::File(file) => file.is_terminal(),
        }
    }

    pub fn metadata(&self) -> io::Result<Metadata> {
        match self {
            HostStream::File(file) => file.metadata(),
            _ => self.duplicate_file()?.metadata(),
        }
    }

    /// A `File` sharing the open file description of a standard stream
    fn duplicate_file(&self) -> io::Result<File> {
        let owned = match self {
            HostStream::Stdin => io::stdin().as_fd().try_clone_to_owned()?,
            HostStream::Stdout => io::stdout().as_fd().try_clone_to_owned()?,
            HostStream::Stderr => io::stderr().as_fd().try_clone_to_owned()?,
            HostStream::File(file) => file.as_fd().try_clone_to_owned()?,
        };
        Ok(File::from(owned))
    }
}

pub type SharedStream = Rc<RefCell<HostStream>>;

/// Descriptor table of one session
#[derive(Debug)]
pub struct FdTable {
    slots: Vec<Option<SharedStream>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    /// Table with slots 0-2 bound to the standard streams and slots 3 and 4
    /// bound to standard error
    pub fn new() -> Self {
        let stderr = Rc::new(RefCell::new(HostStream::Stderr));
        let mut slots: Vec<Option<SharedStream>> = vec![None; FD_TABLE_SIZE];
        slots[0] = Some(Rc::new(RefCell::new(HostStream::Stdin)));
        slots[1] = Some(Rc::new(RefCell::new(HostStream::Stdout)));
        slots[2] = Some(Rc::clone(&stderr));
        slots[3] = Some(Rc::clone(&stderr));
        slots[4] = Some(stderr);
        Self { slots }
    }

    /// Stream bound to `fd`, or "invalid handle"
    pub fn get(&self, fd: i32) -> DosResult<&SharedStream> {
        usize::try_from(fd)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .ok_or(DosError::InvalidHandle)
    }

    /// Bind `stream` to the lowest free slot
    pub fn insert(&mut self, stream: SharedStream) -> DosResult<i32> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(DosError::TooManyOpenFiles)?;
        self.slots[index] = Some(stream);
        Ok(index as i32)
    }

    /// Free a slot; the host stream closes with its last slot
    pub fn close(&mut self, fd: i32) -> DosResult<()> {
        self.get(fd)?;
        self.slots[fd as usize] = None;
        Ok(())
    }

    pub fn dup(&mut self, fd: i32) -> DosResult<i32> {
        let stream = Rc::clone(self.get(fd)?);
        self.insert(stream)
    }

    /// Rebind `dst` to the stream behind `src`. Whatever `dst` held is
    /// released first.
    pub fn dup2(&mut self, src: i32, dst: i32) -> DosResult<i32> {
        let stream = Rc::clone(self.get(src)?);
        let slot = usize::try_from(dst)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .ok_or(DosError::InvalidHandle)?;
        *slot = Some(stream);
        Ok(dst)
    }

    #[cfg(test)]
    fn is_open(&self, fd: i32) -> bool {
        self.get(fd).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(tag: &str) -> (std::path::PathBuf, SharedStream) {
        let path = std::env::temp_dir().join(format!(
            "retrocoff_fd_{}_{}_{tag}",
            std::process::id(),
            std::thread::current().name().unwrap_or("t").replace("::", "_")
        ));
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        (path, Rc::new(RefCell::new(HostStream::File(file))))
    }

    #[test]
    fn test_standard_slots() {
        let table = FdTable::new();
        for fd in 0..5 {
            assert!(table.is_open(fd));
        }
        assert!(!table.is_open(5));
        assert!(Rc::ptr_eq(table.get(3).unwrap(), table.get(4).unwrap()));
    }

    #[test]
    fn test_invalid_descriptors() {
        let table = FdTable::new();
        assert_eq!(table.get(-1).unwrap_err(), DosError::InvalidHandle);
        assert_eq!(table.get(FD_TABLE_SIZE as i32).unwrap_err(), DosError::InvalidHandle);
        assert_eq!(table.get(7).unwrap_err(), DosError::InvalidHandle);
    }

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let (path, stream) = temp_file("reuse");
        let mut table = FdTable::new();
        assert_eq!(table.insert(Rc::clone(&stream)).unwrap(), 5);
        assert_eq!(table.insert(Rc::clone(&stream)).unwrap(), 6);
        assert_eq!(table.insert(Rc::clone(&stream)).unwrap(), 7);
        table.close(6).unwrap();
        assert_eq!(table.insert(Rc::clone(&stream)).unwrap(), 6);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_table_full() {
        let (path, stream) = temp_file("full");
        let mut table = FdTable::new();
        for _ in 5..FD_TABLE_SIZE {
            table.insert(Rc::clone(&stream)).unwrap();
        }
        assert_eq!(table.insert(stream).unwrap_err(), DosError::TooManyOpenFiles);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_dup2_releases_destination_once() {
        let (path_a, a) = temp_file("dup2a");
        let (path_b, b) = temp_file("dup2b");
        let mut table = FdTable::new();
        let fa = table.insert(Rc::clone(&a)).unwrap();
        let fb = table.insert(Rc::clone(&b)).unwrap();
        assert_eq!(Rc::strong_count(&b), 2);

        assert_eq!(table.dup2(fa, fb).unwrap(), fb);
        assert_eq!(Rc::strong_count(&b), 1);
        assert_eq!(Rc::strong_count(&a), 3);
        assert!(Rc::ptr_eq(table.get(fa).unwrap(), table.get(fb).unwrap()));

        // Rebinding to the same stream keeps it alive.
        table.dup2(fa, fb).unwrap();
        assert_eq!(Rc::strong_count(&a), 3);

        let _ = std::fs::remove_file(path_a);
        let _ = std::fs::remove_file(path_b);
    }

    #[test]
    fn test_dup_shares_position() {
        let (path, stream) = temp_file("pos");
        let mut table = FdTable::new();
        let fd = table.insert(stream).unwrap();
        let copy = table.dup(fd).unwrap();

        table.get(fd).unwrap().borrow_mut().write(b"hello world").unwrap();
        let position = table.get(copy).unwrap().borrow_mut().seek(SeekFrom::Current(0)).unwrap();
        assert_eq!(position, 11);

        table.get(copy).unwrap().borrow_mut().seek(SeekFrom::Start(6)).unwrap();
        let mut buffer = [0u8; 16];
        let n = table.get(fd).unwrap().borrow_mut().read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"world");
        let _ = std::fs::remove_file(path);
    }
}
