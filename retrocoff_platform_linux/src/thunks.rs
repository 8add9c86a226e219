// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Native-call thunks behind the wrapper table
//!
//! Each table slot holds the address of one `extern "C"` function below.
//! The guest pushes every argument on the stack and cleans up after the
//! call, which is the C calling convention on 32-bit x86. A thunk converts
//! its raw arguments, forwards to the [`DosApi`] of the active session and
//! turns a [`DosError`] into -1 plus, where the legacy interface reported
//! one, a code in the error slot.
//!
//! The active session is installed with [`activate`] for the duration of
//! the guest's run. A thunk called with no active session returns -1.

use core::cell::Cell;
use core::ffi::{c_char, c_int, c_long, c_uint, c_ulong};
use core::marker::PhantomData;
use core::ptr::NonNull;

use retrocoff_shim::syscalls::dos::{
    CURRENT_DRIVE, DEVICE_IS_TERMINAL, DOS_VERSION, DosApi, DosDateTime, DosError, DosResult,
    SpawnRequest, SystemTimeRecord,
};
use retrocoff_shim::syscalls::table::{WRAPPER_COUNT, WrapperIndex};

use crate::guest;

/// Value returned by a failed wrapper
const FAILURE: c_int = -1;

thread_local! {
    static ACTIVE: Cell<Option<NonNull<dyn DosApi>>> = const { Cell::new(None) };
}

/// Guard returned by [`activate`]; restores the previously active session
/// when dropped.
pub struct ActiveSession<'a> {
    previous: Option<NonNull<dyn DosApi>>,
    _session: PhantomData<&'a mut (dyn DosApi + 'static)>,
}

/// Route wrapper calls on this thread to `api` until the guard is dropped.
pub fn activate<'a>(api: &'a mut (dyn DosApi + 'static)) -> ActiveSession<'a> {
    let previous = ACTIVE.with(|active| active.replace(Some(NonNull::from(api))));
    ActiveSession {
        previous,
        _session: PhantomData,
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(self.previous));
    }
}

/// Run `f` against the active session, or return `fallback` if there is
/// none.
fn with_session<R>(fallback: R, f: impl FnOnce(&mut dyn DosApi) -> R) -> R {
    let Some(mut api) = ACTIVE.with(Cell::take) else {
        return fallback;
    };
    // SAFETY: the pointer comes from the exclusive borrow held by the
    // `ActiveSession` guard, and it is taken out of the cell while in use
    // so no second reference can be formed.
    let result = f(unsafe { api.as_mut() });
    ACTIVE.with(|active| active.set(Some(api)));
    result
}

/// Forward one call and encode its outcome for the guest.
fn dispatch<T>(
    call: impl FnOnce(&mut dyn DosApi) -> DosResult<T>,
    encode: impl FnOnce(T) -> c_int,
) -> c_int {
    with_session(FAILURE, |api| match call(&mut *api) {
        Ok(value) => encode(value),
        Err(err) => {
            if let Some(code) = err.code() {
                api.record_error(code);
            }
            FAILURE
        }
    })
}

/// Guest path argument; a null pointer is reported as `missing`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn path_arg(ptr: *const c_char, missing: DosError) -> DosResult<String> {
    // SAFETY: guaranteed by the caller.
    unsafe { guest::read_string(ptr) }.ok_or(missing)
}

fn saturate(value: usize) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}

/// Spawn parameter block as laid out by the guest
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ExecParams {
    /// `KEY=VALUE\0...\0\0` block for the child
    pub environment: *const c_char,
    pub segment: u16,
    /// Command tail, prefix and terminator included
    pub arguments: *const c_char,
}

/// #0: grow the heap to `pages << 12`
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_grow_heap(pages: c_uint) -> c_int {
    let new_top = (pages as usize) << 12;
    dispatch(|api| api.grow_heap(new_top), |()| 0)
}

/// #1: open an existing file
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_open_file(path: *const c_char, mode: c_int) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::FileNotFound) };
    dispatch(|api| api.open(&path?, mode), |fd| fd)
}

/// #2: create or truncate a file
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_create_file(path: *const c_char, attributes: c_int) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::PathNotFound) };
    dispatch(|api| api.create(&path?, attributes), |fd| fd)
}

/// #3: write `size` bytes from `data`
///
/// # Safety
/// `data` must be valid for reads of `size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_write(fd: c_int, data: *const u8, size: c_ulong) -> c_int {
    // SAFETY: guaranteed by the caller.
    let data = unsafe { guest::slice(data, size as usize) };
    dispatch(|api| api.write(fd, data), saturate)
}

/// #4: read up to `size` bytes into `data`
///
/// # Safety
/// `data` must be valid for writes of `size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_read(fd: c_int, data: *mut u8, size: c_ulong) -> c_int {
    // SAFETY: guaranteed by the caller.
    let buffer = unsafe { guest::slice_mut(data, size as usize) };
    dispatch(|api| api.read(fd, buffer), saturate)
}

/// #5: close a descriptor
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_close(fd: c_int) -> c_int {
    dispatch(|api| api.close(fd), |()| 0)
}

/// #6: reposition a descriptor, returning the new offset
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_seek(fd: c_int, offset: c_long, whence: c_int) -> c_long {
    let mut position: c_long = -1;
    dispatch(
        |api| api.seek(fd, i64::from(offset), whence),
        |offset| {
            position = c_long::try_from(offset).unwrap_or(c_long::MAX);
            0
        },
    );
    position
}

/// #7: get (`set == 0`) or set the attributes of a path
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_file_attributes(
    path: *const c_char,
    attributes: c_uint,
    set: c_int,
) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::FileNotFound) };
    if set == 0 {
        dispatch(
            |api| api.get_attributes(&path?),
            |mask| saturate(mask as usize),
        )
    } else {
        dispatch(|api| api.set_attributes(&path?, attributes), |()| 0)
    }
}

/// #8: register the directory transfer area
///
/// # Safety
/// `dta` must be null or point to a 286-byte area that stays valid while
/// searches run.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_set_dta(dta: *mut u8) -> c_int {
    with_session(FAILURE, |api| {
        api.set_dta(dta as usize);
        0
    })
}

/// #9: begin a directory search
///
/// # Safety
/// `pattern` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_find_first(pattern: *const c_char, attributes: c_uint) -> c_int {
    // SAFETY: guaranteed by the caller.
    let pattern = unsafe { path_arg(pattern, DosError::Unreported) };
    dispatch(|api| api.find_first(&pattern?, attributes), |()| 0)
}

/// #10: continue the directory search
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_find_next() -> c_int {
    dispatch(|api| api.find_next(), |()| 0)
}

/// #11: end the directory search
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_find_close() -> c_int {
    with_session(FAILURE, |api| {
        api.find_close();
        0
    })
}

/// #12: 0x80 for a terminal, otherwise 0
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_is_terminal(fd: c_int) -> c_int {
    dispatch(
        |api| api.is_terminal(fd),
        |terminal| if terminal { DEVICE_IS_TERMINAL } else { 0 },
    )
}

/// #13: packed modification time of a descriptor
///
/// # Safety
/// `stamp` must be null or valid for writes of 4 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_file_time(fd: c_int, stamp: *mut DosDateTime) -> c_int {
    dispatch(
        |api| api.file_time(fd),
        |value| {
            // SAFETY: guaranteed by the caller.
            unsafe { guest::write_value(stamp.cast(), &value) };
            0
        },
    )
}

/// #14: current local time
///
/// # Safety
/// `record` must be null or valid for writes of 28 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_local_time(record: *mut SystemTimeRecord) -> c_int {
    dispatch(
        |api| api.local_time(),
        |value| {
            // SAFETY: guaranteed by the caller.
            unsafe { guest::write_value(record.cast(), &value) };
            0
        },
    )
}

/// #15: set the time of a descriptor (unsupported)
///
/// # Safety
/// `stamp` must be null or valid for reads of 4 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_set_file_time(fd: c_int, stamp: *const DosDateTime) -> c_int {
    let value = if stamp.is_null() {
        DosDateTime::default()
    } else {
        // SAFETY: guaranteed by the caller.
        unsafe { stamp.read_unaligned() }
    };
    dispatch(|api| api.set_file_time(fd, value), |()| 0)
}

/// #16: create a directory
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_make_dir(path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::PathNotFound) };
    dispatch(|api| api.make_dir(&path?), |()| 0)
}

/// #17: remove an empty directory
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_remove_dir(path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::PathNotFound) };
    dispatch(|api| api.remove_dir(&path?), |()| 0)
}

/// #18: delete a file
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_remove_file(path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::FileNotFound) };
    dispatch(|api| api.remove_file(&path?), |()| 0)
}

/// #19: rename or move
///
/// # Safety
/// Both pointers must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_rename(from: *const c_char, to: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let (from, to) = unsafe {
        (
            path_arg(from, DosError::PathNotFound),
            path_arg(to, DosError::PathNotFound),
        )
    };
    dispatch(|api| api.rename(&from?, &to?), |()| 0)
}

/// #20: current directory with legacy separators
///
/// # Safety
/// `buffer` must be valid for writes of 1024 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_get_current_dir(buffer: *mut c_char, _drive: c_char) -> c_int {
    dispatch(
        |api| {
            if buffer.is_null() {
                return Err(DosError::PathNotFound);
            }
            api.current_dir()
        },
        |cwd| {
            // SAFETY: guaranteed by the caller; `current_dir` keeps the
            // string and its terminator within 1024 bytes.
            unsafe { guest::write_cstr(buffer, cwd.as_bytes()) };
            0
        },
    )
}

/// #21: change the working directory
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_change_dir(path: *const c_char) -> c_int {
    // SAFETY: guaranteed by the caller.
    let path = unsafe { path_arg(path, DosError::PathNotFound) };
    dispatch(|api| api.change_dir(&path?), |()| 0)
}

/// #22: current drive, always C:
///
/// # Safety
/// Callable at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_get_drive() -> c_int {
    CURRENT_DRIVE
}

/// #23: run a program and wait for it
///
/// # Safety
/// `program` must be null or a NUL-terminated string; `params` must be null
/// or point to an [`ExecParams`] whose strings are valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_spawn(program: *const c_char, params: *const ExecParams) -> c_int {
    // SAFETY: guaranteed by the caller.
    let program = unsafe { path_arg(program, DosError::Unreported) };
    let request = if params.is_null() {
        Err(DosError::Unreported)
    } else {
        // SAFETY: guaranteed by the caller; the block is packed, so it is
        // read without assuming alignment.
        let params = unsafe { params.read_unaligned() };
        Ok(SpawnRequest {
            command_tail: unsafe { guest::cstr_bytes(params.arguments) }
                .unwrap_or_default()
                .to_vec(),
            environment: unsafe { guest::read_env_block(params.environment) },
        })
    };
    dispatch(|api| api.spawn(&program?, &request?), |()| 0)
}

/// #24: exit status of the last spawned child
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_get_exit_status() -> c_int {
    with_session(FAILURE, |api| api.exit_status())
}

/// #25: duplicate a descriptor into the lowest free slot
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_dup(fd: c_int) -> c_int {
    dispatch(|api| api.dup(fd), |fd| fd)
}

/// #26: rebind `dst` to the resource behind `src`
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_dup2(src: c_int, dst: c_int) -> c_int {
    dispatch(|api| api.dup2(src, dst), |fd| fd)
}

/// #27: legacy OS version
///
/// # Safety
/// Callable at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_get_version() -> c_int {
    DOS_VERSION
}

/// #28: tear the session down and exit the process
///
/// # Safety
/// Never returns; the guest's stack and memory are gone afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_exit(status: c_int) -> ! {
    with_session((), |api| api.terminate(status));
    std::process::exit(status)
}

/// #29: reserved
///
/// # Safety
/// Callable at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_reserved() -> c_int {
    0
}

/// #30: sleep for `milliseconds`
///
/// # Safety
/// Must only be called by guest code while a session is active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn retrocoff_sleep(milliseconds: c_long) {
    let milliseconds = u64::try_from(milliseconds).unwrap_or(0);
    with_session((), |api| api.sleep(milliseconds));
}

/// One wrapper table slot
pub struct WrapperEntry {
    pub index: WrapperIndex,
    pub address: usize,
}

/// Thunk addresses in table order
pub fn wrapper_functions() -> [WrapperEntry; WRAPPER_COUNT] {
    use WrapperIndex as W;
    let entry = |index, address: usize| WrapperEntry { index, address };
    [
        entry(W::GrowHeap, retrocoff_grow_heap as *const () as usize),
        entry(W::OpenFile, retrocoff_open_file as *const () as usize),
        entry(W::CreateFile, retrocoff_create_file as *const () as usize),
        entry(W::Write, retrocoff_write as *const () as usize),
        entry(W::Read, retrocoff_read as *const () as usize),
        entry(W::Close, retrocoff_close as *const () as usize),
        entry(W::Seek, retrocoff_seek as *const () as usize),
        entry(W::FileAttributes, retrocoff_file_attributes as *const () as usize),
        entry(W::SetDta, retrocoff_set_dta as *const () as usize),
        entry(W::FindFirst, retrocoff_find_first as *const () as usize),
        entry(W::FindNext, retrocoff_find_next as *const () as usize),
        entry(W::FindClose, retrocoff_find_close as *const () as usize),
        entry(W::IsTerminal, retrocoff_is_terminal as *const () as usize),
        entry(W::GetFileTime, retrocoff_file_time as *const () as usize),
        entry(W::GetLocalTime, retrocoff_local_time as *const () as usize),
        entry(W::SetFileTime, retrocoff_set_file_time as *const () as usize),
        entry(W::MakeDir, retrocoff_make_dir as *const () as usize),
        entry(W::RemoveDir, retrocoff_remove_dir as *const () as usize),
        entry(W::RemoveFile, retrocoff_remove_file as *const () as usize),
        entry(W::Rename, retrocoff_rename as *const () as usize),
        entry(W::GetCurrentDir, retrocoff_get_current_dir as *const () as usize),
        entry(W::ChangeDir, retrocoff_change_dir as *const () as usize),
        entry(W::GetDrive, retrocoff_get_drive as *const () as usize),
        entry(W::Spawn, retrocoff_spawn as *const () as usize),
        entry(W::GetExitStatus, retrocoff_get_exit_status as *const () as usize),
        entry(W::Dup, retrocoff_dup as *const () as usize),
        entry(W::Dup2, retrocoff_dup2 as *const () as usize),
        entry(W::GetVersion, retrocoff_get_version as *const () as usize),
        entry(W::Exit, retrocoff_exit as *const () as usize),
        entry(W::Reserved, retrocoff_reserved as *const () as usize),
        entry(W::Sleep, retrocoff_sleep as *const () as usize),
    ]
}

/// The table handed to the guest: 31 thunk addresses and a zero terminator,
/// at a stable heap address.
pub struct WrapperTable {
    slots: Box<[usize; WRAPPER_COUNT + 1]>,
}

impl Default for WrapperTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapperTable {
    pub fn new() -> Self {
        let mut slots = Box::new([0usize; WRAPPER_COUNT + 1]);
        for entry in wrapper_functions() {
            slots[entry.index.index()] = entry.address;
        }
        Self { slots }
    }

    /// Address handed to the guest at entry
    pub fn as_ptr(&self) -> *const usize {
        self.slots.as_ptr()
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_layout() {
        let table = WrapperTable::new();
        let slots = table.slots();
        assert_eq!(slots.len(), 32);
        assert!(slots[..WRAPPER_COUNT].iter().all(|&address| address != 0));
        assert_eq!(slots[WRAPPER_COUNT], 0);
        assert_eq!(
            slots[WrapperIndex::OpenFile.index()],
            retrocoff_open_file as *const () as usize
        );
        assert_eq!(
            slots[WrapperIndex::Sleep.index()],
            retrocoff_sleep as *const () as usize
        );
    }

    #[test]
    fn test_entries_are_in_index_order() {
        for (position, entry) in wrapper_functions().iter().enumerate() {
            assert_eq!(entry.index.index(), position);
        }
    }

    #[test]
    fn test_no_session_fails() {
        assert_eq!(unsafe { retrocoff_close(1) }, FAILURE);
        assert_eq!(unsafe { retrocoff_find_next() }, FAILURE);
        assert_eq!(unsafe { retrocoff_get_drive() }, 2);
        assert_eq!(unsafe { retrocoff_get_version() }, 5);
        assert_eq!(unsafe { retrocoff_reserved() }, 0);
    }

    #[test]
    fn test_exec_params_layout() {
        assert_eq!(
            core::mem::size_of::<ExecParams>(),
            2 * core::mem::size_of::<usize>() + 2
        );
    }
}
