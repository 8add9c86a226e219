// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Raw access to guest memory
//!
//! The guest shares the host's address space, so its pointers are plain
//! addresses. Every function here trusts the guest to pass pointers that are
//! valid for the stated length; nothing is checked beyond null.

use core::ffi::{CStr, c_char};

use zerocopy::{Immutable, IntoBytes};

/// NUL-terminated guest string as bytes, or `None` for a null pointer
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// and unmodified for `'a`.
pub unsafe fn cstr_bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
}

/// NUL-terminated guest string, decoded lossily
///
/// # Safety
/// Same as [`cstr_bytes`].
pub unsafe fn read_string(ptr: *const c_char) -> Option<String> {
    // SAFETY: guaranteed by the caller.
    unsafe { cstr_bytes(ptr) }.map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

/// Strings of a `KEY=VALUE\0...\0\0` block, in order
///
/// # Safety
/// `ptr` must be null or point to a block terminated by an empty string.
pub unsafe fn read_env_block(ptr: *const c_char) -> Vec<Vec<u8>> {
    let mut entries = Vec::new();
    let mut cursor = ptr;
    // SAFETY: each string lies inside the block, which ends with an empty
    // string, so `cursor` never moves past the terminator.
    while let Some(entry) = unsafe { cstr_bytes(cursor) } {
        if entry.is_empty() {
            break;
        }
        entries.push(entry.to_vec());
        cursor = unsafe { cursor.add(entry.len() + 1) };
    }
    entries
}

/// Guest buffer as a byte slice; empty for a null pointer
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes for `'a`.
pub unsafe fn slice<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        return &[];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { core::slice::from_raw_parts(ptr, len) }
}

/// Guest buffer as a mutable byte slice; empty for a null pointer
///
/// # Safety
/// `ptr` must be null or valid for writes of `len` bytes for `'a`, with no
/// other live reference to that memory.
pub unsafe fn slice_mut<'a>(ptr: *mut u8, len: usize) -> &'a mut [u8] {
    if ptr.is_null() || len == 0 {
        return &mut [];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { core::slice::from_raw_parts_mut(ptr, len) }
}

/// Copy the bytes of `value` to `ptr`. Returns `false` for a null pointer.
///
/// # Safety
/// `ptr` must be null or valid for writes of `size_of::<T>()` bytes. No
/// alignment is required.
pub unsafe fn write_value<T: IntoBytes + Immutable>(ptr: *mut u8, value: &T) -> bool {
    let bytes = value.as_bytes();
    // SAFETY: guaranteed by the caller.
    let target = unsafe { slice_mut(ptr, bytes.len()) };
    if target.len() != bytes.len() {
        return false;
    }
    target.copy_from_slice(bytes);
    true
}

/// Copy `bytes` and a terminating NUL to `ptr`.
///
/// # Safety
/// `ptr` must be valid for writes of `bytes.len() + 1` bytes.
pub unsafe fn write_cstr(ptr: *mut c_char, bytes: &[u8]) {
    // SAFETY: guaranteed by the caller.
    let target = unsafe { slice_mut(ptr.cast(), bytes.len() + 1) };
    if let Some((last, body)) = target.split_last_mut() {
        body.copy_from_slice(bytes);
        *last = 0;
    }
}
