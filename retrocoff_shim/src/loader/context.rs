// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Execution context block
//!
//! The block is read by the guest at entry and by the wrappers while the
//! guest runs, so it has a fixed C layout and a stable address for the whole
//! session. [`ContextBlock`] owns the block together with the strings and the
//! error slot it points to.

use core::ffi::c_char;
use core::ptr::NonNull;
use std::ffi::{CStr, CString, NulError};

/// Layout shared with the guest.
///
/// Every field is pointer sized, which on the 32-bit target makes this six
/// consecutive 32-bit words.
#[repr(C)]
#[derive(Debug)]
pub struct ExecutionContext {
    /// Base of the guest heap
    pub heap_start: usize,
    /// Where wrappers store the legacy error code of a failed call
    pub error_slot: *mut i32,
    /// Legacy-style program name, `C:\...`
    pub program_name: *const c_char,
    /// Argument string, or null when the program got no arguments
    pub arguments: *const c_char,
    /// `KEY=VALUE\0...\0\0` environment block
    pub environment: *const c_char,
    /// Guest address of the directory transfer area, 0 until registered
    pub dta: usize,
}

/// Owner of the [`ExecutionContext`] and everything it references.
pub struct ContextBlock {
    context: NonNull<ExecutionContext>,
    error: NonNull<i32>,
    program_name: CString,
    arguments: Option<CString>,
    environment: Box<[u8]>,
}

impl ContextBlock {
    /// Build the block. `environment` is a flattened environment block; a
    /// terminating empty string is added if it is missing.
    pub fn new(
        heap_start: usize,
        program_name: &str,
        arguments: Option<&str>,
        environment: Vec<u8>,
    ) -> Result<Self, NulError> {
        let program_name = CString::new(program_name)?;
        let arguments = arguments.map(CString::new).transpose()?;

        let mut environment = environment;
        while !environment.ends_with(&[0, 0]) {
            environment.push(0);
        }
        let environment = environment.into_boxed_slice();

        let error = NonNull::from(Box::leak(Box::new(0i32)));
        let context = Box::new(ExecutionContext {
            heap_start,
            error_slot: error.as_ptr(),
            program_name: program_name.as_ptr(),
            arguments: arguments.as_ref().map_or(core::ptr::null(), |a| a.as_ptr()),
            environment: environment.as_ptr().cast(),
            dta: 0,
        });

        Ok(Self {
            context: NonNull::from(Box::leak(context)),
            error,
            program_name,
            arguments,
            environment,
        })
    }

    /// Address handed to the guest at entry
    pub fn as_ptr(&self) -> *mut ExecutionContext {
        self.context.as_ptr()
    }

    /// Record a legacy error code in the error slot.
    ///
    /// The guest may point `error_slot` at its own variable, so the pointer
    /// is re-read from the block on every call. A null slot drops the code.
    pub fn set_error(&self, code: i32) {
        let slot = self.error_slot();
        if !slot.is_null() {
            // SAFETY: the slot is either the one allocated in `new` or an
            // address the guest installed for this purpose.
            unsafe { slot.write_volatile(code) }
        }
    }

    /// Last legacy error code recorded, 0 when the slot is null
    pub fn error(&self) -> i32 {
        let slot = self.error_slot();
        if slot.is_null() {
            return 0;
        }
        // SAFETY: see `set_error`.
        unsafe { slot.read_volatile() }
    }

    fn error_slot(&self) -> *mut i32 {
        // SAFETY: see `set_dta`.
        unsafe { (&raw const (*self.context.as_ptr()).error_slot).read_volatile() }
    }

    /// Register the guest address of the directory transfer area.
    pub fn set_dta(&self, address: usize) {
        // SAFETY: `context` was leaked from a Box in `new` and is freed only
        // in `drop`. The guest may hold the same pointer, so the field is
        // accessed without forming a reference.
        unsafe { (&raw mut (*self.context.as_ptr()).dta).write_volatile(address) }
    }

    /// Registered directory transfer area, 0 if none
    pub fn dta(&self) -> usize {
        // SAFETY: see `set_dta`.
        unsafe { (&raw const (*self.context.as_ptr()).dta).read_volatile() }
    }

    /// Base of the guest heap
    pub fn heap_start(&self) -> usize {
        // SAFETY: see `set_dta`.
        unsafe { (&raw const (*self.context.as_ptr()).heap_start).read_volatile() }
    }

    pub fn program_name(&self) -> &CStr {
        &self.program_name
    }

    pub fn arguments(&self) -> Option<&CStr> {
        self.arguments.as_deref()
    }

    pub fn environment(&self) -> &[u8] {
        &self.environment
    }
}

impl Drop for ContextBlock {
    fn drop(&mut self) {
        // SAFETY: both pointers came from `Box::leak` in `new` and are not
        // used after this point.
        unsafe {
            drop(Box::from_raw(self.context.as_ptr()));
            drop(Box::from_raw(self.error.as_ptr()));
        }
    }
}

impl core::fmt::Debug for ContextBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContextBlock")
            .field("heap_start", &format_args!("0x{:x}", self.heap_start()))
            .field("program_name", &self.program_name)
            .field("arguments", &self.arguments)
            .field("dta", &format_args!("0x{:x}", self.dta()))
            .field("error", &self.error())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_six_words() {
        assert_eq!(
            core::mem::size_of::<ExecutionContext>(),
            6 * core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_pointers_reference_owned_strings() {
        let block = ContextBlock::new(0x0100_0000, "C:\\tmp\\cc1.out", Some("-O2 x.c"), b"A=1\0".to_vec())
            .unwrap();
        // SAFETY: the block is alive for the whole test.
        let ctx = unsafe { &*block.as_ptr() };
        assert_eq!(ctx.heap_start, 0x0100_0000);
        // SAFETY: as above.
        let name = unsafe { CStr::from_ptr(ctx.program_name) };
        assert_eq!(name.to_str().unwrap(), "C:\\tmp\\cc1.out");
        // SAFETY: as above.
        let args = unsafe { CStr::from_ptr(ctx.arguments) };
        assert_eq!(args.to_str().unwrap(), "-O2 x.c");
        assert_eq!(block.environment(), b"A=1\0\0");
    }

    #[test]
    fn test_missing_arguments_are_null() {
        let block = ContextBlock::new(0, "C:\\a.out", None, Vec::new()).unwrap();
        // SAFETY: the block is alive for the whole test.
        let ctx = unsafe { &*block.as_ptr() };
        assert!(ctx.arguments.is_null());
        assert_eq!(block.environment(), &[0, 0]);
    }

    #[test]
    fn test_error_slot_and_dta() {
        let block = ContextBlock::new(0, "C:\\a.out", None, Vec::new()).unwrap();
        block.set_error(2);
        // SAFETY: the slot is owned by the live block.
        assert_eq!(unsafe { *(*block.as_ptr()).error_slot }, 2);
        assert_eq!(block.error(), 2);

        block.set_dta(0x2_0040);
        assert_eq!(block.dta(), 0x2_0040);
    }

    #[test]
    fn test_error_follows_installed_slot() {
        let block = ContextBlock::new(0, "C:\\a.out", None, Vec::new()).unwrap();
        let mut guest_errno = 0i32;
        // SAFETY: the block is alive and `guest_errno` outlives every use.
        unsafe { (*block.as_ptr()).error_slot = &raw mut guest_errno };

        block.set_error(2);
        assert_eq!(block.error(), 2);
        // SAFETY: the block no longer writes once the slot is reset below.
        assert_eq!(unsafe { (&raw const guest_errno).read_volatile() }, 2);

        // SAFETY: as above.
        unsafe { (*block.as_ptr()).error_slot = core::ptr::null_mut() };
        block.set_error(5);
        assert_eq!(block.error(), 0);
    }
}
