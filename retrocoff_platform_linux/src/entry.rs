// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Transfer of control into loaded code
//!
//! The image's entry routine takes two sentinel words in `eax` and `edx`
//! and, on the stack, the wrapper table followed by the execution context.
//! This is the only place where the host calls into guest code.

use retrocoff_shim::loader::context::ExecutionContext;
#[cfg(target_arch = "x86")]
use retrocoff_shim::syscalls::table::{ENTRY_SENTINEL_HIGH, ENTRY_SENTINEL_LOW};

use crate::thunks::WrapperTable;
#[cfg(not(target_arch = "x86"))]
use crate::PlatformError;
use crate::Result;

/// Call the entry routine at `entry_point` and return when it does.
///
/// Wrapper calls made by the guest go to whichever session was made active
/// with [`crate::thunks::activate`].
///
/// # Safety
/// `entry_point` must be the entry of a fully loaded image, and `context`
/// must stay valid for as long as the guest runs. The guest executes with
/// the host's privileges and stack.
#[cfg(target_arch = "x86")]
pub unsafe fn call_entry_point(
    entry_point: usize,
    table: &WrapperTable,
    context: *mut ExecutionContext,
) -> Result<()> {
    // SAFETY: guaranteed by the caller. The guest follows the C convention
    // for everything it does not receive in registers, so the C clobber set
    // covers it; the caller pops the two stack arguments.
    unsafe {
        core::arch::asm!(
            "push eax",
            "push edi",
            "mov eax, {low}",
            "mov edx, {high}",
            "call ecx",
            "add esp, 8",
            low = const ENTRY_SENTINEL_LOW,
            high = const ENTRY_SENTINEL_HIGH,
            in("ecx") entry_point,
            in("edi") table.as_ptr(),
            in("eax") context,
            clobber_abi("C"),
        );
    }
    Ok(())
}

/// Loaded code is 32-bit x86; other hosts can load and inspect an image but
/// not run it.
///
/// # Safety
/// Always safe to call; it never enters guest code.
#[cfg(not(target_arch = "x86"))]
pub unsafe fn call_entry_point(
    _entry_point: usize,
    _table: &WrapperTable,
    _context: *mut ExecutionContext,
) -> Result<()> {
    Err(PlatformError::UnsupportedArchitecture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_arch = "x86"))]
    fn test_foreign_host_refuses_entry() {
        let table = WrapperTable::new();
        let result = unsafe { call_entry_point(0x10000, &table, core::ptr::null_mut()) };
        assert!(matches!(result, Err(PlatformError::UnsupportedArchitecture)));
    }
}
