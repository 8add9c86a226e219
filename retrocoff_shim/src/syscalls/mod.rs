// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wrapper table ABI
//!
//! Service interface, wrapper indices, and the guest-visible records the
//! wrappers fill in.

pub mod dos;
pub mod dta;
pub mod table;

pub use dos::{DosApi, DosError, DosResult};
pub use dta::{DTA_SIZE, DirectoryEntry};
pub use table::{WRAPPER_COUNT, WrapperIndex};
