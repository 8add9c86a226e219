// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! COFF image loading
//!
//! Parsing and placement of a legacy COFF executable, plus the execution
//! context block handed to the program at entry.

pub mod coff;
pub mod context;
pub mod memmap;

pub use coff::{CoffLoader, LoadedImage};
pub use context::{ContextBlock, ExecutionContext};
pub use memmap::{Mapper, RegionMap};
