// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wrapper-call tracing
//!
//! Configurable tracing of the calls a loaded program makes through the
//! wrapper table, plus loader milestones, for debugging legacy binaries.

pub mod config;
pub mod event;
pub mod filter;
pub mod formatter;
pub mod tracer;
pub mod wrapper;

pub use config::{TraceConfig, TraceFormat, TraceOutput};
pub use event::{ApiCategory, EventType, TraceEvent};
pub use filter::{FilterRule, TraceFilter};
pub use formatter::{JsonFormatter, TextFormatter, TraceFormatter};
pub use tracer::Tracer;
pub use wrapper::TracedDosApi;
