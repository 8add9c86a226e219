// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing configuration

use std::path::PathBuf;

/// Trace output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// One line of text per event
    Text,
    /// One JSON object per line
    Json,
}

/// Where trace lines go
#[derive(Debug, Clone)]
pub enum TraceOutput {
    /// Standard error, kept apart from the program's own output
    Stderr,
    Stdout,
    File(PathBuf),
}

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Whether tracing is enabled
    pub enabled: bool,
    pub format: TraceFormat,
    pub output: TraceOutput,
    /// Prefix events with a Unix timestamp
    pub include_timestamps: bool,
    /// Show the wrapper table index of wrapper events
    pub include_index: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: TraceFormat::Text,
            output: TraceOutput::Stderr,
            include_timestamps: true,
            include_index: true,
        }
    }
}

impl TraceConfig {
    /// Configuration with tracing switched on
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: TraceFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TraceOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, enable: bool) -> Self {
        self.include_timestamps = enable;
        self
    }

    #[must_use]
    pub fn with_index(mut self, enable: bool) -> Self {
        self.include_index = enable;
        self
    }
}
