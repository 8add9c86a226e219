// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event definitions

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Category of a traced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCategory {
    /// Heap growth and region placement
    Memory,
    /// Descriptor based file operations
    FileIo,
    /// Directory search and working directory
    Directory,
    /// Spawn, exit status and exit
    Process,
    /// Timestamps and sleeping
    Time,
    /// Version and reserved entries
    System,
    /// Image loading milestones
    Loader,
}

impl ApiCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiCategory::Memory => "memory",
            ApiCategory::FileIo => "file_io",
            ApiCategory::Directory => "directory",
            ApiCategory::Process => "process",
            ApiCategory::Time => "time",
            ApiCategory::System => "system",
            ApiCategory::Loader => "loader",
        }
    }
}

impl fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(ApiCategory::Memory),
            "file_io" | "file" => Ok(ApiCategory::FileIo),
            "directory" | "dir" => Ok(ApiCategory::Directory),
            "process" => Ok(ApiCategory::Process),
            "time" => Ok(ApiCategory::Time),
            "system" => Ok(ApiCategory::System),
            "loader" => Ok(ApiCategory::Loader),
            other => Err(format!("unknown trace category: {other}")),
        }
    }
}

/// Trace event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Call,
    Return,
    /// A loader milestone with no matching return
    Note,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Call => write!(f, "CALL"),
            EventType::Return => write!(f, "RETURN"),
            EventType::Note => write!(f, "LOAD"),
        }
    }
}

/// A traced event
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub timestamp: SystemTime,
    pub event_type: EventType,
    pub category: ApiCategory,
    /// Wrapper table index, for wrapper events
    pub index: Option<usize>,
    pub function: String,
    pub args: Option<String>,
    pub return_value: Option<String>,
}

impl TraceEvent {
    fn new(event_type: EventType, function: &str, category: ApiCategory) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            category,
            index: None,
            function: function.to_string(),
            args: None,
            return_value: None,
        }
    }

    /// Create a call event
    pub fn call(function: &str, category: ApiCategory) -> Self {
        Self::new(EventType::Call, function, category)
    }

    /// Create a return event
    pub fn return_event(function: &str, category: ApiCategory) -> Self {
        Self::new(EventType::Return, function, category)
    }

    /// Create a loader milestone event
    pub fn loader(step: &str) -> Self {
        Self::new(EventType::Note, step, ApiCategory::Loader)
    }

    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: String) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn with_return_value(mut self, return_value: String) -> Self {
        self.return_value = Some(return_value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_through_names() {
        for category in [
            ApiCategory::Memory,
            ApiCategory::FileIo,
            ApiCategory::Directory,
            ApiCategory::Process,
            ApiCategory::Time,
            ApiCategory::System,
            ApiCategory::Loader,
        ] {
            assert_eq!(category.as_str().parse::<ApiCategory>(), Ok(category));
        }
        assert!("registry".parse::<ApiCategory>().is_err());
    }

    #[test]
    fn test_loader_event() {
        let event = TraceEvent::loader("entry").with_args("0x10000".into());
        assert_eq!(event.event_type, EventType::Note);
        assert_eq!(event.category, ApiCategory::Loader);
        assert!(event.index.is_none());
    }
}
