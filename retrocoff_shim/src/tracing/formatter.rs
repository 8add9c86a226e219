// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event formatters

use super::config::TraceConfig;
use super::event::{EventType, TraceEvent};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::SystemTime;

/// Renders one event as one line
pub trait TraceFormatter {
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()>;
}

fn unix_time(timestamp: SystemTime) -> (u64, u32) {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| (d.as_secs(), d.subsec_nanos()))
        .unwrap_or((0, 0))
}

/// Human-readable output
#[derive(Debug, Default)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl TraceFormatter for TextFormatter {
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let mut line = String::new();

        if config.include_timestamps {
            let (secs, nanos) = unix_time(event.timestamp);
            let _ = write!(line, "[{secs}.{:03}] ", nanos / 1_000_000);
        }

        if let Some(index) = event.index.filter(|_| config.include_index) {
            let _ = write!(line, "#{index:02} ");
        }

        let _ = write!(line, "{:<6} {}", event.event_type, event.function);

        match (&event.event_type, &event.args) {
            (EventType::Note, Some(args)) => {
                let _ = write!(line, ": {args}");
            }
            (_, Some(args)) => {
                let _ = write!(line, "({args})");
            }
            (EventType::Note, None) => {}
            (_, None) => line.push_str("()"),
        }

        if let Some(ret) = &event.return_value {
            let _ = write!(line, " -> {ret}");
        }

        writeln!(writer, "{line}")
    }
}

/// Machine-parseable output
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }

    fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out
    }
}

impl TraceFormatter for JsonFormatter {
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        write!(writer, "{{")?;

        if config.include_timestamps {
            let (secs, nanos) = unix_time(event.timestamp);
            write!(writer, "\"timestamp\":{secs}.{nanos:09},")?;
        }

        let kind = match event.event_type {
            EventType::Call => "call",
            EventType::Return => "return",
            EventType::Note => "load",
        };
        write!(writer, "\"event\":\"{kind}\",\"category\":\"{}\"", event.category)?;

        if let Some(index) = event.index.filter(|_| config.include_index) {
            write!(writer, ",\"index\":{index}")?;
        }

        write!(writer, ",\"function\":\"{}\"", Self::escape(&event.function))?;

        if let Some(args) = &event.args {
            write!(writer, ",\"args\":\"{}\"", Self::escape(args))?;
        }
        if let Some(ret) = &event.return_value {
            write!(writer, ",\"return\":\"{}\"", Self::escape(ret))?;
        }

        writeln!(writer, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::event::ApiCategory;

    fn render(formatter: &dyn TraceFormatter, event: &TraceEvent) -> String {
        let config = TraceConfig::default().with_timestamps(false);
        let mut output = Vec::new();
        formatter.format(event, &config, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_text_formatter() {
        let event = TraceEvent::call("open_file", ApiCategory::FileIo)
            .with_index(1)
            .with_args("path=\"FOO.C\", mode=0".to_string());
        assert_eq!(
            render(&TextFormatter::new(), &event),
            "#01 CALL   open_file(path=\"FOO.C\", mode=0)\n"
        );
    }

    #[test]
    fn test_text_formatter_loader_note() {
        let event = TraceEvent::loader("entry").with_args("0x10000".to_string());
        assert_eq!(render(&TextFormatter::new(), &event), "LOAD   entry: 0x10000\n");
    }

    #[test]
    fn test_json_formatter() {
        let event = TraceEvent::return_event("read", ApiCategory::FileIo)
            .with_index(4)
            .with_return_value("Ok(12)".to_string());
        let line = render(&JsonFormatter::new(), &event);
        assert!(line.contains("\"event\":\"return\""));
        assert!(line.contains("\"category\":\"file_io\""));
        assert!(line.contains("\"index\":4"));
        assert!(line.contains("\"return\":\"Ok(12)\""));
    }

    #[test]
    fn test_json_escape() {
        assert_eq!(JsonFormatter::escape("C:\\TMP"), "C:\\\\TMP");
        assert_eq!(JsonFormatter::escape("a\"b"), "a\\\"b");
        assert_eq!(JsonFormatter::escape("x\u{1}"), "x\\u0001");
    }
}
