// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Main tracer component

use super::{
    config::{TraceConfig, TraceFormat, TraceOutput},
    event::TraceEvent,
    filter::TraceFilter,
    formatter::{JsonFormatter, TextFormatter, TraceFormatter},
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

/// Formats accepted events and writes them to the configured sink
pub struct Tracer {
    config: TraceConfig,
    filter: TraceFilter,
    writer: Mutex<Box<dyn Write + Send>>,
    formatter: Box<dyn TraceFormatter + Send + Sync>,
}

impl Tracer {
    /// Create a tracer. Opening the output file is the only failure.
    pub fn new(config: TraceConfig, filter: TraceFilter) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match &config.output {
            TraceOutput::Stderr => Box::new(io::stderr()),
            TraceOutput::Stdout => Box::new(io::stdout()),
            TraceOutput::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        };
        Ok(Self::with_writer(config, filter, writer))
    }

    /// Create a tracer writing to an arbitrary sink
    pub fn with_writer(
        config: TraceConfig,
        filter: TraceFilter,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        let formatter: Box<dyn TraceFormatter + Send + Sync> = match config.format {
            TraceFormat::Text => Box::new(TextFormatter::new()),
            TraceFormat::Json => Box::new(JsonFormatter::new()),
        };
        Self {
            config,
            filter,
            writer: Mutex::new(writer),
            formatter,
        }
    }

    /// A tracer that drops every event
    pub fn disabled() -> Self {
        Self::with_writer(
            TraceConfig::default(),
            TraceFilter::default(),
            Box::new(io::sink()),
        )
    }

    pub fn trace(&self, event: TraceEvent) {
        if !self.config.enabled || !self.filter.should_trace(&event) {
            return;
        }

        // Trace output must never take the program down.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = self.formatter.format(&event, &self.config, &mut *writer);
            let _ = writer.flush();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::event::ApiCategory;
    use crate::tracing::filter::FilterRule;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracer_disabled() {
        let buffer = SharedBuffer::default();
        let tracer = Tracer::with_writer(
            TraceConfig::default(),
            TraceFilter::default(),
            Box::new(buffer.clone()),
        );
        assert!(!tracer.is_enabled());
        tracer.trace(TraceEvent::call("read", ApiCategory::FileIo));
        assert!(buffer.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tracer_applies_filter() {
        let buffer = SharedBuffer::default();
        let tracer = Tracer::with_writer(
            TraceConfig::enabled().with_timestamps(false),
            TraceFilter::new().add_rule(FilterRule::Category(vec![ApiCategory::Process])),
            Box::new(buffer.clone()),
        );
        tracer.trace(TraceEvent::call("read", ApiCategory::FileIo));
        tracer.trace(TraceEvent::call("spawn", ApiCategory::Process));

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("spawn"));
    }

    #[test]
    fn test_file_output() {
        let path = std::env::temp_dir().join(format!("retrocoff_trace_{}.log", std::process::id()));
        let config = TraceConfig::enabled().with_output(TraceOutput::File(path.clone()));
        let tracer = Tracer::new(config, TraceFilter::default()).unwrap();
        tracer.trace(TraceEvent::loader("entry"));
        drop(tracer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("entry"));
        let _ = std::fs::remove_file(&path);
    }
}
