// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Runner for legacy 32-bit COFF programs on Linux
//!
//! This crate provides the CLI interface: it finds the program, builds the
//! guest's view of its invocation, loads the image and enters it.

#![cfg(target_os = "linux")]

pub mod environ;
pub mod locate;
pub mod lock;

use std::ffi::OsString;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use retrocoff_platform_linux::entry::call_entry_point;
use retrocoff_platform_linux::{LinuxPlatform, WrapperTable, activate};
use retrocoff_shim::loader::coff::{CoffLoader, LoadedImage};
use retrocoff_shim::loader::memmap::Region;
use retrocoff_shim::tracing::{
    ApiCategory, FilterRule, TraceConfig, TraceEvent, TraceFilter, TraceFormat, TraceOutput,
    TracedDosApi, Tracer,
};
use thiserror::Error;

use crate::environ::{flatten_environment, join_args, legacy_program_name};
use crate::locate::{LaunchMode, ProgramLocator, fix_program_name, loader_directory};
use crate::lock::InvocationLock;

/// Name the runner binary is installed under
pub const RUNNER_NAME: &str = "retrocoff";

/// Legacy launcher name, accepted as an alias of the runner itself
pub const LAUNCHER_NAME: &str = "exew32.exe";

/// Setup failures that are not load errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("cannot determine the runner's directory: {0}")]
    LoaderDirectory(#[source] io::Error),

    #[error("{0}")]
    UnknownCategory(String),

    #[error("cannot open trace output: {0}")]
    TraceOutput(#[source] io::Error),
}

/// Run legacy 32-bit COFF programs on Linux
#[derive(Parser, Debug)]
#[command(name = RUNNER_NAME)]
#[command(about = "Run legacy 32-bit COFF programs on Linux", long_about = None)]
pub struct CliArgs {
    /// The program to run (".out" is appended when missing), then its
    /// arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        value_name = "PROGRAM [ARGS]",
        value_hint = clap::ValueHint::FilePath
    )]
    pub command: Vec<String>,

    /// Enable wrapper-call tracing
    #[arg(long)]
    pub trace: bool,

    /// Trace output format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub trace_format: String,

    /// Trace output file (default: stderr)
    #[arg(long)]
    pub trace_output: Option<PathBuf>,

    /// Filter traced wrappers by pattern (e.g., "*_file")
    #[arg(long)]
    pub trace_filter: Option<String>,

    /// Filter traced wrappers by comma-separated categories (memory,
    /// file_io, directory, process, time, system, loader)
    #[arg(long)]
    pub trace_category: Option<String>,

    /// Print the entry point and region map before starting the program
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not serialize with other runs
    #[arg(long)]
    pub no_lock: bool,

    /// Extra directory searched for programs, relative to the runner's
    /// directory
    #[arg(long, value_name = "DIR")]
    pub base_path: Option<PathBuf>,
}

impl CliArgs {
    /// Options for a run started through a link named after the program:
    /// everything after the link name belongs to the guest.
    pub fn for_alias(command: Vec<String>) -> Self {
        Self {
            command,
            trace: false,
            trace_format: "text".to_string(),
            trace_output: None,
            trace_filter: None,
            trace_category: None,
            verbose: false,
            no_lock: false,
            base_path: None,
        }
    }

    /// Program name as given, with `.out` appended when missing
    pub fn program(&self) -> String {
        self.command
            .first()
            .map(|name| fix_program_name(name))
            .unwrap_or_default()
    }

    /// Arguments for the guest
    pub fn guest_arguments(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// A parsed command line
#[derive(Debug)]
pub struct Invocation {
    /// Name the process was started under
    pub invoked_as: OsString,
    pub mode: LaunchMode,
    pub args: CliArgs,
}

impl Invocation {
    /// Parse a full command line, `argv[0]` included.
    ///
    /// Under the runner's own name (or the legacy launcher name) options are
    /// parsed and the first positional argument names the program. Under any
    /// other name the invoked name is the program and nothing is parsed.
    pub fn parse_from<I, T>(args: I) -> core::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let invoked_as = args.first().cloned().unwrap_or_default();
        let invoked_name = Path::new(&invoked_as)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        if invoked_name.is_empty() || invoked_name == RUNNER_NAME || invoked_name == LAUNCHER_NAME
        {
            let args = CliArgs::try_parse_from(args)?;
            return Ok(Self {
                invoked_as,
                mode: LaunchMode::Direct,
                args,
            });
        }

        let command = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        Ok(Self {
            invoked_as,
            mode: LaunchMode::Alias,
            args: CliArgs::for_alias(command),
        })
    }
}

/// Build the tracer selected on the command line.
pub fn build_tracer(cli_args: &CliArgs) -> Result<Tracer> {
    // Configure tracing
    let mut trace_config = if cli_args.trace {
        TraceConfig::enabled()
    } else {
        TraceConfig::default()
    };

    if cli_args.trace {
        trace_config = match cli_args.trace_format.as_str() {
            "json" => trace_config.with_format(TraceFormat::Json),
            _ => trace_config.with_format(TraceFormat::Text),
        };

        if let Some(output_file) = &cli_args.trace_output {
            trace_config = trace_config.with_output(TraceOutput::File(output_file.clone()));
        }
    }

    // Configure trace filter
    let mut trace_filter = TraceFilter::new();
    if let Some(pattern) = &cli_args.trace_filter {
        trace_filter = trace_filter.add_rule(FilterRule::Pattern(pattern.clone()));
    }
    if let Some(category_list) = &cli_args.trace_category {
        let categories = category_list
            .split(',')
            .map(|name| name.trim().parse::<ApiCategory>())
            .collect::<core::result::Result<Vec<_>, _>>()
            .map_err(RunnerError::UnknownCategory)?;
        trace_filter = trace_filter.add_rule(FilterRule::Category(categories));
    }

    Ok(Tracer::new(trace_config, trace_filter).map_err(RunnerError::TraceOutput)?)
}

/// One line per region: base, end, length and protection
pub fn describe_regions<'a>(regions: impl IntoIterator<Item = &'a Region>) -> Vec<String> {
    regions
        .into_iter()
        .map(|region| {
            format!(
                "0x{:08x}-0x{:08x} (0x{:x} bytes) {}",
                region.base,
                region.end(),
                region.length,
                if region.executable { "rwx" } else { "rw-" }
            )
        })
        .collect()
}

fn report_image(tracer: &Tracer, verbose: bool, image: &LoadedImage, regions: &[String]) {
    for section in &image.sections {
        tracer.trace(TraceEvent::loader("section").with_args(format!(
            "{} {:?} at 0x{:08x}, 0x{:x} bytes",
            section.name, section.kind, section.virtual_address, section.size
        )));
    }
    for region in regions {
        tracer.trace(TraceEvent::loader("region").with_args(region.clone()));
    }
    tracer.trace(TraceEvent::loader("entry").with_args(format!("0x{:08x}", image.entry_point)));

    if verbose {
        eprintln!("Entry point: 0x{:08x}", image.entry_point);
        eprintln!("Regions:");
        for region in regions {
            eprintln!("  {region}");
        }
    }
}

/// Load the program named by `invocation` and run it to completion.
pub fn run(invocation: Invocation) -> Result<()> {
    let Invocation {
        invoked_as,
        mode,
        args: cli_args,
    } = invocation;

    let tracer = Arc::new(build_tracer(&cli_args)?);

    // Find the program
    let loader_dir = loader_directory(&invoked_as).map_err(RunnerError::LoaderDirectory)?;
    let program_name = cli_args.program();
    let program = ProgramLocator::new(loader_dir)
        .with_base_path(cli_args.base_path.clone())
        .locate(&program_name, mode)?;
    tracer.trace(TraceEvent::loader("locate").with_args(program.path.display().to_string()));

    let lock = if cli_args.no_lock {
        None
    } else {
        InvocationLock::acquire()
    };

    // Initialize the session
    let environment = flatten_environment(std::env::vars_os());
    let arguments = join_args(cli_args.guest_arguments());
    let mut platform = LinuxPlatform::new(
        &legacy_program_name(&program.path),
        arguments.as_deref(),
        environment,
    )?;
    if let Some(lock) = lock {
        platform.add_teardown_hook(move || drop(lock));
    }

    // Map the image
    let image = CoffLoader::new(platform.memory_mut())
        .load(&program_name, &mut BufReader::new(program.file))?;
    let regions = describe_regions(platform.memory().regions());
    report_image(&tracer, cli_args.verbose, &image, &regions);

    // Run it
    let context = platform.context().as_ptr();
    let mut session = TracedDosApi::new(platform, Arc::clone(&tracer));
    let table = WrapperTable::new();
    {
        let _active = activate(&mut session);
        // SAFETY: every section of the image is mapped at its link address,
        // and the context block is owned by `session`, which outlives the
        // call.
        unsafe { call_entry_point(image.entry_point, &table, context) }?;
    }

    session.into_inner().shutdown();
    Ok(())
}
