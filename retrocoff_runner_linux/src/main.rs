// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! CLI entry point for the legacy COFF runner.

use retrocoff_runner_linux::{Invocation, run};
use retrocoff_shim::LoadError;

/// Exit code for failures that are not load errors
const SETUP_FAILURE: i32 = 1;

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<LoadError>()
        .map_or(SETUP_FAILURE, LoadError::exit_code)
}

fn main() {
    let invocation = match Invocation::parse_from(std::env::args_os()) {
        Ok(invocation) => invocation,
        Err(e) => e.exit(),
    };

    if let Err(error) = run(invocation) {
        eprintln!("{}: {error:#}", retrocoff_runner_linux::RUNNER_NAME);
        std::process::exit(exit_code(&error));
    }
}
