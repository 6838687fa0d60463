pub mod commands;
pub mod error;

use std::process::ExitCode;

use crate::commands::{Command, GlobalOptions, Renderer};

/// Initialize tracing/logging with the given directives
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {:?}: {}", directive, e),
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one command to completion
pub fn run(command: Command, options: GlobalOptions) -> ExitCode {
    let renderer = Renderer::new(options.json);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(commands::execute(command, options)) {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            renderer.error(&e);
            ExitCode::FAILURE
        }
    }
}
