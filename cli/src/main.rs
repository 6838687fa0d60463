use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use covenant_lib::commands::{Command, GlobalOptions};

#[derive(Parser, Debug)]
#[command(name = "covenant")]
#[command(about = "Drive contract analysis workflows on the Covenant service")]
struct Args {
    /// Service base URL (overrides settings and COVENANT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token (overrides settings and COVENANT_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Print events and results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let directives: &[&str] = if args.verbose {
        &["covenant=debug"]
    } else {
        &["covenant=info"]
    };
    covenant_lib::init_logging(directives);

    covenant_lib::run(
        args.command,
        GlobalOptions {
            api_url: args.api_url,
            token: args.token,
            json: args.json,
            config_dir: args.config_dir,
        },
    )
}
