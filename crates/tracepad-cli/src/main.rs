//! tracepad CLI - run Rust scripts with live statement tracing.

mod colors;
mod instrument;
mod run;
mod toolchains;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tracepad")]
#[command(about = "Run Rust scripts with live statement tracing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore dependencies, compile and run a script
    Run {
        /// Path to the script (.rs file)
        script: PathBuf,

        /// Toolchain moniker (e.g. `stable`, `nightly`)
        #[arg(long)]
        toolchain: Option<String>,

        /// Instrument the script and report every executed statement
        #[arg(long)]
        trace: bool,

        /// Build with optimizations
        #[arg(long)]
        release: bool,
    },

    /// Print the instrumented form of a script
    Instrument {
        /// Path to the script (.rs file)
        script: PathBuf,

        /// Print the complete generated crate root instead
        #[arg(long)]
        harness: bool,
    },

    /// List installed toolchains, preferred first
    Toolchains {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            script,
            toolchain,
            trace,
            release,
        } => {
            let code = run::execute(&script, toolchain.as_deref(), trace, release).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Instrument { script, harness } => instrument::execute(&script, harness)?,

        Commands::Toolchains { json } => toolchains::execute(json)?,
    }

    Ok(())
}
