//! `sam` command-line entry point.
//!
//! Operator-facing commands only; the conversational front-ends live
//! outside this crate. Currently exposes plugin trust management:
//!
//! ```text
//! sam plugins trust <module> [--entry-point <name>] [--label <text>]
//! ```

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sam", about = "SAM agent middleware operator commands")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plugin trust management.
    Plugins {
        #[command(subcommand)]
        action: PluginsAction,
    },
}

#[derive(Subcommand)]
enum PluginsAction {
    /// Compute a module's digest and pin it in the allowlist.
    Trust {
        /// Path to the plugin library.
        module: String,
        /// Also pin this entry-point name to the module.
        #[arg(long)]
        entry_point: Option<String>,
        /// Free-form note stored alongside the rule.
        #[arg(long)]
        label: Option<String>,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Plugins { action } => match action {
            PluginsAction::Trust {
                module,
                entry_point,
                label,
            } => sam::commands::trust_plugin(&module, entry_point.as_deref(), label.as_deref()),
        },
    };
    std::process::exit(code);
}
