// tally-cli: Operator tool entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tally_config::{load_config, parse_override, Override};
use tally_service::init_logging;

mod commands;
mod progress;

#[derive(Parser)]
#[command(name = "tally", about = "Operator tool for the tally accumulator")]
struct Cli {
    /// Load a config file (repeatable, later files win)
    #[arg(short = 'f', long = "config", value_name = "FILENAME", required = true)]
    config: Vec<PathBuf>,

    /// Set a config option
    #[arg(short = 'c', long = "set", value_name = "SECTION.KEY=VALUE")]
    set: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy the stored snapshot blob to stdout
    Export { sitename: String },

    /// Print the stored snapshot to stdout as JSON
    ExportJson { sitename: String },

    /// Copy stored rows to stdout as JSON lines
    ExportHistory { sitename: String },

    /// Copy one object's row to stdout as a JSON line
    ExportObjectHistory { sitename: String, objkey: String },

    /// Print one object's row in human-readable form
    PrintObjectHistory { sitename: String, objkey: String },

    /// Print a local snapshot file to stdout as JSON
    ConvertToJson { filename: PathBuf },

    /// Store a snapshot file back: as the snapshot while its interval is
    /// still open, directly to the data store otherwise
    Restore {
        #[arg(long)]
        force: bool,
        filename: PathBuf,
        sitename: String,
    },

    /// Store exported JSON-line rows back
    RestoreHistory {
        #[arg(long)]
        force: bool,
        sitename: String,
        filename: PathBuf,
    },

    /// Replace the stored snapshot with an empty one
    Reset {
        #[arg(long)]
        force: bool,
        sitename: String,
    },

    /// Merge stored day slots into month slots by the configured patterns
    MergeHistory {
        /// Apply the planned mutations instead of a dry run
        #[arg(long)]
        store: bool,

        /// Print the planned mutations to stdout
        #[arg(long)]
        dump: bool,

        sitename: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides: Vec<Override> = cli
        .set
        .iter()
        .map(|arg| parse_override(arg))
        .collect::<Result<_, _>>()?;

    let config = load_config(&cli.config, &overrides)?;
    config.validate()?;

    let _log_handle = init_logging(&config.logging.filter).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Export { sitename } => commands::export(&config, &sitename),
        Command::ExportJson { sitename } => commands::export_json(&config, &sitename),
        Command::ExportHistory { sitename } => commands::export_history(&config, &sitename),
        Command::ExportObjectHistory { sitename, objkey } => {
            commands::export_object_history(&config, &sitename, &objkey)
        }
        Command::PrintObjectHistory { sitename, objkey } => {
            commands::print_object_history(&config, &sitename, &objkey)
        }
        Command::ConvertToJson { filename } => commands::convert_to_json(&config, &filename),
        Command::Restore {
            force,
            filename,
            sitename,
        } => {
            commands::check_force(force)?;
            commands::restore(&config, &filename, &sitename)
        }
        Command::RestoreHistory {
            force,
            sitename,
            filename,
        } => {
            commands::check_force(force)?;
            commands::restore_history(&config, &sitename, &filename)
        }
        Command::Reset { force, sitename } => {
            commands::check_force(force)?;
            commands::reset(&config, &sitename)
        }
        Command::MergeHistory {
            store,
            dump,
            sitename,
        } => commands::merge_history(&config, &sitename, store, dump),
    }
}
