//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Download course material with its companion files.
///
/// A download is one primary file plus optional secondary files (thumbnail,
/// subtitles) that are started, deleted and reported together.
#[derive(Parser, Debug)]
#[command(name = "course-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/course-downloader/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a file and its secondaries, showing progress
    ///
    /// Example:
    ///   course-downloader fetch https://cdn.example.com/v.mp4 --secondary https://cdn.example.com/en.vtt
    Fetch {
        #[command(flatten)]
        target: TargetArgs,

        /// Declared size in bytes, used until the server reports one
        #[arg(long, value_name = "BYTES", default_value_t = 0)]
        size: u64,

        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a downloaded file and its secondaries
    Delete {
        #[command(flatten)]
        target: TargetArgs,

        /// Keep secondary files on disk
        #[arg(long)]
        keep_secondaries: bool,
    },

    /// Print the path of a downloaded file
    Locate {
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Identifies the item a command works on.
#[derive(ClapArgs, Debug, Clone)]
pub struct TargetArgs {
    /// Source URL of the primary file
    pub url: String,

    /// File name (default: derived from the URL)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Folder below the storage root, `/`-separated
    #[arg(short, long, default_value = "")]
    pub folder: String,

    /// Source URL of a secondary file (repeatable)
    #[arg(short, long = "secondary", value_name = "URL")]
    pub secondaries: Vec<String>,
}
