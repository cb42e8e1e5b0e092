use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Find catalog items that look like a photo", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the catalog for items resembling a photo.
    /// The photo is deleted once the search finishes.
    Search {
        /// Uploaded photo
        #[clap(short, long)]
        upload: PathBuf,

        /// JSON file with [{"id": 1, "imagePath": "..."}, ...]
        #[clap(short, long)]
        corpus: PathBuf,

        /// Also print which strategy produced the answer
        #[clap(long, default_value = "false")]
        detailed: bool,
    },

    /// Print the perceptual hash of an image.
    Hash {
        path: PathBuf,
    },

    /// Compare two images with both strategies.
    /// Useful for calibrating thresholds on your own catalog.
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
}
