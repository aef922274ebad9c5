use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Store images once by content and serve resized or cropped derivatives.
#[derive(Debug, Parser)]
#[command(name = "imgstore", version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON), layered over the per-user
    /// default and under `IMGSTORE_*` variables.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More output; repeat for more. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store an image and print its metadata as JSON.
    Upload {
        file: PathBuf,
        /// Transport error code; anything but zero rejects the upload.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        code: i32,
    },
    /// Print the public locator of a derivative, generating it if needed.
    Link(RequestArgs),
    /// Write a derivative's bytes to a file or stdout.
    Fetch {
        #[command(flatten)]
        request: RequestArgs,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Exit successfully only if the original is stored.
    Exists {
        /// Metadata JSON file as printed by `upload`, or `-` for stdin.
        meta: String,
    },
    /// Delete a stored original.
    Remove {
        /// Metadata JSON file as printed by `upload`, or `-` for stdin.
        meta: String,
    },
    /// Store a rotated copy of an original and print its metadata.
    Rotate {
        /// Metadata JSON file as printed by `upload`, or `-` for stdin.
        meta: String,
        /// Clockwise, in multiples of 90.
        #[arg(short, long, allow_negative_numbers = true)]
        degrees: i32,
    },
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// Metadata JSON file as printed by `upload`, or `-` for stdin.
    pub meta: String,
    /// `original`, `N` for an NxN square, or `WxH`.
    #[arg(short, long, default_value = "original")]
    pub size: String,
    /// `original` or a resize mode bitmask (1 shrink-only, 2 stretch, 4 fill, 8 exact).
    #[arg(short, long, default_value = "original")]
    pub flags: String,
    /// Fill the target size exactly, cutting off the overflow.
    #[arg(long)]
    pub crop: bool,
}
