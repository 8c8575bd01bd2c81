use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use reelcast::transcode::TranscodeOptions;

#[derive(Parser)]
#[command(name = "reelcast")]
#[command(author, version, about = "On-demand media transcoding for self-hosted media servers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a media file and stream the result
    Transcode {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        output: String,
    },

    /// Show the encoder invocation for a file without running it
    Plan {
        #[command(flatten)]
        source: SourceArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List supported output codecs
    Codecs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Purge expired users and idle sessions from an accounts file
    Purge {
        /// JSON file with "users" and "sessions"
        accounts: PathBuf,

        /// Report what would be purged without rewriting the file
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the purge job on its configured interval until interrupted
    Maintain {
        /// JSON file with "users" and "sessions"; rewritten on exit
        accounts: PathBuf,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, value_name = "SECS")]
        run_for: Option<u64>,
    },

    /// Display version information
    Version,
}

/// Source file and encode options shared by `transcode` and `plan`.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source media file
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output codec (x264, vp8, mp3, aac, vorbis, opus)
    #[arg(long)]
    pub codec: Option<String>,

    /// Quality tier (0-4)
    #[arg(short, long, default_value_t = 0)]
    pub quality: u32,

    /// Target width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Do not derive the missing dimension from the source aspect ratio
    #[arg(long)]
    pub no_aspect: bool,

    /// Start offset in seconds
    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Duration in seconds (0 = to the end)
    #[arg(long, default_value_t = 0)]
    pub length: u32,

    /// Stream the source unmodified
    #[arg(long)]
    pub direct: bool,
}

impl From<SourceArgs> for TranscodeOptions {
    fn from(args: SourceArgs) -> Self {
        Self {
            input: args.input,
            codec: args.codec,
            quality: args.quality,
            width: args.width,
            height: args.height,
            maintain_aspect: !args.no_aspect,
            offset_secs: args.offset,
            length_secs: args.length,
            direct: args.direct,
        }
    }
}
