use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use timefree_engine::ConcatMode;

#[derive(Parser, Debug)]
#[command(
    name = "timefree",
    version,
    about = "Download a past radio program from its time-free page reference",
    long_about = None
)]
pub struct Args {
    /// Program page reference, e.g. https://radiko.jp/#!/ts/TBS/20240101120000
    #[arg(required_unless_present_all = ["station", "start"], conflicts_with_all = ["station", "start"])]
    pub reference: Option<String>,

    /// Station id, used with --start instead of a page reference
    #[arg(long, requires = "start")]
    pub station: Option<String>,

    /// Program start as YYYYMMDDhhmmss, used with --station
    #[arg(long, requires = "station")]
    pub start: Option<String>,

    /// Output file (default: <title>_<station>_<start>.<ext> in the output directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output directory when no explicit output file is given
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Directory holding downloaded segments (default: a per-program directory under the output directory)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Configuration file (default: <config dir>/timefree/config.toml)
    #[arg(short, long, env = "TIMEFREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of seeked sessions run concurrently per batch
    #[arg(long)]
    pub download_rate: Option<usize>,

    /// Program time between two seek checkpoints, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub checkpoint_interval: Option<u64>,

    /// Download with one real-time session instead of parallel seeked sessions
    #[arg(long)]
    pub no_accelerate: bool,

    /// How segments are joined into the output file
    #[arg(long, value_enum)]
    pub concat: Option<ConcatArg>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Keep segment files after assembly
    #[arg(long)]
    pub keep_segments: bool,

    /// Fail when any segment could not be downloaded
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatArg {
    /// ffmpeg concat demuxer with stream copy (.m4a)
    Ffmpeg,
    /// Plain byte concatenation of ADTS segments (.aac), no ffmpeg needed
    Binary,
}

impl From<ConcatArg> for ConcatMode {
    fn from(value: ConcatArg) -> Self {
        match value {
            ConcatArg::Ffmpeg => ConcatMode::Ffmpeg,
            ConcatArg::Binary => ConcatMode::Binary,
        }
    }
}
