//! Command-line flags, each with a `MUSICD_*` environment-variable
//! fallback - the teacher's `AUDIOSERVE_*` convention from the old
//! builder-style `config/cli.rs`, ported to clap 4's derive API.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use super::Config;

#[derive(Parser, Debug)]
#[command(name = "musicd", author, version, about = "Personal music streaming server")]
pub struct Args {
    /// Address and port to listen on
    #[arg(short, long, env = "MUSICD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Root directories containing the music collection
    #[arg(value_name = "BASE_DIR", required = true, num_args = 1.., value_delimiter = ':', env = "MUSICD_BASE_DIRS")]
    pub base_dirs: Vec<PathBuf>,

    /// Directory used for in-flight transcode output files
    #[arg(long, env = "MUSICD_TRANSCODE_DIR")]
    pub transcode_dir: Option<PathBuf>,

    /// Maximum number of concurrently running transcodes kept in the
    /// running-retention list (0 disables transcoding entirely)
    #[arg(short = 'x', long, env = "MUSICD_MAX_TRANSCODINGS")]
    pub max_transcodings: Option<usize>,

    /// Maximum number of finished transcodes kept around for reuse
    #[arg(long, env = "MUSICD_MAX_CACHED_TRANSCODES")]
    pub max_cached_transcodes: Option<usize>,

    /// Path to the ffmpeg binary
    #[arg(long, env = "MUSICD_FFMPEG")]
    pub ffmpeg_bin: Option<String>,

    /// Optional YAML config file, merged underneath CLI/env overrides
    #[arg(short, long, env = "MUSICD_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Enable debug logging (detailed logging config can still be done via
    /// the RUST_LOG environment variable)
    #[arg(short, long, env = "MUSICD_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Overlays flags the user actually provided onto `config`; anything
    /// left unset (and so anything only present in the YAML file) is left
    /// alone.
    pub fn apply(&self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if !self.base_dirs.is_empty() {
            config.base_dirs = self.base_dirs.clone();
        }
        if let Some(dir) = &self.transcode_dir {
            config.transcode_dir = dir.clone();
        }
        if let Some(r) = self.max_transcodings {
            config.max_transcodings = r;
        }
        if let Some(c) = self.max_cached_transcodes {
            config.max_cached_transcodes = c;
        }
        if let Some(bin) = &self.ffmpeg_bin {
            config.ffmpeg_bin = bin.clone();
        }
        config.debug = config.debug || self.debug;
    }
}
