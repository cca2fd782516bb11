//! Effective server configuration, layered the way the teacher's own
//! `config` module is: built-in defaults, an optional YAML file, then
//! CLI flags (each with a `MUSICD_*` environment-variable fallback via
//! clap's `.env(...)`, mirroring the teacher's `AUDIOSERVE_*` convention).

pub mod cli;

use std::{fs, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use self::cli::Args;

fn default_listen() -> SocketAddr {
    "0.0.0.0:3000".parse().expect("valid default listen address")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    pub base_dirs: Vec<PathBuf>,
    pub transcode_dir: PathBuf,
    /// Running-retention capacity `R`; zero disables transcoding entirely.
    pub max_transcodings: usize,
    /// Completed-retention capacity `C`.
    pub max_cached_transcodes: usize,
    pub ffmpeg_bin: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            base_dirs: Vec::new(),
            transcode_dir: std::env::temp_dir().join("musicd-transcode"),
            max_transcodings: 1,
            max_cached_transcodes: 20,
            ffmpeg_bin: "ffmpeg".to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Parses CLI flags, loads an optional YAML file under them, then lets
    /// explicitly-provided CLI/env flags win over the file.
    pub fn load() -> anyhow::Result<Config> {
        let args = Args::parse_args();

        let mut config = match &args.config_file {
            Some(path) => {
                let contents =
                    fs::read_to_string(path).with_context(|| format!("reading config file {:?}", path))?;
                serde_yaml::from_str(&contents).with_context(|| format!("parsing config file {:?}", path))?
            }
            None => Config::default(),
        };

        args.apply(&mut config);
        Ok(config)
    }
}
