use std::{process, sync::Arc};

use log::{error, info, warn};

mod config;
mod dispatch;
mod error;
mod file_sender;
mod library;
mod range;
mod response;
mod server;
mod transcode;

use config::Config;
use dispatch::Dispatch;
use library::Library;
use server::HttpServer;
use transcode::cache::{CacheLimits, TranscoderCache};

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            process::exit(1);
        }
    };

    let mut builder = env_logger::Builder::from_default_env();
    if config.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    info!("starting with base dirs {:?}", config.base_dirs);

    let bound = match HttpServer::new(config.listen).bind().await {
        Ok(b) => b,
        Err(e) => {
            error!("could not bind {}: {}", config.listen, e);
            process::exit(2);
        }
    };

    // Only safe to purge once the bind above succeeded - see
    // `HttpServer::bind`'s doc comment.
    if let Err(e) = purge_stale_transcodes(&config.transcode_dir).await {
        warn!("could not purge stale transcode files: {}", e);
    }

    let library = Library::scan(&config.base_dirs);
    let cache = Arc::new(TranscoderCache::new(CacheLimits {
        running: config.max_transcodings,
        completed: config.max_cached_transcodes,
    }));
    let dispatch = Arc::new(Dispatch {
        library,
        cache,
        transcode_dir: config.transcode_dir.clone(),
        ffmpeg_bin: config.ffmpeg_bin.clone(),
        transcoding_enabled: config.max_transcodings > 0,
    });

    if let Err(e) = bound.serve(dispatch).await {
        error!("server error: {}", e);
        process::exit(3);
    }
}

async fn purge_stale_transcodes(dir: &std::path::Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("TRANSCODE_") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("could not remove stale transcode file {:?}: {}", entry.path(), e);
            }
        }
    }
    Ok(())
}
