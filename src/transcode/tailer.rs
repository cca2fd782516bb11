//! Streams a transcode's output file while the child producing it may still
//! be running - the "Chunked Tailer". Grounded on the teacher's
//! `services::response::ChunkStream` (read-fixed-blocks-via-`AsyncRead`
//! shape) and on `original_source/munic.py`'s tailing loop, which this keeps
//! the exact timings and chunk-size schedule of: 1s head start, 128 KiB
//! first chunk, 64 KiB while running, 128 KiB once finished, 500ms backoff
//! poll when starved.

use std::{path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::stream;
use headers::{ContentType, HeaderMapExt};
use http::{Response, StatusCode};
use log::{debug, error};
use tokio::io::AsyncReadExt;
use tokio::time::sleep;

use super::{cache::TranscoderCache, mime_for_extension, TranscodeState, Transcoder};
use crate::{
    error::Result,
    response::{self, HttpResponse},
};

const FIRST_CHUNK: usize = 128 * 1024;
const RUNNING_CHUNK: usize = 64 * 1024;
const FINISHED_CHUNK: usize = 128 * 1024;
const STARVED_BACKOFF: Duration = Duration::from_millis(500);
const HEAD_START: Duration = Duration::from_secs(1);

struct TailState {
    file: tokio::fs::File,
    read_pos: u64,
    first_chunk: bool,
    sent: u64,
    transcoder: Arc<Transcoder>,
    cache: Arc<TranscoderCache>,
    path: PathBuf,
    completed: bool,
}

impl Drop for TailState {
    /// Runs on every exit from the tailing loop - graceful EOF, client
    /// disconnect (the stream is simply dropped by the connection driver),
    /// or a read error. The Transcoder may have finished Running while this
    /// request held it, so it needs a fresh `touch()` regardless of how we
    /// got here.
    fn drop(&mut self) {
        self.cache.touch(&self.transcoder);
        if !self.completed {
            debug!(
                "client disconnected after {} bytes tailing {:?}",
                self.sent, self.path
            );
        }
    }
}

async fn next_chunk(mut state: TailState) -> Option<(std::io::Result<Bytes>, TailState)> {
    loop {
        let want = if state.first_chunk {
            FIRST_CHUNK
        } else if state.transcoder.state() == TranscodeState::Running {
            RUNNING_CHUNK
        } else {
            FINISHED_CHUNK
        };

        let len = match state.file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("error reading metadata of {:?}: {}", state.path, e);
                return None;
            }
        };
        let remaining = len.saturating_sub(state.read_pos);
        let finished = state.transcoder.state() == TranscodeState::Finished;

        if remaining as usize >= want {
            return Some(read_block(state, want).await);
        }
        if !finished {
            sleep(STARVED_BACKOFF).await;
            continue;
        }
        if remaining > 0 {
            return Some(read_block(state, remaining as usize).await);
        }
        state.completed = true;
        return None;
    }
}

async fn read_block(mut state: TailState, len: usize) -> (std::io::Result<Bytes>, TailState) {
    let mut buf = vec![0u8; len];
    match state.file.read_exact(&mut buf).await {
        Ok(()) => {
            state.read_pos += len as u64;
            state.sent += len as u64;
            state.first_chunk = false;
            (Ok(Bytes::from(buf)), state)
        }
        Err(e) => (Err(e), state),
    }
}

/// Serves the still-growing `output_path` of `transcoder`. The caller is
/// expected to have already confirmed the file exists (via
/// [`Transcoder::await_output_exists`]) before calling this - doing it here
/// too would just re-check a condition the caller already holds an `Arc` on.
pub async fn serve(
    transcoder: Arc<Transcoder>,
    cache: Arc<TranscoderCache>,
    output_path: PathBuf,
) -> Result<HttpResponse> {
    let file = match tokio::fs::File::open(&output_path).await {
        Ok(f) => f,
        Err(e) => {
            error!("error opening transcode output {:?}: {}", output_path, e);
            return Ok(response::not_found());
        }
    };

    sleep(HEAD_START).await;

    let mime = mime_for_extension(&transcoder.target_extension);
    let state = TailState {
        file,
        read_pos: 0,
        first_chunk: true,
        sent: 0,
        transcoder,
        cache,
        path: output_path,
        completed: false,
    };

    let stream = stream::unfold(state, next_chunk);
    let mut resp: HttpResponse = Response::builder()
        .status(StatusCode::OK)
        .body(response::wrap_stream(stream))
        .expect("response with only a status and a streamed body never fails to build");

    if let Some(mime) = mime {
        resp.headers_mut().typed_insert(ContentType::from(mime));
    }
    response::add_cache_headers(&mut resp);

    Ok(resp)
}
