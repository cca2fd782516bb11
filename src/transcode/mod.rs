//! One live transcode job: an external `ffmpeg` process writing audio-only
//! output to a private temp file, plus its lifecycle. Grounded on the
//! teacher's `services::transcode::Transcoder` (same `ffmpeg` command
//! building style - `-nostdin -v error`, `-map_metadata -1`, `-map a`) and
//! on `original_source/munic.py`'s `Transcoder` class, which is the system
//! this module's file-based (rather than pipe-based) lifecycle is
//! distilled from: a numbered `TRANSCODE_<n><ext>` output file, a
//! `transcode_finished()` poll, and a destructor that kills the still-running
//! child and unlinks the file.

pub mod cache;
pub mod tailer;

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::Context;
use log::{debug, error, info, warn};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};

/// Target extensions transcoding is offered for - spec.md's fixed
/// allow-list. Anything else falls through to a 404.
pub const ALLOWED_TARGET_EXTENSIONS: &[&str] = &["ogg", "mp3"];

pub fn mime_for_extension(ext: &str) -> Option<mime::Mime> {
    match ext {
        "ogg" => Some("audio/ogg".parse().unwrap()),
        "mp3" => Some("audio/mpeg".parse().unwrap()),
        _ => None,
    }
}

static NEXT_INDEX: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Running,
    Finished,
}

struct Inner {
    child: Option<Child>,
    state: TranscodeState,
}

/// A live transcode job, identified by `fingerprint` (the full requested
/// virtual path, extension included - see the cache's `getOrCreate` for why
/// the key must include the target extension).
pub struct Transcoder {
    pub fingerprint: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub target_extension: String,
    inner: Mutex<Inner>,
}

impl Transcoder {
    /// Allocates a fresh monotonic output file, removes anything stale that
    /// might already sit at that path, and spawns the transcoder.
    pub async fn spawn(
        fingerprint: String,
        source_path: PathBuf,
        target_extension: String,
        transcode_dir: &Path,
        ffmpeg_bin: &str,
    ) -> anyhow::Result<Self> {
        let index = NEXT_INDEX.fetch_add(1, Ordering::SeqCst);
        let output_path = transcode_dir.join(format!("TRANSCODE_{}.{}", index, target_extension));

        if tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            warn!("stale transcode file at {:?}, removing before reuse", output_path);
            let _ = tokio::fs::remove_file(&output_path).await;
        }

        info!(
            "starting transcode of {:?} to {:?} ({})",
            source_path, output_path, target_extension
        );

        let child = Command::new(ffmpeg_bin)
            .arg("-nostdin")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(&source_path)
            .args(["-map_metadata", "-1"])
            .args(["-map", "a"])
            .arg("-vn")
            .args(["-flush_packets", "1"])
            .arg("-y")
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("spawning {} for {:?}", ffmpeg_bin, source_path))?;

        Ok(Transcoder {
            fingerprint,
            source_path,
            output_path,
            target_extension,
            inner: Mutex::new(Inner {
                child: Some(child),
                state: TranscodeState::Running,
            }),
        })
    }

    /// Polls the child once; latches to `Finished` on first observed exit
    /// (any exit code) and releases the process handle. Idempotent.
    pub fn is_finished(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TranscodeState::Finished {
            return true;
        }
        if let Some(child) = inner.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("transcode of {:?} exited with {:?}", self.source_path, status);
                    inner.state = TranscodeState::Finished;
                    inner.child = None;
                }
                Ok(None) => {}
                Err(e) => error!(
                    "error polling transcoder child for {:?}: {}",
                    self.source_path, e
                ),
            }
        }
        inner.state == TranscodeState::Finished
    }

    pub fn state(&self) -> TranscodeState {
        if self.is_finished() {
            TranscodeState::Finished
        } else {
            TranscodeState::Running
        }
    }

    /// Waits, polling every 100ms, up to `budget` for the output file to
    /// show up on disk. Only needed to bridge the gap between spawn and the
    /// child's first write.
    pub async fn await_output_exists(&self, budget: Duration) -> Option<PathBuf> {
        let deadline = Instant::now() + budget;
        loop {
            if tokio::fs::try_exists(&self.output_path).await.unwrap_or(false) {
                return Some(self.output_path.clone());
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(child) = inner.child.take() {
            if let Some(pid) = child.id() {
                terminate(pid as i32);
            }
        }
        match std::fs::remove_file(&self.output_path) {
            Ok(()) => debug!("removed transcode output {:?}", self.output_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "could not remove transcode output {:?}: {}",
                self.output_path, e
            ),
        }
    }
}

#[cfg(unix)]
fn terminate(pid: i32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!("could not send SIGTERM to transcoder pid {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: i32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_allocates_monotonic_distinct_outputs() {
        let dir = tempfile::tempdir().unwrap();
        // "true" always exists and exits immediately; stands in for ffmpeg.
        let a = Transcoder::spawn(
            "a".into(),
            PathBuf::from("/dev/null"),
            "mp3".into(),
            dir.path(),
            "true",
        )
        .await
        .unwrap();
        let b = Transcoder::spawn(
            "b".into(),
            PathBuf::from("/dev/null"),
            "mp3".into(),
            dir.path(),
            "true",
        )
        .await
        .unwrap();
        assert_ne!(a.output_path, b.output_path);
    }

    #[tokio::test]
    async fn drop_unlinks_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = Transcoder::spawn(
            "a".into(),
            PathBuf::from("/dev/null"),
            "mp3".into(),
            dir.path(),
            "true",
        )
        .await
        .unwrap();
        let output = t.output_path.clone();
        tokio::fs::write(&output, b"fake transcoded bytes")
            .await
            .unwrap();
        drop(t);
        assert!(!output.exists());
    }
}
