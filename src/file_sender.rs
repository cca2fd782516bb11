//! Serves a byte interval of an on-disk file: the "File Sender" component.
//! Grounded on the teacher's `myhy::response::file::serve_opened_file` -
//! same seek-then-stream-fixed-blocks shape, same typed-header usage via the
//! `headers` crate - adapted to the custom range grammar in [`crate::range`].

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::Stream;
use headers::{AcceptRanges, ContentLength, ContentRange, ContentType, HeaderMapExt};
use http::{Response, StatusCode};
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf};

use crate::{
    error::Result,
    range::RangeSpec,
    response::{self, HttpResponse},
};

const BLOCK_SIZE: usize = 16 * 1024;

/// Streams up to `len` bytes of an already-positioned file, 16 KiB at a
/// time. Logs (rather than errors out) if the stream is dropped early -
/// that's how a client mid-body disconnect shows up once the body has been
/// handed off to the connection driver.
struct BoundedFileStream {
    file: Option<tokio::fs::File>,
    remaining: u64,
    sent: u64,
    path: PathBuf,
    buf: Box<[u8; BLOCK_SIZE]>,
}

impl BoundedFileStream {
    fn new(file: tokio::fs::File, len: u64, path: PathBuf) -> Self {
        BoundedFileStream {
            file: Some(file),
            remaining: len,
            sent: 0,
            path,
            buf: Box::new([0u8; BLOCK_SIZE]),
        }
    }
}

impl Stream for BoundedFileStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            this.file.take();
            return Poll::Ready(None);
        }
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(None);
        };
        let want = this.remaining.min(BLOCK_SIZE as u64) as usize;
        let mut read_buf = ReadBuf::new(&mut this.buf[..want]);
        match Pin::new(file).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    this.file.take();
                    return Poll::Ready(None);
                }
                this.remaining -= n as u64;
                this.sent += n as u64;
                Poll::Ready(Some(Ok(Bytes::copy_from_slice(&this.buf[..n]))))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for BoundedFileStream {
    fn drop(&mut self) {
        if self.remaining > 0 {
            debug!(
                "client disconnected after {} of {} bytes sending {:?}",
                self.sent,
                self.sent + self.remaining,
                self.path
            );
        }
    }
}

/// Serves `path` in response to an optional raw `Range` header value.
/// Handles the full 200/206/416 decision tree from the range parser through
/// to body framing.
pub async fn serve_file(path: &Path, range_header: Option<&str>) -> Result<HttpResponse> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            error!("error opening {:?}: {}", path, e);
            return Ok(response::not_found());
        }
    };

    let len = file.metadata().await?.len();
    let mime = mime_guess::from_path(path).first();

    let requested = range_header.and_then(RangeSpec::parse);
    let (mut status, mut start, mut end) = match requested {
        Some(spec) => match spec.resolve(len) {
            Some((s, e)) => (StatusCode::PARTIAL_CONTENT, s, e),
            None => return Ok(response::range_not_satisfiable()),
        },
        None => (StatusCode::OK, 0, len.saturating_sub(1)),
    };

    if status == StatusCode::PARTIAL_CONTENT {
        if let Err(e) = file.seek(SeekFrom::Start(start)).await {
            warn!(
                "file {:?} is not seekable ({}); sending full file instead of requested range",
                path, e
            );
            status = StatusCode::OK;
            start = 0;
            end = len.saturating_sub(1);
        }
    }

    let content_len = if len == 0 { 0 } else { end - start + 1 };

    let stream = BoundedFileStream::new(file, content_len, path.to_path_buf());
    let mut resp: HttpResponse = Response::builder()
        .status(status)
        .body(response::wrap_stream(stream))
        .expect("response with only a status and a streamed body never fails to build");

    let headers = resp.headers_mut();
    headers.typed_insert(AcceptRanges::bytes());
    headers.typed_insert(ContentLength(content_len));
    if let Some(mime) = mime {
        headers.typed_insert(ContentType::from(mime));
    }
    if status == StatusCode::PARTIAL_CONTENT {
        headers.typed_insert(
            ContentRange::bytes(start..=end, Some(len))
                .expect("start..=end against len is always valid here"),
        );
    }
    response::add_cache_headers(&mut resp);

    Ok(resp)
}
