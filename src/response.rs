//! Small response-building helpers shared by the file sender and the
//! chunked tailer. Grounded on the teacher's `services::response` module:
//! same set of canned short responses, same `Cache-Control`/headers
//! plumbing via the `headers` crate's typed-header support.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use headers::HeaderMapExt;
use http::{Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Frame;

pub type HttpBody = BoxBody<Bytes, std::io::Error>;
pub type HttpResponse = Response<HttpBody>;

pub fn empty_body() -> HttpBody {
    Empty::new().map_err(|never: Infallible| match never {}).boxed()
}

pub fn full_body<T: Into<Bytes>>(bytes: T) -> HttpBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Wraps a byte stream as a streamed response body. Each stream item becomes
/// one `Frame::data` - for a chunked response (no `Content-Length`) that
/// means one wire chunk per item, which is what the tailer relies on to
/// control chunk sizes and timing.
pub fn wrap_stream<S>(stream: S) -> HttpBody
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
{
    let body = http_body_util::StreamBody::new(stream.map(|item| item.map(Frame::data)));
    BodyExt::boxed(body)
}

fn short_response(status: StatusCode, msg: &'static str) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(full_body(msg))
        .expect("building a canned short response never fails")
}

pub fn not_found() -> HttpResponse {
    short_response(StatusCode::NOT_FOUND, "Not Found")
}

pub fn range_not_satisfiable() -> HttpResponse {
    short_response(StatusCode::RANGE_NOT_SATISFIABLE, "Range Not Satisfiable")
}

/// Applies the fixed `Cache-Control: max-age=1000` hint used for every
/// media response (direct send or chunked tail alike).
pub fn add_cache_headers(resp: &mut HttpResponse) {
    resp.headers_mut()
        .typed_insert(headers::CacheControl::new().with_max_age(std::time::Duration::from_secs(1000)));
}
