use thiserror::Error;

/// Errors that escape a request handler entirely - I/O failures and anything
/// else unexpected. Expected failure paths (missing file, unsatisfiable
/// range, disallowed target extension) are never turned into an `Error`;
/// they're built directly as a 404/416 response so the connection loop in
/// `server.rs` only ever has to log-and-404 on this enum's variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
