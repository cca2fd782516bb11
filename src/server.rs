//! Binds a listening socket and drives the per-connection accept loop.
//! Grounded directly on the teacher's own `src/server.rs` - the same
//! `TcpListener::bind`, per-connection `tokio::task::spawn`, and
//! `http1::Builder::serve_connection(...).with_upgrades()` shape - adapted
//! to dispatch each request against a [`Dispatch`] instead of the teacher's
//! `ServiceFactory`.

use std::{net::SocketAddr, sync::Arc};

use http::Request;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;

use crate::{
    dispatch::Dispatch,
    error::Result,
    response::{self, HttpResponse},
};

pub struct HttpServer {
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(addr: SocketAddr) -> Self {
        HttpServer { addr }
    }

    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the listening socket and returns immediately - split out from
    /// [`BoundServer::serve`] so a caller can bind, learn whether some other
    /// instance already owns the port, and only then purge stale transcode
    /// files (spec.md's startup-ordering requirement: bind before purge, so
    /// a failed bind never destroys a running instance's in-flight files).
    pub async fn bind(self) -> Result<BoundServer> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("listening on {}", self.addr);
        Ok(BoundServer { listener })
    }
}

pub struct BoundServer {
    listener: TcpListener,
}

impl BoundServer {
    pub async fn serve(self, dispatch: Arc<Dispatch>) -> Result<()> {
        let listener = self.listener;
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let dispatch = dispatch.clone();
            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let dispatch = dispatch.clone();
                    async move { Ok::<_, std::convert::Infallible>(handle(&dispatch, req).await) }
                });
                let conn = http1::Builder::new().serve_connection(io, service).with_upgrades();
                if let Err(e) = conn.await {
                    debug!("connection from {} ended: {}", remote_addr, e);
                }
            });
        }
    }
}

async fn handle(dispatch: &Dispatch, req: Request<Incoming>) -> HttpResponse {
    let path = percent_decode_str(req.uri().path()).decode_utf8_lossy().into_owned();
    let range_header = req
        .headers()
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match dispatch.handle(path.trim_start_matches('/'), range_header.as_deref()).await {
        Ok(resp) => resp,
        Err(e) => {
            error!("error serving {}: {}", path, e);
            response::not_found()
        }
    }
}
