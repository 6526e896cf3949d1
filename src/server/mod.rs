//! HTTP/1.1 transport for a [`Router`].
//!
//! Accepts TCP connections and dispatches each request to the shared router.
//! Connections are persistent unless the client asks otherwise.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request we buffer before answering 413 (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener that feeds requests to a [`Router`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use waypoint::{Context, Response, Router, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/health", |_ctx: Context| async {
///         Ok::<_, anyhow::Error>(Response::new(StatusCode::Ok).body("ok"))
///     });
///
///     let server = Server::bind("127.0.0.1:8765").await?;
///     server.serve(Arc::new(router)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, dispatching every request to `router`.
    pub async fn serve(self, router: Arc<Router>) -> Result<(), ServerError> {
        self.serve_with_shutdown(router, std::future::pending::<()>())
            .await
    }

    /// Like [`serve`](Self::serve), but stops accepting once `shutdown`
    /// completes. Connections already open run to completion on their own tasks.
    pub async fn serve_with_shutdown<S>(
        self,
        router: Arc<Router>,
        shutdown: S,
    ) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        info!(address = %self.local_addr, routes = router.len(), "waypoint listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Serve every complete request already buffered before reading again.
        loop {
            let (request, body_offset) = match Request::parse(&buf) {
                Ok(pair) => pair,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::new(StatusCode::BadRequest)
                        .body(format!("Bad Request: {e}"))
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            };

            let content_length = request.content_length().unwrap_or(0);
            let total_needed = match body_offset.checked_add(content_length) {
                Some(total) if total <= MAX_REQUEST_SIZE => total,
                _ => {
                    warn!(
                        peer = %peer_addr,
                        content_length,
                        "declared body too large, sending 413"
                    );
                    let response = Response::new(StatusCode::PayloadTooLarge)
                        .body("Request entity too large")
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            };
            if buf.len() < total_needed {
                break;
            }

            let frame = buf.split_to(total_needed).freeze();
            let request = request.with_body(frame.slice(body_offset..));
            let keep_alive = request.is_keep_alive();
            let is_head = *request.method() == Method::Head;

            debug!(
                peer = %peer_addr,
                method = %request.method(),
                path = %request.path(),
                "dispatching request"
            );

            let mut response = router.dispatch(request).await.keep_alive(keep_alive);
            if is_head {
                response = response.without_body();
            }
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;

            if !keep_alive {
                debug!(peer = %peer_addr, "Connection: close, shutting down");
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, HandlerResult};

    async fn echo(ctx: Context) -> HandlerResult {
        let body = String::from_utf8_lossy(ctx.request().body()).into_owned();
        Ok(Response::new(StatusCode::Ok).body(body))
    }

    async fn hello(_ctx: Context) -> HandlerResult {
        Ok(Response::new(StatusCode::Ok).body("hi"))
    }

    async fn start() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let mut router = Router::new();
        router.post("/echo", echo);
        router.get("/hello", hello);

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.serve_with_shutdown(Arc::new(router), async {
            let _ = stopped.await;
        }));
        (addr, stop)
    }

    async fn exchange(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn body_is_sliced_to_content_length() {
        let (addr, _stop) = start().await;
        let reply = exchange(
            addr,
            "POST /echo HTTP/1.1\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert!(reply.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn head_keeps_length_but_drops_body() {
        let (addr, _stop) = start().await;
        let reply = exchange(addr, "HEAD /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert!(reply.contains("Content-Length: 2"));
        assert!(reply.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (addr, _stop) = start().await;
        let reply = exchange(addr, "GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 404 Not Found"));
        assert!(reply.contains("Endpoint not found: GET /missing"));
    }

    #[tokio::test]
    async fn oversized_content_length_gets_413() {
        let (addr, _stop) = start().await;
        for length in [usize::MAX, MAX_REQUEST_SIZE + 1] {
            let reply = exchange(
                addr,
                &format!("POST /echo HTTP/1.1\r\nContent-Length: {length}\r\n\r\n"),
            )
            .await;
            assert!(reply.starts_with("HTTP/1.1 413 Payload Too Large"), "{reply}");
            assert!(reply.contains("Connection: close"));
        }
    }

    #[tokio::test]
    async fn pipelined_requests_are_all_answered() {
        let (addr, _stop) = start().await;
        let reply = exchange(
            addr,
            "GET /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2);
    }
}
