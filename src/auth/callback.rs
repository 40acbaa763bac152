//! Single-use loopback callback server.
//!
//! The interactive OAuth flow needs somewhere for the provider to redirect
//! the browser. This server binds `127.0.0.1` on an OS-assigned port,
//! answers exactly one request on the callback path, pushes the parsed
//! outcome into a one-shot channel, and tears itself down. Any other path
//! gets a plain 404 and does not touch the result signal.
//!
//! The listener lifetime is scoped: [`CallbackServer`] aborts its accept
//! task when dropped, so the socket is released on success, failure,
//! timeout, and cancellation alike.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::CALLBACK_PATH;
use crate::error::{AuthError, Error, Result};

/// Parsed outcome of the one callback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The provider redirected back with an authorization code.
    Success {
        /// Authorization code to exchange for tokens.
        code: String,
        /// Echoed state parameter, validated by the flow controller.
        state: String,
    },
    /// The provider reported an authorization failure.
    ProviderError {
        /// OAuth error code.
        error: String,
        /// Optional human-readable description.
        error_description: Option<String>,
        /// Echoed state, when present.
        state: Option<String>,
    },
    /// The query matched neither expected shape. This has been observed in
    /// the wild and is treated as a protocol violation, not ignored.
    Protocol {
        /// The raw query string, for diagnostics.
        query: String,
    },
}

/// One-shot HTTP listener for the OAuth redirect.
pub struct CallbackServer {
    redirect_uri: String,
    rx: oneshot::Receiver<CallbackOutcome>,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind to `127.0.0.1:0` and start accepting in a background task.
    ///
    /// Loopback-only by construction; the callback endpoint is never
    /// reachable from other hosts.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            Error::Auth(AuthError::Protocol(format!(
                "failed to bind callback listener: {}",
                e
            )))
        })?;
        let addr = listener.local_addr().map_err(|e| {
            Error::Auth(AuthError::Protocol(format!(
                "failed to resolve callback address: {}",
                e
            )))
        })?;
        let redirect_uri = format!("http://{}{}", addr, CALLBACK_PATH);
        debug!(%redirect_uri, "Callback server listening");

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(listener, tx));

        Ok(Self {
            redirect_uri,
            rx,
            handle,
        })
    }

    /// The redirect URI to embed in the authorization URL.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the callback, bounded by `timeout`.
    ///
    /// Timeout is terminal for the attempt. The server is torn down when
    /// `self` is dropped regardless of which way this resolves.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackOutcome> {
        // `&mut` rather than a move: the Drop impl owns the teardown.
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Auth(AuthError::Protocol(
                "callback server exited without a result".to_string(),
            ))),
            Err(_) => Err(Error::Timeout),
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        // Releases the listening socket on every exit path.
        self.handle.abort();
    }
}

/// Accept connections until the callback path has been served once.
async fn accept_loop(listener: TcpListener, tx: oneshot::Sender<CallbackOutcome>) {
    let mut tx = Some(tx);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Callback accept failed");
                continue;
            }
        };
        debug!(%peer, "Callback connection");

        match serve_connection(stream).await {
            Ok(Some(outcome)) => {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(outcome);
                }
                return;
            }
            // Non-callback path: answered 404, keep listening.
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Failed to serve callback connection");
                continue;
            }
        }
    }
}

/// Serve one connection. Returns the parsed outcome when the request hit
/// the callback path, `None` for any other path.
async fn serve_connection(mut stream: TcpStream) -> std::io::Result<Option<CallbackOutcome>> {
    // The redirect is a small GET, but it may still arrive in more than
    // one segment; read until the header terminator. 8 KiB caps the
    // request line and headers we care about.
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= 8192 {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buf);

    let target = match parse_request_target(&request) {
        Some(target) => target,
        None => {
            respond(&mut stream, "400 Bad Request", "Bad request.").await?;
            return Ok(None);
        }
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    if path != CALLBACK_PATH {
        respond(&mut stream, "404 Not Found", "Not found.").await?;
        return Ok(None);
    }

    let outcome = parse_callback_query(query);
    let body = match &outcome {
        CallbackOutcome::Success { .. } => {
            "Authentication complete. You can close this window and return to the terminal."
        }
        CallbackOutcome::ProviderError { .. } => {
            "Authentication failed. You can close this window and retry from the terminal."
        }
        CallbackOutcome::Protocol { .. } => {
            "Unexpected callback. You can close this window and retry from the terminal."
        }
    };
    respond(&mut stream, "200 OK", body).await?;

    Ok(Some(outcome))
}

/// Extract the request target from the first request line.
fn parse_request_target(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    if method != "GET" {
        return None;
    }
    parts.next()
}

/// Classify the callback query into one of the two expected shapes,
/// or flag it as a protocol violation.
pub fn parse_callback_query(query: &str) -> CallbackOutcome {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return CallbackOutcome::ProviderError {
            error,
            error_description,
            state,
        };
    }

    match (code, state) {
        (Some(code), Some(state)) => CallbackOutcome::Success { code, state },
        _ => CallbackOutcome::Protocol {
            query: query.to_string(),
        },
    }
}

/// Write a minimal HTTP/1.1 response with a plain-text body.
async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_query() {
        let outcome = parse_callback_query("code=abc123&state=xyz");
        assert_eq!(
            outcome,
            CallbackOutcome::Success {
                code: "abc123".to_string(),
                state: "xyz".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_provider_error_query() {
        let outcome = parse_callback_query("error=access_denied&error_description=User%20said%20no");
        match outcome {
            CallbackOutcome::ProviderError {
                error,
                error_description,
                state,
            } => {
                assert_eq!(error, "access_denied");
                assert_eq!(error_description.as_deref(), Some("User said no"));
                assert!(state.is_none());
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_neither_shape_is_protocol_violation() {
        let outcome = parse_callback_query("foo=bar");
        assert!(matches!(outcome, CallbackOutcome::Protocol { .. }));

        // Code without state is also malformed
        let outcome = parse_callback_query("code=abc");
        assert!(matches!(outcome, CallbackOutcome::Protocol { .. }));
    }

    #[test]
    fn test_error_takes_precedence_over_code() {
        // A provider error with a stray code is still a provider error
        let outcome = parse_callback_query("error=server_error&code=abc&state=s");
        assert!(matches!(outcome, CallbackOutcome::ProviderError { .. }));
    }

    #[test]
    fn test_parse_request_target() {
        assert_eq!(
            parse_request_target("GET /oauth2callback?code=a&state=b HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/oauth2callback?code=a&state=b")
        );
        assert_eq!(parse_request_target("POST / HTTP/1.1\r\n"), None);
        assert_eq!(parse_request_target(""), None);
    }

    #[tokio::test]
    async fn test_bind_uses_loopback_and_callback_path() {
        let server = CallbackServer::bind().await.unwrap();
        let uri = server.redirect_uri().to_string();
        assert!(uri.starts_with("http://127.0.0.1:"));
        assert!(uri.ends_with("/oauth2callback"));
    }

    #[tokio::test]
    async fn test_full_callback_round_trip() {
        let server = CallbackServer::bind().await.unwrap();
        let uri = server.redirect_uri().to_string();

        let client = tokio::spawn(async move {
            let url = format!("{}?code=the-code&state=the-state", uri);
            reqwest::get(&url).await.unwrap()
        });

        let outcome = server.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Success {
                code: "the-code".to_string(),
                state: "the-state".to_string(),
            }
        );

        let response = client.await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_request_split_across_segments() {
        let server = CallbackServer::bind().await.unwrap();
        let addr = server
            .redirect_uri()
            .trim_start_matches("http://")
            .trim_end_matches("/oauth2callback")
            .to_string();

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
            stream
                .write_all(b"GET /oauth2callback?code=split-code&state=split-state HT")
                .await
                .unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            stream
                .write_all(b"TP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
            response
        });

        let outcome = server.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Success {
                code: "split-code".to_string(),
                state: "split-state".to_string(),
            }
        );

        let response = client.await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_other_paths_do_not_resolve_the_signal() {
        let server = CallbackServer::bind().await.unwrap();
        let base = server
            .redirect_uri()
            .trim_end_matches("/oauth2callback")
            .to_string();

        // A request to an unrelated path is answered with 404
        let response = reqwest::get(format!("{}/favicon.ico", base)).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);

        // The server is still waiting; a short timeout elapses
        let result = server.wait(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let server = CallbackServer::bind().await.unwrap();
        let result = server.wait(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
