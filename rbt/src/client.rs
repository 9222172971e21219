//! One-shot request/response client for the daemon protocol.
//!
//! Opens a connection, writes one envelope, waits for one response.
//! Connect failures are classified so callers can tell "server not
//! running" (refused) apart from everything else; the response wait
//! carries a configurable timeout surfaced as its own transport error.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use rbt_common::protocol::{self, Request, Response};
use rbt_common::{Error, TransportError};

/// Timeout and retry policy for a single request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// How long to wait for the response. `None` waits forever; build
    /// requests use that, since a build takes as long as it takes.
    pub timeout: Option<Duration>,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Bounded connect retry: total attempts, at least 1.
    pub connect_attempts: u32,
    /// Delay between connect attempts.
    pub retry_delay: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl RequestOptions {
    /// No response timeout; used for `build`.
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            ..Self::default()
        }
    }

    /// Single connect attempt, short response timeout. Used where a
    /// refusal is an expected, meaningful answer (server liveness probes).
    pub fn probe() -> Self {
        Self {
            timeout: Some(Duration::from_secs(2)),
            connect_timeout: Duration::from_secs(2),
            connect_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Send one envelope and await exactly one response.
pub async fn send_command(
    request: &Request,
    host: &str,
    port: u16,
    opts: &RequestOptions,
) -> Result<Response, Error> {
    let stream = connect(host, port, opts).await?;
    let (read_half, mut writer) = stream.into_split();
    protocol::write_frame(&mut writer, request).await?;

    let mut reader = BufReader::new(read_half);
    let read = protocol::read_frame::<_, Response>(&mut reader);
    let response = match opts.timeout {
        Some(limit) => timeout(limit, read)
            .await
            .map_err(|_| TransportError::Timeout(limit))??,
        None => read.await?,
    };
    response
        .ok_or(TransportError::ClosedEarly)
        .map_err(Error::from)
}

async fn connect(host: &str, port: u16, opts: &RequestOptions) -> Result<TcpStream, Error> {
    let attempts = opts.connect_attempts.max(1);
    let mut last = TransportError::Refused;
    for attempt in 0..attempts {
        if attempt > 0 {
            sleep(opts.retry_delay).await;
        }
        match timeout(opts.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last = TransportError::from_connect(e),
            Err(_) => last = TransportError::Timeout(opts.connect_timeout),
        }
        debug!(host, port, attempt, "connect failed: {last}");
    }
    Err(last.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_is_classified() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = send_command(
            &Request::healthcheck("k"),
            "127.0.0.1",
            port,
            &RequestOptions::probe(),
        )
        .await
        .unwrap_err();
        assert!(err.is_server_not_running());
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and hold the connection open without ever responding.
        let hold = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let opts = RequestOptions {
            timeout: Some(Duration::from_millis(200)),
            ..RequestOptions::probe()
        };
        let err = send_command(&Request::healthcheck("k"), "127.0.0.1", port, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Timeout(_))
        ));
        hold.abort();
    }

    #[tokio::test]
    async fn dropped_connection_is_closed_early() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and immediately hang up.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = send_command(
            &Request::healthcheck("k"),
            "127.0.0.1",
            port,
            &RequestOptions::probe(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::ClosedEarly) | Error::Io(_)
        ));
    }
}
