//! Wire protocol shared by the client and the daemon.
//!
//! One JSON document per line, terminated by `\n`. The request envelope is
//! `{key, command, payload?}`; the response envelope is
//! `{result, message?, payload?}`. The top-level `key` must match the
//! daemon's app key before the command is even looked at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::Error;

/// Upper bound on a single frame. Command envelopes are small; anything
/// beyond this is a confused or hostile peer.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// The commands a daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Healthcheck,
    Stop,
    Build,
    GetProject,
}

impl Command {
    /// Parse a wire command name. Returns `None` for anything unrecognized;
    /// the daemon answers those with the same generic rejection it uses for
    /// a bad app key.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthcheck" => Some(Self::Healthcheck),
            "stop" => Some(Self::Stop),
            "build" => Some(Self::Build),
            "get:project" => Some(Self::GetProject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthcheck => "healthcheck",
            Self::Stop => "stop",
            Self::Build => "build",
            Self::GetProject => "get:project",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// App-level shared secret.
    pub key: String,
    /// Wire command name. Kept as a string so an unrecognized command is a
    /// rejectable request, not a parse failure.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Request {
    pub fn new(key: impl Into<String>, command: Command, payload: Option<Value>) -> Self {
        Self {
            key: key.into(),
            command: command.as_str().to_string(),
            payload,
        }
    }

    pub fn healthcheck(key: impl Into<String>) -> Self {
        Self::new(key, Command::Healthcheck, None)
    }

    pub fn stop(key: impl Into<String>) -> Self {
        Self::new(key, Command::Stop, None)
    }

    pub fn build(key: impl Into<String>, payload: &BuildPayload) -> Result<Self, Error> {
        Ok(Self::new(
            key,
            Command::Build,
            Some(serde_json::to_value(payload)?),
        ))
    }

    pub fn get_project(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(
            key,
            Command::GetProject,
            Some(serde_json::json!({ "name": name.into() })),
        )
    }
}

/// Payload of a `build` request. All fields are required; the daemon
/// answers `Invalid command` when any is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPayload {
    /// Project name as registered on the daemon.
    pub name: String,
    /// Project-scoped secret, a second check beyond the app key.
    pub key: String,
    /// Shell commands to run, in order.
    pub commands: Vec<String>,
}

/// Payload of a `get:project` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProjectPayload {
    pub name: String,
}

/// Decode a typed payload out of a request envelope.
pub fn decode_payload<T: DeserializeOwned>(payload: Option<Value>) -> Result<T, Error> {
    let value = payload.ok_or_else(|| Error::Validation("missing payload".to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
}

/// Response envelope sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Wire values of the `result` field.
pub mod result {
    pub const HEALTHY: &str = "healthy";
    pub const OK: &str = "ok";
    pub const DONE: &str = "done";
    /// Bad app key or unrecognized command; deliberately the same response
    /// for both so the failing check is not revealed.
    pub const UNKNOWN_COMMAND: &str = "command unknown";
    /// Recognized, authenticated command with a bad payload.
    pub const INVALID_COMMAND: &str = "Invalid command";
    pub const ERROR: &str = "error";
}

impl Response {
    fn bare(result: &str) -> Self {
        Self {
            result: result.to_string(),
            message: None,
            payload: None,
        }
    }

    pub fn healthy() -> Self {
        Self::bare(result::HEALTHY)
    }

    pub fn ok() -> Self {
        Self::bare(result::OK)
    }

    pub fn done() -> Self {
        Self::bare(result::DONE)
    }

    pub fn done_with(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare(result::DONE)
        }
    }

    pub fn unknown_command() -> Self {
        Self::bare(result::UNKNOWN_COMMAND)
    }

    pub fn invalid_command() -> Self {
        Self::bare(result::INVALID_COMMAND)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(result::ERROR)
        }
    }

    pub fn is_done(&self) -> bool {
        self.result == result::DONE
    }
}

/// Write one newline-delimited JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-delimited JSON frame.
///
/// Returns `Ok(None)` on clean EOF before any bytes arrive. A line that is
/// not valid JSON for `T` yields `Error::MalformedFrame`; the daemon drops
/// those silently, the client treats them as a transport fault.
///
/// The read itself is capped: a peer streaming a newline-free byte stream
/// buffers at most [`MAX_FRAME_BYTES`] + 1 bytes before the read fails
/// with `Error::FrameTooLarge`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, Error>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut buf = Vec::new();
    let mut capped = (&mut *reader).take(MAX_FRAME_BYTES as u64 + 1);
    let n = capped.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge(n));
    }
    // serde_json tolerates the trailing newline as whitespace.
    let parsed = serde_json::from_slice(&buf).map_err(Error::MalformedFrame)?;
    Ok(Some(parsed))
}
