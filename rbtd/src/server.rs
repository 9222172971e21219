//! The command socket server.
//!
//! Per-connection state machine: read one newline-delimited JSON frame,
//! authenticate it against the freshly-reloaded registry's app key,
//! dispatch, respond, then await the next frame. Malformed frames are
//! dropped silently.
//!
//! Concurrency contract: every dispatch holds the single `dispatch` lock,
//! so all commands across all connections are globally serialized. A slow
//! `build` on one connection delays a concurrent `healthcheck` on another
//! until it finishes. `stop` takes the same lock, so it drains the
//! in-flight request before the daemon shuts down.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use rbt_common::config::{Config, ConfigStore};
use rbt_common::protocol::{
    self, BuildPayload, Command, GetProjectPayload, Request, Response, decode_payload,
};
use rbt_common::{DEFAULT_PORT, Error};

use crate::executor;

/// Shared daemon state passed to every connection handler.
pub struct DaemonContext {
    /// Registry, reloaded from disk at the start of every request.
    pub store: ConfigStore,
    /// Global dispatch lock; see the module docs for the contract.
    dispatch: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

/// A bound command server, ready to run its accept loop.
pub struct Daemon {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: Arc<DaemonContext>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
    /// Bind the listening socket. Port 0 picks an ephemeral port; use
    /// [`Daemon::local_addr`] to discover it.
    pub async fn bind(addr: impl ToSocketAddrs, store: ConfigStore) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            local_addr,
            context: Arc::new(DaemonContext {
                store,
                dispatch: Mutex::new(()),
                shutdown,
            }),
            shutdown_rx,
        })
    }

    /// Bind on all interfaces at the default port.
    pub async fn bind_default(store: ConfigStore) -> Result<Self, Error> {
        Self::bind(("0.0.0.0", DEFAULT_PORT), store).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until a `stop` command arrives. The listening
    /// socket is closed on return, so later connection attempts are
    /// refused.
    pub async fn run(mut self) -> Result<(), Error> {
        info!(addr = %self.local_addr, "listening");
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            let ctx = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    warn!(%peer, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("accept error: {e}"),
                    }
                }
            }
        }
        info!("stopping");
        Ok(())
    }
}

/// Serve one connection until the peer disconnects or sends `stop`.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<DaemonContext>) -> Result<(), Error> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let request: Request = match protocol::read_frame(&mut reader).await {
            Ok(Some(request)) => request,
            // Peer closed the connection.
            Ok(None) => return Ok(()),
            // Malformed input is dropped without a response.
            Err(Error::MalformedFrame(e)) => {
                debug!("dropping malformed frame: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        // Serializes this request against every other connection.
        let _guard = ctx.dispatch.lock().await;

        // Reload so registry edits by sibling CLI invocations are visible
        // without restarting the daemon.
        let config = match ctx.store.load() {
            Ok(config) => config,
            Err(e) => {
                warn!("could not reload registry: {e}");
                protocol::write_frame(&mut writer, &Response::unknown_command()).await?;
                continue;
            }
        };

        // Bad app key and unrecognized command get the same response, so a
        // probe cannot tell which check failed.
        let authenticated = request.key == config.key;
        let Some(command) = Command::parse(&request.command).filter(|_| authenticated) else {
            protocol::write_frame(&mut writer, &Response::unknown_command()).await?;
            continue;
        };

        match command {
            Command::Healthcheck => {
                protocol::write_frame(&mut writer, &Response::healthy()).await?;
            }
            Command::Stop => {
                info!("received command to stop");
                protocol::write_frame(&mut writer, &Response::ok()).await?;
                let _ = ctx.shutdown.send(true);
                return Ok(());
            }
            Command::Build => {
                let response = dispatch_build(&config, request.payload).await;
                protocol::write_frame(&mut writer, &response).await?;
            }
            Command::GetProject => {
                let response = dispatch_get_project(&config, request.payload);
                protocol::write_frame(&mut writer, &response).await?;
            }
        }
    }
}

/// Run a build for a registered project.
///
/// The payload's `key` must equal the project's own secret; this is a
/// second authentication layer beyond the app-level key. Executor failures
/// become a structured `error` response so the waiting client is never
/// stranded.
async fn dispatch_build(config: &Config, payload: Option<serde_json::Value>) -> Response {
    let payload: BuildPayload = match decode_payload(payload) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("build rejected: {e}");
            return Response::invalid_command();
        }
    };

    let Some(project) = config.projects.get(&payload.name) else {
        debug!(project = %payload.name, "build rejected: unknown project");
        return Response::invalid_command();
    };

    if payload.key != project.key {
        warn!(project = %payload.name, "build rejected: project key mismatch");
        return Response::invalid_command();
    }

    match executor::execute(&project.path, &payload.commands).await {
        Ok(()) => Response::done(),
        Err(Error::Execution { message }) => {
            warn!(project = %payload.name, "build failed: {message}");
            Response::error(message)
        }
        Err(e) => {
            warn!(project = %payload.name, "build failed: {e}");
            Response::error(e.to_string())
        }
    }
}

/// Return the stored project record, secret key included. Any caller
/// holding the app key may provision descriptors for any project.
fn dispatch_get_project(config: &Config, payload: Option<serde_json::Value>) -> Response {
    let payload: GetProjectPayload = match decode_payload(payload) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("get:project rejected: {e}");
            return Response::invalid_command();
        }
    };

    match config.projects.get(&payload.name) {
        Some(project) => match serde_json::to_value(project) {
            Ok(value) => Response::done_with(value),
            Err(e) => Response::error(e.to_string()),
        },
        None => {
            debug!(project = %payload.name, "get:project rejected: unknown project");
            Response::invalid_command()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbt_common::config::Project;
    use std::collections::BTreeMap;

    fn config_with_project(app_key: &str, name: &str, key: &str, path: &str) -> Config {
        let mut projects = BTreeMap::new();
        projects.insert(
            name.to_string(),
            Project {
                key: key.to_string(),
                path: path.into(),
            },
        );
        Config {
            key: app_key.to_string(),
            projects,
            remotes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn build_with_missing_fields_is_invalid() {
        let config = config_with_project("app", "site", "secret", "/tmp");
        let payload = serde_json::json!({ "name": "site" });
        let response = dispatch_build(&config, Some(payload)).await;
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);
    }

    #[tokio::test]
    async fn build_with_wrong_project_key_is_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let config =
            config_with_project("app", "site", "secret", dir.path().to_str().unwrap());
        let payload = serde_json::json!({
            "name": "site",
            "key": "wrong",
            "commands": ["touch ran"],
        });
        let response = dispatch_build(&config, Some(payload)).await;
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);
        // The command list was never invoked.
        assert!(!dir.path().join("ran").exists());
    }

    #[tokio::test]
    async fn build_for_unknown_project_is_invalid() {
        let config = config_with_project("app", "site", "secret", "/tmp");
        let payload = serde_json::json!({
            "name": "other",
            "key": "secret",
            "commands": ["true"],
        });
        let response = dispatch_build(&config, Some(payload)).await;
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);
    }

    #[tokio::test]
    async fn failing_build_yields_error_response() {
        let dir = tempfile::TempDir::new().unwrap();
        let config =
            config_with_project("app", "site", "secret", dir.path().to_str().unwrap());
        let payload = serde_json::json!({
            "name": "site",
            "key": "secret",
            "commands": ["exit 7"],
        });
        let response = dispatch_build(&config, Some(payload)).await;
        assert_eq!(response.result, protocol::result::ERROR);
        assert!(response.message.unwrap().contains("status 7"));
    }

    #[test]
    fn get_project_returns_full_record() {
        let config = config_with_project("app", "site", "secret", "/home/site");
        let payload = serde_json::json!({ "name": "site" });
        let response = dispatch_get_project(&config, Some(payload));
        assert!(response.is_done());
        let record = response.payload.unwrap();
        assert_eq!(record["key"], "secret");
        assert_eq!(record["path"], "/home/site");
    }

    #[test]
    fn get_project_unknown_name_is_invalid() {
        let config = config_with_project("app", "site", "secret", "/home/site");
        let payload = serde_json::json!({ "name": "missing" });
        let response = dispatch_get_project(&config, Some(payload));
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);
    }

    #[test]
    fn get_project_missing_name_is_invalid() {
        let config = config_with_project("app", "site", "secret", "/home/site");
        let response = dispatch_get_project(&config, Some(serde_json::json!({})));
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);

        let response = dispatch_get_project(&config, None);
        assert_eq!(response.result, protocol::result::INVALID_COMMAND);
    }
}
