//! Remote Build Trigger - build daemon.
//!
//! Library target so integration tests can drive the server in-process on
//! an ephemeral port; the `rbtd` binary is a thin wrapper around
//! [`server::Daemon`].

pub mod executor;
pub mod server;
