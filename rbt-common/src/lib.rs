//! Shared types and utilities for Remote Build Trigger.
//!
//! Everything the client and daemon agree on lives here: the wire
//! protocol (`protocol`), the persisted registry (`config`), the
//! per-project build descriptor (`descriptor`), and the error taxonomy
//! (`errors`).

pub mod config;
pub mod descriptor;
pub mod errors;
pub mod protocol;

pub use config::{Config, ConfigStore, Project, Remote};
pub use descriptor::BuildDescriptor;
pub use errors::{Error, TransportError};

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 17997;
