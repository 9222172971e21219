//! Synchronous build execution.
//!
//! Runs an ordered list of shell commands in a working directory. Each
//! command is a fresh `sh -c` child process; no shell state is shared
//! between them. The children inherit the daemon's stdout/stderr, so build
//! output lands in the daemon's own streams with no capture.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use rbt_common::Error;

/// Run `commands` in order, rooted at `working_dir`.
///
/// The first command that exits non-zero stops execution; later commands
/// in the list are never run. The dispatch layer turns the error into a
/// structured failure response.
pub async fn execute(working_dir: &Path, commands: &[String]) -> Result<(), Error> {
    info!(dir = %working_dir.display(), "starting build");
    for command in commands {
        info!(%command, "executing");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .status()
            .await?;
        if !status.success() {
            let message = match status.code() {
                Some(code) => format!("command `{command}` exited with status {code}"),
                None => format!("command `{command}` was terminated by a signal"),
            };
            return Err(Error::Execution { message });
        }
        info!(%command, "done");
    }
    info!(dir = %working_dir.display(), "build finished");
    Ok(())
}
