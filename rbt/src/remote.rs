//! Remote dispatch: the operations behind `rbt build` and the
//! descriptor-provisioning commands.

use std::path::{Path, PathBuf};

use rbt_common::config::{ConfigStore, Project};
use rbt_common::descriptor::BuildDescriptor;
use rbt_common::protocol::{BuildPayload, Request, result};
use rbt_common::Error;

use crate::client::{self, RequestOptions};

/// Read the build descriptor from `directory`, resolve its remote alias
/// against the local registry, and trigger the build there.
///
/// The response wait is unbounded: the daemon answers when the build is
/// finished, however long that takes.
pub async fn execute_remote(store: &ConfigStore, directory: &Path) -> Result<(), Error> {
    let descriptor = BuildDescriptor::load(directory)?;
    let remote = store.remote(&descriptor.remote_alias)?;

    let payload = BuildPayload {
        name: descriptor.project_alias,
        key: descriptor.project_key,
        commands: descriptor.commands,
    };
    let request = Request::build(&remote.key, &payload)?;
    let response = client::send_command(
        &request,
        &remote.host,
        remote.port,
        &RequestOptions::unbounded(),
    )
    .await?;

    match response.result.as_str() {
        result::DONE => Ok(()),
        result::ERROR => Err(Error::Execution {
            message: response
                .message
                .unwrap_or_else(|| "build failed on the remote".to_string()),
        }),
        other => Err(Error::Rejected {
            result: other.to_string(),
        }),
    }
}

/// Fetch a project's registration from a remote and render a descriptor
/// for it, with the default command list left for the developer to edit.
pub async fn generate_descriptor_content(
    store: &ConfigStore,
    remote_alias: &str,
    project_alias: &str,
) -> Result<String, Error> {
    let remote = store.remote(remote_alias)?;
    let request = Request::get_project(&remote.key, project_alias);
    let response = client::send_command(
        &request,
        &remote.host,
        remote.port,
        &RequestOptions::default(),
    )
    .await?;

    if !response.is_done() {
        return Err(Error::Rejected {
            result: response.result,
        });
    }
    let value = response
        .payload
        .ok_or_else(|| Error::Validation("response payload missing".to_string()))?;
    let project: Project = serde_json::from_value(value)?;

    BuildDescriptor::template(remote_alias, project_alias, project.key).render()
}

/// Write a freshly generated descriptor into `directory`.
pub async fn create_descriptor_file(
    store: &ConfigStore,
    remote_alias: &str,
    project_alias: &str,
    directory: &Path,
) -> Result<PathBuf, Error> {
    let content = generate_descriptor_content(store, remote_alias, project_alias).await?;
    let path = BuildDescriptor::path_in(directory);
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.json"))
    }

    #[tokio::test]
    async fn execute_remote_requires_descriptor() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let project_dir = TempDir::new().unwrap();

        let err = execute_remote(&store, project_dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: "descriptor",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn execute_remote_requires_registered_remote() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let project_dir = TempDir::new().unwrap();
        BuildDescriptor::template("nowhere", "site", "k")
            .write_to(project_dir.path())
            .unwrap();

        let err = execute_remote(&store, project_dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "remote", .. }));
    }

    #[tokio::test]
    async fn generate_descriptor_requires_registered_remote() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let err = generate_descriptor_content(&store, "nowhere", "site")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "remote", .. }));
    }
}
