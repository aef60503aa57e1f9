// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::access::{CommandHandle, DataAccess, ExecStreams, check_filename, join_root};
use crate::config::Config;
use crate::errors::{StoreError, StoreErrorKind, StoreResult, codes};
use crate::versions;

/// The checksum token handed out where no conflict protocol is needed:
/// a shared volume has no read-then-push race worth guarding.
pub const LOCAL_CHECKSUM: &str = "dummy_value";

/// Interface to a shared local data volume.
pub struct LocalDataAccess {
    root: String,
    local_root: PathBuf,
    profile_blob_url: String,
}

impl LocalDataAccess {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.data_root.clone(),
            local_root: config.local_root.clone(),
            profile_blob_url: config.profile_blob_url.clone(),
        }
    }
}

#[async_trait]
impl DataAccess for LocalDataAccess {
    fn root(&self) -> &str {
        &self.root
    }

    /// Nothing to do: the store root is reachable on the same volume.
    #[tracing::instrument(name = "store", level = "debug", skip(self), fields(op = "copy_from", file = %file_name))]
    async fn copy_from(&self, file_name: &str, _from_dir: Option<&str>) -> StoreResult<()> {
        log::debug!("{file_name} is already on the shared volume, nothing to copy");
        Ok(())
    }

    #[tracing::instrument(name = "store", level = "debug", skip(self), fields(op = "move_to", file = %file_name))]
    async fn move_to(
        &self,
        file_name: &str,
        to_dir: Option<&str>,
        change_name_to: Option<&str>,
    ) -> StoreResult<()> {
        check_filename(file_name)?;
        let src = self.local_root.join(file_name);
        if !src.is_file() {
            return Err(StoreError::with_message(
                StoreErrorKind::NotFound,
                codes::NOT_FOUND,
                format!(
                    "{file_name} not found in {} on local machine",
                    self.local_root.display()
                ),
            ));
        }

        let final_name = change_name_to.unwrap_or(file_name);
        let dest = join_root(&self.root, &[to_dir.unwrap_or(""), final_name]);
        log::info!("moving file {} to {dest}", src.display());
        self.check_file_exists(&dest, false).await?;
        self.copy(&src.to_string_lossy(), &dest, false, false).await?;
        self.remove(&src.to_string_lossy(), false, false).await?;
        Ok(())
    }

    /// No network partition risk on a shared volume, so no protocol.
    async fn push(
        &self,
        _file_name: &str,
        _checksum: &str,
        _change_name_to: Option<&str>,
    ) -> StoreResult<()> {
        Ok(())
    }

    async fn checksum(&self, _relative_path: &str) -> StoreResult<String> {
        Ok(LOCAL_CHECKSUM.to_string())
    }

    #[tracing::instrument(name = "store", level = "debug", skip(self, command), fields(op = "exec"))]
    async fn execute_command(&self, command: &str) -> StoreResult<ExecStreams> {
        log::debug!("executing '{command}'");
        let output = Command::new("bash")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|err| {
                StoreError::with_message(
                    StoreErrorKind::Local,
                    codes::LOCAL_ERROR,
                    format!("failed to run '{command}': {err}"),
                )
            })?;
        Ok(ExecStreams {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn execute_command_async(&self, command: &str) -> StoreResult<CommandHandle> {
        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                StoreError::with_message(
                    StoreErrorKind::Local,
                    codes::LOCAL_ERROR,
                    format!("failed to launch '{command}': {err}"),
                )
            })?;
        Ok(CommandHandle::new(child))
    }

    /// Local execution may have raw profiles the catalog does not know
    /// about, so the answer is the union of both listings.
    async fn get_profile_versions(
        &self,
        grid_model: &str,
        kind: &str,
    ) -> StoreResult<Vec<String>> {
        let cloud =
            versions::cloud_profile_versions(&self.profile_blob_url, grid_model, kind).await?;
        let local = versions::local_profile_versions(&self.local_root, grid_model, kind);
        Ok(versions::merge_versions(cloud, local))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LOCAL_CHECKSUM, LocalDataAccess};
    use crate::access::DataAccess;
    use crate::errors::StoreErrorKind;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn access(store: &Path, staging: &Path) -> LocalDataAccess {
        LocalDataAccess {
            root: store.to_string_lossy().to_string(),
            local_root: staging.to_path_buf(),
            profile_blob_url: "http://127.0.0.1:1/unused".to_string(),
        }
    }

    fn fixture() -> (tempfile::TempDir, LocalDataAccess) {
        let tmp = tempdir().unwrap();
        let store = tmp.path().join("store");
        let staging = tmp.path().join("staging");
        fs::create_dir_all(&store).unwrap();
        fs::create_dir_all(&staging).unwrap();
        let access = access(&store, &staging);
        (tmp, access)
    }

    #[tokio::test]
    async fn checksum_is_the_fixed_placeholder() {
        let (_tmp, access) = fixture();
        assert_eq!(access.checksum("whatever").await.unwrap(), LOCAL_CHECKSUM);
        assert_eq!(access.checksum("").await.unwrap(), LOCAL_CHECKSUM);
    }

    #[tokio::test]
    async fn push_is_a_no_op() {
        let (_tmp, access) = fixture();
        access.push("missing.csv", "irrelevant", None).await.unwrap();
    }

    #[tokio::test]
    async fn move_to_round_trips_bytes() {
        let (tmp, access) = fixture();
        let staging = tmp.path().join("staging");
        fs::write(staging.join("grid.mat"), b"matrix bytes").unwrap();

        access.move_to("grid.mat", Some("data"), None).await.unwrap();

        let dest = tmp.path().join("store/data/grid.mat");
        assert_eq!(fs::read(dest).unwrap(), b"matrix bytes");
        assert!(!staging.join("grid.mat").exists(), "source should be moved");
    }

    #[tokio::test]
    async fn move_to_respects_rename() {
        let (tmp, access) = fixture();
        let staging = tmp.path().join("staging");
        fs::write(staging.join("grid.mat"), b"x").unwrap();

        access
            .move_to("grid.mat", None, Some("grid_v2.mat"))
            .await
            .unwrap();

        assert!(tmp.path().join("store/grid_v2.mat").exists());
    }

    #[tokio::test]
    async fn move_to_twice_fails_and_keeps_first_upload() {
        let (tmp, access) = fixture();
        let staging = tmp.path().join("staging");
        fs::write(staging.join("f.csv"), b"first").unwrap();
        access.move_to("f.csv", Some("sub"), None).await.unwrap();

        fs::write(staging.join("f.csv"), b"second").unwrap();
        let err = access.move_to("f.csv", Some("sub"), None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::AlreadyExists);

        let dest = tmp.path().join("store/sub/f.csv");
        assert_eq!(fs::read(dest).unwrap(), b"first");
    }

    #[tokio::test]
    async fn move_to_missing_source_is_not_found() {
        let (_tmp, access) = fixture();
        let err = access.move_to("nope.csv", None, None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
    }

    #[tokio::test]
    async fn move_to_rejects_paths() {
        let (_tmp, access) = fixture();
        let err = access.move_to("a/b.csv", None, None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Validation);
    }

    #[tokio::test]
    async fn listing_a_missing_path_writes_stderr_only() {
        let (_tmp, access) = fixture();
        let streams = access.execute_command("ls /nonexistent").await.unwrap();
        assert!(streams.stdout.is_empty());
        assert!(!streams.stderr.is_empty());
        assert_ne!(streams.exit_code, 0);
    }

    #[tokio::test]
    async fn check_file_exists_maps_stderr_to_not_found() {
        let (tmp, access) = fixture();
        let missing = tmp.path().join("store/absent.csv");
        let err = access
            .check_file_exists(&missing.to_string_lossy(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
    }

    #[tokio::test]
    async fn execute_command_async_returns_a_pollable_handle() {
        let (_tmp, access) = fixture();
        let mut handle = access.execute_command_async("true").await.unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn makedir_creates_nested_directories() {
        let (tmp, access) = fixture();
        access.makedir("a/b/c").await.unwrap();
        assert!(tmp.path().join("store/a/b/c").is_dir());
    }

    #[tokio::test]
    async fn remove_recursive_deletes_a_tree() {
        let (tmp, access) = fixture();
        let dir = tmp.path().join("store/doomed");
        fs::create_dir_all(dir.join("inner")).unwrap();
        fs::write(dir.join("inner/f"), b"x").unwrap();

        access
            .remove(&dir.to_string_lossy(), true, true)
            .await
            .unwrap();
        assert!(!dir.exists());
    }
}
