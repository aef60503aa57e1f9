// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs as tokiofs;
use tokio::process::Command;

use crate::access::{CommandHandle, DataAccess, ExecStreams, check_filename, join_root};
use crate::config::Config;
use crate::errors::{StoreError, StoreErrorKind, StoreResult, codes};
use crate::progress;
use crate::shell;
use crate::versions;

mod error;
pub(crate) mod push;
mod session;

pub use error::AuthenticationFailure;
pub use session::{RetryClock, SshParams};

use session::SessionManager;

fn connection_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> StoreError {
    StoreError::with_message(
        StoreErrorKind::Connection,
        connection_code(&err),
        format!("{err:#}"),
    )
}

fn map_exec_error(err: anyhow::Error) -> StoreError {
    StoreError::with_message(
        StoreErrorKind::Remote,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_transfer_error(err: anyhow::Error) -> StoreError {
    StoreError::with_message(
        StoreErrorKind::Remote,
        codes::REMOTE_ERROR,
        format!("transfer failed: {err:#}"),
    )
}

fn local_io_error(err: std::io::Error, what: &str) -> StoreError {
    StoreError::with_message(
        StoreErrorKind::Local,
        codes::LOCAL_ERROR,
        format!("{what}: {err}"),
    )
}

/// Interface to a remote data store, accessed via SSH.
pub struct SshDataAccess {
    root: String,
    local_root: PathBuf,
    host: String,
    port: u16,
    username: String,
    profile_blob_url: String,
    session: SessionManager,
}

impl SshDataAccess {
    /// The retry clock is injected so every instance in the process can
    /// share one cool-down; pass a clone of the same clock to each.
    pub fn new(config: &Config, retry: RetryClock) -> Self {
        let params = SshParams {
            host: config.server_address.clone(),
            port: config.server_port,
            username: config.username.clone(),
            identity_path: config.identity_path.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            trust_unknown_hosts: config.trust_unknown_hosts,
        };
        Self {
            root: config.data_root.clone(),
            local_root: config.local_root.clone(),
            host: config.server_address.clone(),
            port: config.server_port,
            username: config.username.clone(),
            profile_blob_url: config.profile_blob_url.clone(),
            session: SessionManager::new(params, retry),
        }
    }

    /// Clock preset to the default cool-down from the config.
    pub fn retry_clock(config: &Config) -> RetryClock {
        RetryClock::new(Duration::from_secs(config.retry_after_secs))
    }

    async fn connected(&self) -> StoreResult<()> {
        self.session
            .ensure_connected()
            .await
            .map_err(map_connect_error)
    }
}

#[async_trait]
impl DataAccess for SshDataAccess {
    fn root(&self) -> &str {
        &self.root
    }

    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self),
        fields(op = "copy_from", host = %self.host, file = %file_name)
    )]
    async fn copy_from(&self, file_name: &str, from_dir: Option<&str>) -> StoreResult<()> {
        check_filename(file_name)?;
        let from_dir = from_dir.unwrap_or("");
        let local_dir = self.local_root.join(from_dir);
        tokiofs::create_dir_all(&local_dir)
            .await
            .map_err(|err| local_io_error(err, "failed to create local directory"))?;

        let from_path = join_root(&self.root, &[from_dir, file_name]);
        self.check_file_exists(&from_path, true).await?;

        self.connected().await?;
        log::info!("transferring {file_name} from server");
        let to_path = local_dir.join(file_name);
        self.session
            .download(&from_path, &to_path, progress::bar_sink(0))
            .await
            .map_err(map_transfer_error)?;
        Ok(())
    }

    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self),
        fields(op = "move_to", host = %self.host, file = %file_name)
    )]
    async fn move_to(
        &self,
        file_name: &str,
        to_dir: Option<&str>,
        change_name_to: Option<&str>,
    ) -> StoreResult<()> {
        check_filename(file_name)?;
        let from_path = self.local_root.join(file_name);
        if !from_path.is_file() {
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
        let to_dir = to_dir.unwrap_or("");
        let to_path = join_root(&self.root, &[to_dir, final_name]);
        self.makedir(to_dir).await?;
        self.check_file_exists(&to_path, false).await?;

        self.connected().await?;
        log::info!("transferring {file_name} to server");
        self.session
            .upload(&from_path, &to_path, progress::bar_sink(0))
            .await
            .map_err(map_transfer_error)?;

        tokiofs::remove_file(&from_path)
            .await
            .map_err(|err| local_io_error(err, "failed to remove staged file"))?;
        Ok(())
    }

    /// Push the file from the local workspace to the store root,
    /// replacing the target only if `checksum` still matches it.
    ///
    /// The staged `.temp` upload is deliberately left on the server on
    /// conflict, for manual inspection and recovery.
    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self, checksum),
        fields(op = "push", host = %self.host, file = %file_name)
    )]
    async fn push(
        &self,
        file_name: &str,
        checksum: &str,
        change_name_to: Option<&str>,
    ) -> StoreResult<()> {
        let new_name = change_name_to.unwrap_or(file_name);
        let temp_name = format!("{new_name}{}", push::TEMP_SUFFIX);
        self.move_to(file_name, None, Some(&temp_name)).await?;

        let command = push::verify_command(
            checksum,
            &join_root(&self.root, &[new_name]),
            &join_root(&self.root, &[&temp_name]),
            &join_root(&self.root, &[push::LOCK_FILE_NAME]),
        );
        let streams = self.execute_command(&command).await?;

        let errors = streams.stderr_lines();
        if !errors.is_empty() {
            for line in &errors {
                log::error!("{line}");
            }
            return Err(StoreError::with_message(
                StoreErrorKind::Conflict,
                codes::CONFLICT,
                format!(
                    "failed to push {new_name}, most likely a conflict was detected; \
                     {temp_name} is left on the server for inspection"
                ),
            )
            .with_context(errors.join("\n")));
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self),
        fields(op = "checksum", host = %self.host, path = %relative_path)
    )]
    async fn checksum(&self, relative_path: &str) -> StoreResult<String> {
        let full_path = join_root(&self.root, &[relative_path]);
        self.check_file_exists(&full_path, true).await?;

        let streams = self.execute_command(&shell::sha1sum(&full_path)).await?;
        streams
            .stdout_lines()
            .first()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                StoreError::with_message(
                    StoreErrorKind::Remote,
                    codes::REMOTE_ERROR,
                    format!("sha1sum produced no output for {full_path}"),
                )
            })
    }

    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self, command),
        fields(op = "exec", host = %self.host)
    )]
    async fn execute_command(&self, command: &str) -> StoreResult<ExecStreams> {
        self.connected().await?;
        let (stdout, stderr, exit_code) = self
            .session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecStreams {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Spawns a separate ssh process that opens its own connection, so
    /// the command survives independently of the cached session.
    async fn execute_command_async(&self, command: &str) -> StoreResult<CommandHandle> {
        let child = Command::new("ssh")
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.username, self.host))
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| local_io_error(err, "failed to launch ssh"))?;
        Ok(CommandHandle::new(child))
    }

    async fn get_profile_versions(
        &self,
        grid_model: &str,
        kind: &str,
    ) -> StoreResult<Vec<String>> {
        versions::cloud_profile_versions(&self.profile_blob_url, grid_model, kind).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.session.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::session::{BoxFuture, SessionTestHooks};
    use super::{
        AuthenticationFailure, RetryClock, SessionManager, SshDataAccess, SshParams,
        connection_code, map_connect_error, push,
    };
    use crate::access::DataAccess;
    use crate::errors::{StoreErrorKind, codes};
    use crate::ssh::error::CooldownActive;
    use anyhow::Result;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Session whose remote side is scripted: `ls` reports nothing there,
    /// uploads succeed, and the verify command replies with `verify_stderr`.
    /// Every executed command is recorded for inspection.
    fn scripted_session(
        verify_stderr: Vec<u8>,
        commands: Arc<Mutex<Vec<String>>>,
    ) -> SessionManager {
        let connect = Arc::new(|| {
            let fut: BoxFuture<'static, Result<()>> = Box::pin(async { Ok(()) });
            fut
        });
        let exec = Arc::new(move |cmd: String| {
            let commands = Arc::clone(&commands);
            let verify_stderr = verify_stderr.clone();
            let fut: BoxFuture<'static, Result<(Vec<u8>, Vec<u8>, i32)>> = Box::pin(async move {
                commands.lock().unwrap().push(cmd.clone());
                if cmd.starts_with("ls ") {
                    Ok((Vec::new(), b"ls: cannot access".to_vec(), 2))
                } else if cmd.starts_with("(flock") {
                    Ok((Vec::new(), verify_stderr, 0))
                } else {
                    Ok((Vec::new(), Vec::new(), 0))
                }
            });
            fut
        });
        let upload = Arc::new(|_local: PathBuf, _remote: String| {
            let fut: BoxFuture<'static, Result<()>> = Box::pin(async { Ok(()) });
            fut
        });

        let params = SshParams {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "test".to_string(),
            identity_path: None,
            known_hosts_path: None,
            trust_unknown_hosts: false,
        };
        let mut session = SessionManager::new(params, RetryClock::new(Duration::from_secs(5)));
        session.set_test_hooks(SessionTestHooks {
            connect: Some(connect),
            exec: Some(exec),
            upload: Some(upload),
        });
        session
    }

    fn facade(staging: &Path, verify_stderr: &[u8]) -> (SshDataAccess, Arc<Mutex<Vec<String>>>) {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let session = scripted_session(verify_stderr.to_vec(), Arc::clone(&commands));
        let access = SshDataAccess {
            root: "/store".to_string(),
            local_root: staging.to_path_buf(),
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "test".to_string(),
            profile_blob_url: "http://127.0.0.1:1/unused".to_string(),
            session,
        };
        (access, commands)
    }

    #[tokio::test]
    async fn push_succeeds_when_verify_is_quiet() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("grid.mat"), b"matrix bytes").unwrap();
        let (access, commands) = facade(tmp.path(), b"");

        access.push("grid.mat", "token", None).await.unwrap();
        assert!(
            !tmp.path().join("grid.mat").exists(),
            "staged file is consumed"
        );

        let commands = commands.lock().unwrap();
        let verify = commands
            .iter()
            .find(|cmd| cmd.starts_with("(flock -x 200;"))
            .expect("verify command issued");
        assert!(verify.contains("'/store/grid.mat.temp'"));
        assert!(verify.contains(&format!("200>'/store/{}'", push::LOCK_FILE_NAME)));
    }

    #[tokio::test]
    async fn push_conflict_maps_stderr_to_conflict_error() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("grid.mat"), b"matrix bytes").unwrap();
        let (access, _commands) = facade(tmp.path(), b"CONFLICT_ERROR\n");

        let err = access.push("grid.mat", "token", None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Conflict);
        assert_eq!(err.code(), codes::CONFLICT);
        assert!(err.message().contains("grid.mat.temp"));
        assert_eq!(err.context(), Some("CONFLICT_ERROR"));
    }

    #[tokio::test]
    async fn push_respects_rename() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("grid.mat"), b"x").unwrap();
        let (access, commands) = facade(tmp.path(), b"");

        access
            .push("grid.mat", "token", Some("grid_v2.mat"))
            .await
            .unwrap();

        let commands = commands.lock().unwrap();
        let verify = commands
            .iter()
            .find(|cmd| cmd.starts_with("(flock"))
            .expect("verify command issued");
        assert!(verify.contains("mv '/store/grid_v2.mat.temp' '/store/grid_v2.mat' -b"));
    }

    #[tokio::test]
    async fn move_to_missing_staging_file_is_not_found() {
        let tmp = tempdir().unwrap();
        let (access, commands) = facade(tmp.path(), b"");

        let err = access.move_to("absent.csv", None, None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert!(commands.lock().unwrap().is_empty(), "no remote call made");
    }

    #[tokio::test]
    async fn copy_from_rejects_path_bearing_names() {
        let tmp = tempdir().unwrap();
        let (access, commands) = facade(tmp.path(), b"");

        let err = access.copy_from("a/b.csv", None).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Validation);
        assert!(commands.lock().unwrap().is_empty(), "no remote call made");
    }

    #[test]
    fn connection_code_flags_auth_failures() {
        let err = anyhow::Error::new(AuthenticationFailure).context("SSH connect failed");
        assert_eq!(connection_code(&err), codes::AUTHENTICATION_FAILURE);

        let err = anyhow::anyhow!("no route to host");
        assert_eq!(connection_code(&err), codes::CONNECTION_FAILURE);
    }

    #[test]
    fn cooldown_error_names_the_remaining_wait() {
        let err = map_connect_error(CooldownActive { remaining_secs: 4 }.into());
        assert_eq!(err.kind(), StoreErrorKind::Connection);
        assert!(err.message().contains("will try again after 4 seconds"));
    }
}
