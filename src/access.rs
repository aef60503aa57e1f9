// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Child;

use crate::errors::{StoreError, StoreErrorKind, StoreResult, codes};
use crate::shell;

/// Captured output of a finished shell command.
/// Streams the caller did not receive are empty buffers, never absent.
#[derive(Debug, Clone, Default)]
pub struct ExecStreams {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecStreams {
    pub fn stdout_lines(&self) -> Vec<String> {
        lossy_lines(&self.stdout)
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        lossy_lines(&self.stderr)
    }
}

fn lossy_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Handle to a command launched without waiting for completion.
pub struct CommandHandle {
    child: Child,
}

impl CommandHandle {
    pub(crate) fn new(child: Child) -> Self {
        Self { child }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and return its status.
    pub async fn wait(&mut self) -> StoreResult<ExitStatus> {
        self.child.wait().await.map_err(|err| {
            StoreError::with_message(
                StoreErrorKind::Local,
                codes::LOCAL_ERROR,
                format!("failed to wait for detached command: {err}"),
            )
        })
    }

    /// Poll the process without blocking.
    pub fn try_wait(&mut self) -> StoreResult<Option<ExitStatus>> {
        self.child.try_wait().map_err(|err| {
            StoreError::with_message(
                StoreErrorKind::Local,
                codes::LOCAL_ERROR,
                format!("failed to poll detached command: {err}"),
            )
        })
    }
}

/// Fails unless `filename` is a bare name with no directory component.
/// Applied wherever the API takes a root-relative file name, never to
/// full paths.
pub fn check_filename(filename: &str) -> StoreResult<()> {
    let has_dir = Path::new(filename)
        .parent()
        .is_some_and(|p| !p.as_os_str().is_empty());
    if has_dir || filename.contains('/') {
        return Err(StoreError::with_message(
            StoreErrorKind::Validation,
            codes::INVALID_FILENAME,
            format!("expecting file name but got path {filename}"),
        ));
    }
    Ok(())
}

/// POSIX-style join against the store root. Empty segments collapse.
pub(crate) fn join_root(root: &str, segments: &[&str]) -> String {
    let mut out = root.trim_end_matches('/').to_string();
    for seg in segments {
        let seg = seg.trim_matches('/');
        if seg.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(seg);
    }
    out
}

pub(crate) fn posix_dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Interface to a local or remote data store.
///
/// The provided methods are the shared half of the contract: thin wrappers
/// over `execute_command` that both backends use verbatim.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Absolute path of the store root all relative paths resolve against.
    fn root(&self) -> &str;

    /// Copy a file from the data store to the local workspace.
    async fn copy_from(&self, file_name: &str, from_dir: Option<&str>) -> StoreResult<()>;

    /// Move a file from the local workspace into the data store.
    async fn move_to(
        &self,
        file_name: &str,
        to_dir: Option<&str>,
        change_name_to: Option<&str>,
    ) -> StoreResult<()>;

    /// Replace a store file only if `checksum` still matches its current
    /// content; concurrent modification surfaces as a conflict error.
    async fn push(
        &self,
        file_name: &str,
        checksum: &str,
        change_name_to: Option<&str>,
    ) -> StoreResult<()>;

    /// Content digest of the file at `relative_path`, as an opaque token.
    async fn checksum(&self, relative_path: &str) -> StoreResult<String>;

    /// Run a single shell command at the store and wait for it.
    async fn execute_command(&self, command: &str) -> StoreResult<ExecStreams>;

    /// Launch a shell command at the store without waiting for completion.
    async fn execute_command_async(&self, command: &str) -> StoreResult<CommandHandle>;

    /// Available profile versions for a grid model.
    async fn get_profile_versions(&self, grid_model: &str, kind: &str)
        -> StoreResult<Vec<String>>;

    /// Release any cached session. Further operations on this instance may
    /// fail; create a new instance to reconnect.
    async fn close(&self) -> StoreResult<()>;

    /// Create `relative_path` under the store root, parents included.
    async fn makedir(&self, relative_path: &str) -> StoreResult<ExecStreams> {
        let full_path = join_root(self.root(), &[relative_path]);
        self.execute_command(&shell::makedir(&full_path)).await
    }

    /// Wrapper around cp which creates the destination directory if needed.
    async fn copy(
        &self,
        src: &str,
        dest: &str,
        recursive: bool,
        update: bool,
    ) -> StoreResult<ExecStreams> {
        let parent = posix_dirname(dest);
        if !parent.is_empty() {
            self.execute_command(&shell::makedir(parent)).await?;
        }
        self.execute_command(&shell::copy(src, dest, recursive, update))
            .await
    }

    /// Wrapper around rm.
    async fn remove(&self, target: &str, recursive: bool, force: bool) -> StoreResult<ExecStreams> {
        self.execute_command(&shell::remove(target, recursive, force))
            .await
    }

    /// Check that a file exists (or not) at the given full path.
    ///
    /// Existence is inferred from the listing's stderr being empty, not
    /// from its stdout; a missing path is the only condition that makes
    /// ls complain on these stores.
    async fn check_file_exists(&self, filepath: &str, should_exist: bool) -> StoreResult<()> {
        let streams = self.execute_command(&shell::list(filepath)).await?;
        let found = streams.stderr.is_empty();
        log::debug!(
            "existence check for {filepath}: found={found} exit_code={}",
            streams.exit_code
        );
        match (found, should_exist) {
            (false, true) => Err(StoreError::with_message(
                StoreErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("{filepath} not found on server"),
            )),
            (true, false) => Err(StoreError::with_message(
                StoreErrorKind::AlreadyExists,
                codes::ALREADY_EXISTS,
                format!("{filepath} already exists on server"),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{check_filename, join_root, posix_dirname};
    use crate::errors::StoreErrorKind;

    #[test]
    fn check_filename_accepts_bare_names() {
        check_filename("demand_v5.csv").unwrap();
        check_filename("a").unwrap();
        check_filename("weird name.with.dots").unwrap();
    }

    #[test]
    fn check_filename_rejects_paths() {
        for bad in ["dir/file.csv", "/abs/file.csv", "../file.csv", "a/"] {
            let err = check_filename(bad).unwrap_err();
            assert_eq!(err.kind(), StoreErrorKind::Validation, "input: {bad}");
        }
    }

    #[test]
    fn join_root_collapses_empty_segments() {
        assert_eq!(join_root("/store", &["", "f.csv"]), "/store/f.csv");
        assert_eq!(join_root("/store/", &["sub", "f"]), "/store/sub/f");
        assert_eq!(join_root("/store", &[]), "/store");
    }

    #[test]
    fn posix_dirname_matches_shell_expectations() {
        assert_eq!(posix_dirname("/store/sub/f"), "/store/sub");
        assert_eq!(posix_dirname("/f"), "/");
        assert_eq!(posix_dirname("f"), "");
    }
}
