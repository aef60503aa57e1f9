// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::SessionManager;
use crate::progress::{ProgressSink, TransferTracker};

const TRANSFER_BLOCK_SIZE: usize = 128 * 1024;

/// Downloads land next to their final name under this suffix until the
/// last byte is written, so an interrupted transfer never leaves a
/// half-written file at the final path.
fn temp_download_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".part");
    dest.with_file_name(name)
}

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost before opening SFTP"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Download a remote file into `local_dest`, reporting running byte
    /// totals, then atomically rename the finished temp file into place.
    pub(crate) async fn download(
        &self,
        remote_path: &str,
        local_dest: &Path,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        let sftp = self.sftp().await?;
        let meta = sftp
            .metadata(remote_path)
            .await
            .with_context(|| format!("stat remote {remote_path}"))?;
        let total = meta.size.unwrap_or(0);
        let mut tracker = TransferTracker::new(sink, total);

        let part_path = temp_download_path(local_dest);
        let mut rfile = sftp
            .open(remote_path)
            .await
            .with_context(|| format!("open remote {remote_path}"))?;
        let mut lfile = tokiofs::File::create(&part_path)
            .await
            .with_context(|| format!("create local {}", part_path.display()))?;

        let mut buf = vec![0u8; TRANSFER_BLOCK_SIZE];
        let mut transferred = 0u64;
        loop {
            let n = rfile.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            lfile.write_all(&buf[..n]).await?;
            transferred += n as u64;
            tracker.update(transferred);
        }
        lfile.flush().await?;
        drop(lfile);

        tokiofs::rename(&part_path, local_dest)
            .await
            .with_context(|| format!("rename into {}", local_dest.display()))?;
        tracker.finish();
        Ok(())
    }

    /// Upload a local file to `remote_path`, reporting running byte totals.
    pub(crate) async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        #[cfg(test)]
        if let Some(upload) = self.test_hooks.as_ref().and_then(|h| h.upload.as_ref()) {
            return (upload)(local_path.to_path_buf(), remote_path.to_string()).await;
        }

        let sftp = self.sftp().await?;
        let total = tokiofs::metadata(local_path)
            .await
            .with_context(|| format!("stat local {}", local_path.display()))?
            .len();
        let mut tracker = TransferTracker::new(sink, total);

        let mut lfile = tokiofs::File::open(local_path)
            .await
            .with_context(|| format!("open local {}", local_path.display()))?;
        let flags = OpenFlags::WRITE
            .union(OpenFlags::CREATE)
            .union(OpenFlags::TRUNCATE);
        let mut rfile = sftp
            .open_with_flags(remote_path, flags)
            .await
            .with_context(|| format!("open remote {remote_path}"))?;

        let mut buf = vec![0u8; TRANSFER_BLOCK_SIZE];
        let mut transferred = 0u64;
        loop {
            let n = lfile.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            rfile.write_all(&buf[..n]).await?;
            transferred += n as u64;
            tracker.update(transferred);
        }
        rfile.flush().await?;
        rfile.shutdown().await?;
        tracker.finish();
        Ok(())
    }
}
