// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::{AuthResult, Config};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::{AuthenticationFailure, CooldownActive, SessionClosed};

mod exec;
mod sftp;


#[cfg(test)]
pub(crate) type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Russh client handler enforcing the configured host-key policy.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    known_hosts_path: Option<PathBuf>,
    trust_unknown_hosts: bool,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.port,
            server_public_key,
            self.known_hosts_path.as_deref(),
            self.trust_unknown_hosts,
        )
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<String>,
    /// Known-hosts file for server key lookup; the user default when unset.
    pub known_hosts_path: Option<PathBuf>,
    /// Accept and learn unknown server keys instead of failing.
    pub trust_unknown_hosts: bool,
}

/// Process-wide cool-down on connection attempts after a failure.
///
/// Clones share one underlying timestamp, so every backend instance
/// handed the same clock backs off together instead of taking turns
/// hammering a dead host.
#[derive(Clone)]
pub struct RetryClock {
    last_failure: Arc<std::sync::Mutex<Option<Instant>>>,
    cooldown: Duration,
}

impl RetryClock {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_failure: Arc::new(std::sync::Mutex::new(None)),
            cooldown,
        }
    }

    /// Ok when an attempt is allowed; otherwise the remaining wait.
    pub fn check(&self) -> Result<(), Duration> {
        // A timestamp is valid even if a holder panicked; take it anyway.
        let guard = self
            .last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match *guard {
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed >= self.cooldown {
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            None => Ok(()),
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self
            .last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(Instant::now());
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

fn verify_server_key(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
    trust_unknown_hosts: bool,
) -> std::result::Result<bool, anyhow::Error> {
    match check_known_hosts_for(host, port, key, known_hosts_path) {
        Ok(true) => return Ok(true),
        Ok(false) if !trust_unknown_hosts => {
            return Err(anyhow!(
                "server key for {host}:{port} is not in known_hosts; \
                 add it or enable trust_unknown_hosts"
            ));
        }
        Ok(false) => {}
        Err(err) if trust_unknown_hosts => {
            // A missing known_hosts file is fine here; learning creates it.
            log::debug!("known_hosts lookup failed for {host}:{port}: {err}");
        }
        Err(err) => {
            log::warn!("server key validation failed for {host}:{port}: {err}");
            return Err(anyhow!(
                "server key validation failed for {host}:{port}: {err}"
            ));
        }
    }

    log::info!("server key for {host}:{port} is not present in known_hosts; learning");
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

fn auth_succeeded(result: AuthResult) -> bool {
    matches!(result, AuthResult::Success)
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct SessionTestHooks {
    pub(crate) connect: Option<Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>>,
    #[allow(clippy::type_complexity)]
    pub(crate) exec: Option<
        Arc<dyn Fn(String) -> BoxFuture<'static, Result<(Vec<u8>, Vec<u8>, i32)>> + Send + Sync>,
    >,
    #[allow(clippy::type_complexity)]
    pub(crate) upload:
        Option<Arc<dyn Fn(PathBuf, String) -> BoxFuture<'static, Result<()>> + Send + Sync>>,
}

/// Manager that owns a single long-lived SSH connection.
///
/// The handle is created lazily on first use and reused until `shutdown`;
/// the mutex serializes command use. Connection attempts are gated by the
/// shared retry clock.
pub(crate) struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    retry: RetryClock,
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    closed: AtomicBool,
    #[cfg(test)]
    test_hooks: Option<SessionTestHooks>,
}

impl SessionManager {
    pub(crate) fn new(params: SshParams, retry: RetryClock) -> Self {
        let cfg = Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            retry,
            handle: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
            #[cfg(test)]
            test_hooks: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_test_hooks(&mut self, hooks: SessionTestHooks) {
        self.test_hooks = Some(hooks);
    }

    /// Ensure we have a connected and authenticated handle, respecting
    /// the retry cool-down while disconnected.
    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionClosed.into());
        }
        let mut handle_field = self.handle.lock().await;

        // If the handle exists but is closed, drop it so we reconnect.
        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            return Ok(());
        }

        if let Err(remaining) = self.retry.check() {
            // Round up so the message never promises a zero-second wait.
            let remaining_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(CooldownActive { remaining_secs }.into());
        }

        #[cfg(test)]
        if let Some(connect) = self.test_hooks.as_ref().and_then(|h| h.connect.as_ref()) {
            return match (connect)().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.retry.record_failure();
                    Err(err)
                }
            };
        }

        match self.connect().await {
            Ok(handle) => {
                *handle_field = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.retry.record_failure();
                Err(err)
            }
        }
    }

    async fn connect(&self) -> Result<russh::client::Handle<ClientHandler>> {
        log::info!(
            "establishing connection with {}@{}:{}",
            &self.params.username,
            &self.params.host,
            self.params.port
        );
        let handler = ClientHandler {
            host: self.params.host.clone(),
            port: self.params.port,
            known_hosts_path: self.params.known_hosts_path.clone(),
            trust_unknown_hosts: self.params.trust_unknown_hosts,
        };
        let connect = russh::client::connect(
            self.config.clone(),
            (self.params.host.as_str(), self.params.port),
            handler,
        );
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| {
                anyhow!(
                    "connection to {}:{} timed out after {}s",
                    &self.params.host,
                    self.params.port,
                    CONNECT_TIMEOUT.as_secs()
                )
            })?
            .context("SSH connect failed")?;

        let path = self.params.identity_path.as_deref().ok_or_else(|| {
            anyhow!(
                "no identity_path configured for {}@{}",
                &self.params.username,
                &self.params.host
            )
        })?;
        let key = russh::keys::load_secret_key(path, None)
            .with_context(|| format!("failed to load secret key at {path}"))?;
        let key = Arc::new(key);
        // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
        let pk = PrivateKeyWithHashAlg::new(key, handle.best_supported_rsa_hash().await?.flatten());
        let result = handle
            .authenticate_publickey(self.params.username.clone(), pk)
            .await?;
        if !auth_succeeded(result) {
            return Err(AuthenticationFailure.into());
        }
        log::info!(
            "authenticated with {}@{}:{}",
            &self.params.username,
            &self.params.host,
            self.params.port
        );
        Ok(handle)
    }

    pub(crate) async fn needs_connect(&self) -> bool {
        let handle_field = self.handle.lock().await;
        match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        }
    }

    /// Drop the cached handle and refuse further use of this instance.
    pub(crate) async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut handle_field = self.handle.lock().await;
        let _ = handle_field.take();
    }
}
