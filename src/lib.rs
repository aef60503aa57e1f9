// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Uniform access to a simulation data store, local or remote.
//!
//! Callers pick a backend once ([`LocalDataAccess`] for a shared volume,
//! [`SshDataAccess`] for a remote host) and use the [`DataAccess`] trait
//! uniformly after that. The remote backend connects lazily, rate-limits
//! reconnection attempts through a shared [`RetryClock`], transfers large
//! files over SFTP with progress reporting, and serializes conflicting
//! writes with a checksum-guarded, lock-protected push protocol.

pub mod access;
pub mod config;
pub mod errors;
pub mod logging;
pub mod progress;

mod local;
mod shell;
mod ssh;
mod versions;

pub use access::{CommandHandle, DataAccess, ExecStreams, check_filename};
pub use config::{Config, Overrides};
pub use errors::{StoreError, StoreErrorKind, StoreResult};
pub use local::{LOCAL_CHECKSUM, LocalDataAccess};
pub use ssh::{AuthenticationFailure, RetryClock, SshDataAccess, SshParams};
