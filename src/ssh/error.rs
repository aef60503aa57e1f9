// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

#[derive(Debug, ThisError)]
#[error("could not connect to server, will try again after {remaining_secs} seconds")]
pub(crate) struct CooldownActive {
    pub(crate) remaining_secs: u64,
}

#[derive(Debug, ThisError)]
#[error("session closed, create a new instance to reconnect")]
pub(crate) struct SessionClosed;
