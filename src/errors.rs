// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_FILENAME: &str = "invalid_filename";
    pub const NOT_FOUND: &str = "not_found";
    pub const ALREADY_EXISTS: &str = "already_exists";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const CONFLICT: &str = "conflict";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const REMOTE_ERROR: &str = "remote_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    Connection,
    Conflict,
    Local,
    Remote,
}

/// Error surfaced by every public operation of the store.
/// Carries a stable code alongside the human-readable message so callers
/// can branch without string matching.
#[derive(Debug, Clone)]
pub struct StoreError {
    kind: StoreErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: StoreErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::{StoreError, StoreErrorKind, codes};

    #[test]
    fn display_includes_context_when_present() {
        let err = StoreError::with_message(
            StoreErrorKind::NotFound,
            codes::NOT_FOUND,
            "demand_v5.csv not found on server",
        )
        .with_context("copy_from");
        assert_eq!(
            err.to_string(),
            "demand_v5.csv not found on server (copy_from)"
        );
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert_eq!(err.code(), codes::NOT_FOUND);
    }

    #[test]
    fn default_message_is_the_code() {
        let err = StoreError::new(StoreErrorKind::Conflict, codes::CONFLICT);
        assert_eq!(err.to_string(), "conflict");
    }
}
