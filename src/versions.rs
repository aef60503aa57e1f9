// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Profile version catalog. The blob store publishes a `version.json` per
//! grid model; local execution may additionally leave raw profiles on disk
//! that the catalog never heard of.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;

use crate::errors::{StoreError, StoreErrorKind, StoreResult, codes};

/// Fetch the published versions of `kind` profiles for a grid model.
pub(crate) async fn cloud_profile_versions(
    blob_url: &str,
    grid_model: &str,
    kind: &str,
) -> StoreResult<Vec<String>> {
    let url = format!("{}/{}/version.json", blob_url.trim_end_matches('/'), grid_model);
    let body: Value = reqwest::get(&url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| {
            StoreError::with_message(
                StoreErrorKind::Remote,
                codes::REMOTE_ERROR,
                format!("failed to fetch {url}: {err}"),
            )
        })?
        .json()
        .await
        .map_err(|err| {
            StoreError::with_message(
                StoreErrorKind::Remote,
                codes::REMOTE_ERROR,
                format!("failed to parse {url}: {err}"),
            )
        })?;

    let versions = body
        .get(kind)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(versions)
}

/// Scan the local raw-profile directory for `{kind}_{version}.csv` files.
/// Missing directories just mean no local artifacts yet.
pub(crate) fn local_profile_versions(
    local_root: &Path,
    grid_model: &str,
    kind: &str,
) -> Vec<String> {
    let dir = local_root.join("raw").join(grid_model);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        log::debug!("no local profile directory at {}", dir.display());
        return Vec::new();
    };

    let prefix = format!("{kind}_");
    let mut versions = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(".csv") {
            if let Some(version) = stem.strip_prefix(&prefix) {
                if !version.is_empty() {
                    versions.push(version.to_string());
                }
            }
        }
    }
    versions
}

/// Union of the cloud catalog and local artifacts, de-duplicated.
pub(crate) fn merge_versions(cloud: Vec<String>, local: Vec<String>) -> Vec<String> {
    let set: BTreeSet<String> = cloud.into_iter().chain(local).collect();
    set.into_iter().collect()
}
