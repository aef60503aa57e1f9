// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Command template for the conflict-safe push.
//!
//! The digest comparison and the rename must happen inside one
//! lock-guarded remote command; split into separate round trips, another
//! pusher could interleave between check and commit.

use crate::shell::sh_escape;

/// Advisory lock file at the store root serializing concurrent pushes.
pub(crate) const LOCK_FILE_NAME: &str = "scenario.lockfile";

/// Staged uploads live next to their final name under this suffix.
pub(crate) const TEMP_SUFFIX: &str = ".temp";

/// Marker the verify script writes to stderr when the digest moved.
pub(crate) const CONFLICT_MARKER: &str = "CONFLICT_ERROR";

/// Build the lock-and-verify-and-rename script.
///
/// Under an exclusive flock on `lockfile`: recompute the digest of
/// `original`, compare with the caller's prior `checksum`, and either
/// promote `updated` over `original` (keeping a backup) or emit the
/// conflict marker on stderr and leave both files in place.
pub(crate) fn verify_command(
    checksum: &str,
    original: &str,
    updated: &str,
    lockfile: &str,
) -> String {
    format!(
        "(flock -x 200; \
         prev={prev}; \
         curr=$(sha1sum {original}); \
         if [[ $prev == $curr ]]; then mv {updated} {original} -b; \
         else echo {marker} 1>&2; fi) \
         200>{lockfile}",
        prev = sh_escape(checksum),
        original = sh_escape(original),
        updated = sh_escape(updated),
        marker = CONFLICT_MARKER,
        lockfile = sh_escape(lockfile),
    )
}

#[cfg(test)]
mod tests {
    use super::{CONFLICT_MARKER, verify_command};

    #[test]
    fn verify_command_embeds_all_values() {
        let command = verify_command(
            "abc123  /store/grid.mat",
            "/store/grid.mat",
            "/store/grid.mat.temp",
            "/store/scenario.lockfile",
        );
        assert!(command.starts_with("(flock -x 200;"));
        assert!(command.contains("prev='abc123  /store/grid.mat'"));
        assert!(command.contains("curr=$(sha1sum '/store/grid.mat')"));
        assert!(command.contains("mv '/store/grid.mat.temp' '/store/grid.mat' -b"));
        assert!(command.contains(&format!("echo {CONFLICT_MARKER} 1>&2")));
        assert!(command.ends_with("200>'/store/scenario.lockfile'"));
    }

    #[test]
    fn verify_command_quotes_awkward_paths() {
        let command = verify_command("sum", "/store/o'dd", "/store/o'dd.temp", "/store/lock");
        assert!(command.contains(r"'/store/o'\''dd'"));
    }
}
