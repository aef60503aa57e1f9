// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Builders for the handful of POSIX commands the store issues.
//! Paths are always single-quoted; callers never interpolate raw input.

/// Very small, safe-ish shell escaper for paths.
pub(crate) fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

pub(crate) fn list(path: &str) -> String {
    format!("ls {}", sh_escape(path))
}

pub(crate) fn makedir(path: &str) -> String {
    format!("mkdir -p {}", sh_escape(path))
}

pub(crate) fn copy(src: &str, dest: &str, recursive: bool, update: bool) -> String {
    let mut flags = String::new();
    if recursive {
        flags.push('R');
    }
    if update {
        flags.push('u');
    }
    if flags.is_empty() {
        format!("\\cp {} {}", sh_escape(src), sh_escape(dest))
    } else {
        format!("\\cp -{} {} {}", flags, sh_escape(src), sh_escape(dest))
    }
}

pub(crate) fn remove(target: &str, recursive: bool, force: bool) -> String {
    let mut flags = String::new();
    if recursive {
        flags.push('r');
    }
    if force {
        flags.push('f');
    }
    if flags.is_empty() {
        format!("rm {}", sh_escape(target))
    } else {
        format!("rm -{} {}", flags, sh_escape(target))
    }
}

pub(crate) fn sha1sum(path: &str) -> String {
    format!("sha1sum {}", sh_escape(path))
}
