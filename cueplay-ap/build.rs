//! Build script for cueplay-ap
//!
//! Stamps the `cue-sim` version banner with `GIT_HASH`, `BUILD_TIMESTAMP`
//! and `BUILD_PROFILE`. Source tarballs without a git checkout can pin the
//! revision through `CUEPLAY_BUILD_ID`.

use std::env;
use std::process::Command;

const BUILD_ID_VAR: &str = "CUEPLAY_BUILD_ID";

/// Revision of the source tree: the override if set, else `git describe`
fn revision() -> String {
    if let Ok(id) = env::var(BUILD_ID_VAR) {
        if !id.trim().is_empty() {
            return id.trim().to_string();
        }
    }

    let described = Command::new("git")
        .args(["describe", "--always", "--dirty=+", "--abbrev=8"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok());

    match described {
        Some(rev) if !rev.trim().is_empty() => rev.trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed={}", BUILD_ID_VAR);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".into());

    for (key, value) in [
        ("GIT_HASH", revision()),
        ("BUILD_TIMESTAMP", stamp.to_string()),
        ("BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
