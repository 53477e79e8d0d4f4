//! Embeds the git revision and build time for `/version`.

use std::process::Command;

/// Trimmed stdout of a git command, or "unknown"
fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    for (var, args) in [
        ("GIT_COMMIT_SHORT", &["rev-parse", "--short", "HEAD"][..]),
        ("GIT_COMMIT_FULL", &["rev-parse", "HEAD"][..]),
    ] {
        println!("cargo:rustc-env={}={}", var, git(args));
    }

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
}
