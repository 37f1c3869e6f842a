//! Stamps the binary with `BUILD_VERSION`: `<crate version>+<git hash>`,
//! or just the crate version outside a git checkout.

use std::process::Command;

fn git(args: &[&str]) -> Option<std::process::Output> {
    Command::new("git").args(args).output().ok()
}

fn main() {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();

    let hash = git(&["rev-parse", "--short", "HEAD"])
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    let build_version = match hash {
        Some(hash) => {
            let dirty = git(&["diff", "--quiet"]).is_some_and(|o| !o.status.success());
            format!("{}+{}{}", version, hash, if dirty { ".dirty" } else { "" })
        }
        None => version,
    };

    println!("cargo:rustc-env=BUILD_VERSION={}", build_version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
