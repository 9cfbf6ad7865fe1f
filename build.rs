use std::env;
use std::fs;
use std::process;

use clap_complete::{generate_to, Shell};

include!("src/bin/ta-rollback/cli.rs");

fn main() {
    // OUT_DIR is set by Cargo and it's where any additional build artifacts
    // are written.
    let outdir = match env::var_os("OUT_DIR") {
        Some(outdir) => outdir,
        None => {
            eprintln!("OUT_DIR environment variable not defined");
            process::exit(1);
        }
    };
    if let Err(err) = fs::create_dir_all(&outdir) {
        println!("cargo:warning=could not create {:?}: {}", outdir, err);
        return;
    }

    // Make the current git hash available to the build.
    if let Some(rev) = git_revision_hash() {
        println!("cargo:rustc-env=TA_ROLLBACK_BUILD_GIT_HASH={}", rev);
    }

    let mut app = app();
    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        if let Err(err) = generate_to(shell, &mut app, "ta-rollback", &outdir) {
            println!("cargo:warning=could not generate {} completions: {}", shell, err);
        }
    }
}

fn git_revision_hash() -> Option<String> {
    let result = process::Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output();
    result.ok().and_then(|output| {
        let v = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}
