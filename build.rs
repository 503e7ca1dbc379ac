use std::process::Command;

fn main() {
    // Short commit hash shown by `examlock --version`
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output();

    let git_hash = match output {
        Ok(output) if output.status.success() => {
            String::from_utf8(output.stdout).unwrap_or_else(|_| "unknown".to_string())
        }
        _ => "unknown".to_string(),
    };

    println!("cargo:rustc-env=EXAMLOCK_GIT_HASH={}", git_hash.trim());

    // Release pipelines may stamp a version; otherwise use Cargo.toml's
    let version = std::env::var("EXAMLOCK_VERSION")
        .or_else(|_| std::env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=EXAMLOCK_BUILD_VERSION={}", version);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=EXAMLOCK_VERSION");
}
