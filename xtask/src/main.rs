//! Build automation tasks for the rust-firebird-driver workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Crates whose unit tests make up the fast test pass.
const LIBRARY_CRATES: [&str; 4] = ["fb-protocol", "fb-codec", "fb-pool", "fb-testing"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for rust-firebird-driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, clippy, every test suite and docs
    Ci,
    /// Check formatting
    Fmt,
    /// Run clippy over all targets, denying warnings
    Clippy,
    /// Unit tests of the protocol, codec, pool and mock server crates
    Test,
    /// fb-client tests against the mock server
    Integration,
    /// Build the docs with rustdoc warnings denied
    Doc,
    /// Run the parameter buffer benchmark in fb-protocol
    Bench,
    /// Run a fuzz target for a while (requires cargo-fuzz and nightly)
    Fuzz {
        /// Target name under fuzz/fuzz_targets
        target: String,
        /// Seconds to run
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    let root = workspace_root()?;
    sh.change_dir(&root);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh)?;
            integration(&sh)?;
            doc(&sh)?;
            println!("ci: all checks passed");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::Integration => integration(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Bench => cmd!(sh, "cargo bench -p fb-protocol --bench parameter_buffer").run()?,
        Command::Fuzz { target, seconds } => fuzz(&sh, &root, &target, seconds)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;
    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("workspace manifest has no parent directory")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    for krate in LIBRARY_CRATES {
        println!("testing {krate}");
        cmd!(sh, "cargo test -p {krate}").run()?;
    }
    cmd!(sh, "cargo test -p fb-client --lib").run()?;
    Ok(())
}

fn integration(sh: &Shell) -> Result<()> {
    // pool_teardown clears the process-wide pool table and owns its binary
    cmd!(sh, "cargo test -p fb-client --tests").run()?;
    cmd!(sh, "cargo test -p fb-client --doc").run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    let _flags = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    cmd!(sh, "cargo doc --workspace --no-deps --exclude xtask").run()?;
    Ok(())
}

fn fuzz(sh: &Shell, root: &Path, target: &str, seconds: u64) -> Result<()> {
    let targets = root.join("fuzz").join("fuzz_targets");
    if !targets.join(format!("{target}.rs")).is_file() {
        let known: Vec<String> = std::fs::read_dir(&targets)
            .with_context(|| format!("cannot list {}", targets.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".rs").map(str::to_string)
            })
            .collect();
        bail!("unknown fuzz target '{target}', expected one of: {}", known.join(", "));
    }

    println!("fuzzing {target} for {seconds}s");
    let _dir = sh.push_dir("fuzz");
    let max_time = format!("-max_total_time={seconds}");
    cmd!(sh, "cargo +nightly fuzz run {target} -- {max_time}").run()?;
    Ok(())
}
