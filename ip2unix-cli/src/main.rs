//! Launcher for the ip2unix interposition layer.
//!
//! Validates a rule file and then replaces itself with the target program,
//! with `LD_PRELOAD` pointing at the shared object and `IP2UNIX_RULE_FILE`
//! exported, so the program's IP sockets get redirected from its very first
//! instruction.
//!
//! # Usage
//!
//! ```bash
//! ip2unix rules.json ./server --port 8080
//! ip2unix --check rules.json
//! ip2unix --print rules.json ./server
//! ```

// CLI tools need to print to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::env;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

/// Turn IP sockets into UNIX domain sockets for PROGRAM according to the
/// rules in RULE_FILE.
#[derive(Parser, Debug)]
#[command(name = "ip2unix", version, about)]
struct Args {
    /// Validate the rule file and exit.
    #[arg(short, long)]
    check: bool,

    /// Print the parsed rule table.
    #[arg(short, long)]
    print: bool,

    /// Path to the preloadable shared object; defaults to the
    /// IP2UNIX_LIBRARY environment variable, then to libip2unix.so next to
    /// this executable.
    #[arg(long)]
    library: Option<PathBuf>,

    /// Rule file (a JSON array of rule objects).
    rule_file: PathBuf,

    /// Program to run, followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let rules = ip2unix::rules::parse_rules_file(&args.rule_file)
        .with_context(|| format!("invalid rule file {}", args.rule_file.display()))?;

    if args.print {
        print!("{}", ip2unix::rules::render_rules(&rules));
    }
    if args.check {
        return Ok(());
    }
    if args.command.is_empty() {
        bail!("no program to execute specified");
    }

    let library = locate_library(args.library)?;
    let preload = match env::var("LD_PRELOAD") {
        Ok(existing) if !existing.is_empty() => format!("{}:{existing}", library.display()),
        _ => library.display().to_string(),
    };

    // exec() only returns on failure.
    let err = Command::new(&args.command[0])
        .args(&args.command[1..])
        .env("LD_PRELOAD", preload)
        .env("IP2UNIX_RULE_FILE", &args.rule_file)
        .exec();
    Err(err).with_context(|| format!("failed to execute \"{}\"", args.command[0]))
}

/// Finds the shared object to preload: an explicit `--library` wins, then
/// the `IP2UNIX_LIBRARY` environment variable, then a `libip2unix.so`
/// sitting next to this executable (the layout `cargo build` produces).
fn locate_library(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let candidate = if let Some(path) = explicit {
        path
    } else if let Some(path) = env::var_os("IP2UNIX_LIBRARY") {
        PathBuf::from(path)
    } else {
        let exe = env::current_exe().context("cannot determine own executable path")?;
        exe.parent()
            .map(|dir| dir.join("libip2unix.so"))
            .context("own executable path has no parent directory")?
    };

    if !candidate.exists() {
        bail!(
            "cannot find the preload library at {}; pass --library or set IP2UNIX_LIBRARY",
            candidate.display()
        );
    }
    Ok(candidate)
}
