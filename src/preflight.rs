#![forbid(unsafe_code)]

//! Startup checks run before the listener is bound.

use std::{
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the proxy is started as root. The extraction backend is
/// an external program that talks to the network, so it runs unprivileged.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Runs `<program> --version` and requires a successful exit.
pub fn ensure_extractor_available(program: &Path) -> Result<()> {
    let status = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => bail!(
            "{} is installed but `--version` failed ({status})",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {err}",
            program.display()
        ),
    }
}
