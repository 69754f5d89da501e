//! External command execution.
//!
//! Every VBoxManage invocation goes through a [`CommandRunner`], so tests can
//! substitute a scripted runner for the real tool.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;

/// Runs an external program and captures its textual output.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// Returns the combined stdout and stderr on success. A program that
    /// cannot be spawned, or exits with a nonzero status, yields
    /// [`Error::CommandFailed`] carrying whatever output was captured.
    fn run(&self, program: &Path, args: &[String]) -> Result<String>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<String> {
        let command = describe(program, args);
        tracing::trace!(command = %command, "running");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::command_failed(&command, e.to_string(), ""))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            tracing::debug!(command = %command, status = %output.status, "command failed");
            return Err(Error::command_failed(
                command,
                output.status.to_string(),
                text,
            ));
        }

        Ok(text)
    }
}

/// Short human-readable form of a command line, used in errors and logs.
///
/// Only the program's file name and the first argument (the VBoxManage
/// subcommand) are included, so guest credentials never end up in messages.
pub fn describe(program: &Path, args: &[String]) -> String {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    match args.first() {
        Some(sub) => format!("{} {}", name, sub),
        None => name,
    }
}
