use yansi::{Color, Paint};

pub mod backup;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod layout;
pub mod lock;
pub mod notify;
pub mod plan;
pub mod procedure;
pub mod purge;
pub mod runner;
pub mod server;
pub mod success;

pub use error::{Error, Result};

/// Run a local command to completion and capture its output.
///
/// Returns `(stdout, stderr, exit code)`. A process killed by a signal
/// reports exit code `-1`.
pub fn run_command(cmd: &[&str]) -> Result<(String, String, i32)> {
    log::debug!("--> {}", cmd.join(" ").paint(Color::Blue));

    let Some((program, args)) = cmd.split_first() else {
        return Err(Error::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let output = std::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

    let code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        log::error!(
            "{} Command {} returned with non zero exit code.",
            "Error:".paint(Color::Red),
            cmd.join(" ")
        );
    }

    Ok((
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        code,
    ))
}
