//! Running backup commands inside containers.
//!
//! Commands are argument vectors handed to `kubectl exec`; nothing is ever
//! interpolated into a local shell line.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use yansi::{Color, Paint};

use crate::config::Config;
use crate::error::{Error, Result};

/// Where the captured stdout of a backup command goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Written to the file as is.
    File(PathBuf),
    /// Compressed locally with `gzip` on the way to the file.
    Gzip(PathBuf),
    /// Merged into the log file together with stderr.
    Log,
}

/// One command to run in one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub argv: Vec<String>,
    pub stdout: OutputTarget,
}

impl Invocation {
    /// Arguments for the cluster CLI, without the binary itself.
    pub fn exec_args(&self, global_args: &[String]) -> Vec<String> {
        let mut args = global_args.to_vec();
        args.extend(
            [
                "exec",
                "-n",
                self.namespace.as_str(),
                self.pod.as_str(),
                "-c",
                self.container.as_str(),
                "--",
            ]
            .map(String::from),
        );
        args.extend(self.argv.iter().cloned());
        args
    }

    /// Human readable, copy-pasteable form of the command including redirections.
    pub fn render(&self, kubectl: &str, global_args: &[String], log: &Path) -> String {
        let mut line = std::iter::once(kubectl.to_string())
            .chain(self.exec_args(global_args))
            .map(|x| shell_quote(&x))
            .collect::<Vec<_>>()
            .join(" ");

        let log = shell_quote(&log.display().to_string());
        match &self.stdout {
            OutputTarget::File(path) => {
                line.push_str(&format!(
                    " 2> {log} > {}",
                    shell_quote(&path.display().to_string())
                ));
            }
            OutputTarget::Gzip(path) => {
                line.push_str(&format!(
                    " 2> {log} | gzip > {}",
                    shell_quote(&path.display().to_string())
                ));
            }
            OutputTarget::Log => line.push_str(&format!(" > {log} 2>&1")),
        }
        line
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    /// Killed by a signal.
    Signaled,
    /// Exceeded the configured timeout and was killed.
    TimedOut,
}

impl RunStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    fn from_exit(status: ExitStatus) -> Self {
        status.code().map(Self::Exited).unwrap_or(Self::Signaled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled => f.write_str("killed by signal"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Capability to run a command inside a container.
pub trait CommandRunner {
    /// The line recorded in the `.cmd` audit file.
    fn describe(&self, invocation: &Invocation, log: &Path) -> String;

    /// Run the command, stderr goes to `log`.
    fn run(&self, invocation: &Invocation, log: &Path) -> Result<RunStatus>;
}

pub fn runner_from_config(conf: &Config) -> Box<dyn CommandRunner> {
    if conf.dry_run {
        log::warn!("Running in dry run mode. No backup commands will be executed.");
        Box::new(MockRunner::new(&conf.kubectl).with_global_args(&conf.kubectl_args))
    } else {
        Box::new(KubectlRunner::new(conf))
    }
}

/// Time gzip gets to finish after the producer exited.
const GZIP_FLUSH: Duration = Duration::from_secs(30);

/// Executes through `kubectl exec` (or a compatible CLI such as `oc`).
pub struct KubectlRunner {
    kubectl: String,
    global_args: Vec<String>,
    timeout: Option<Duration>,
}

impl KubectlRunner {
    pub fn new(conf: &Config) -> Self {
        Self {
            kubectl: conf.kubectl.clone(),
            global_args: conf.kubectl_args.clone(),
            timeout: conf.command_timeout(),
        }
    }

    fn spawn(&self, cmd: &mut Command, program: &str) -> Result<Child> {
        cmd.spawn().map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })
    }
}

impl CommandRunner for KubectlRunner {
    fn describe(&self, invocation: &Invocation, log: &Path) -> String {
        invocation.render(&self.kubectl, &self.global_args, log)
    }

    fn run(&self, invocation: &Invocation, log: &Path) -> Result<RunStatus> {
        log::debug!(
            "--> {}",
            self.describe(invocation, log).paint(Color::Blue)
        );

        let log_file = File::create(log).map_err(|e| Error::io(log, e))?;
        let stderr = log_file.try_clone().map_err(|e| Error::io(log, e))?;

        let mut cmd = Command::new(&self.kubectl);
        cmd.args(invocation.exec_args(&self.global_args))
            .stdin(Stdio::null())
            .stderr(stderr);

        let deadline = self.timeout.map(|t| Instant::now() + t);

        match &invocation.stdout {
            OutputTarget::File(path) => {
                let out = File::create(path).map_err(|e| Error::io(path, e))?;
                cmd.stdout(out);
                let mut child = self.spawn(&mut cmd, &self.kubectl)?;
                wait_until(&mut child, deadline).map_err(|e| Error::io(log, e))
            }
            OutputTarget::Log => {
                cmd.stdout(log_file);
                let mut child = self.spawn(&mut cmd, &self.kubectl)?;
                wait_until(&mut child, deadline).map_err(|e| Error::io(log, e))
            }
            OutputTarget::Gzip(path) => {
                let out = File::create(path).map_err(|e| Error::io(path, e))?;
                cmd.stdout(Stdio::piped());
                let mut child = self.spawn(&mut cmd, &self.kubectl)?;

                let Some(pipe) = child.stdout.take() else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::io(path, std::io::Error::other("stdout not captured")));
                };

                let mut gzip = Command::new("gzip");
                gzip.arg("-c")
                    .stdin(Stdio::from(pipe))
                    .stdout(out)
                    .stderr(log_file);
                let mut gzip = match self.spawn(&mut gzip, "gzip") {
                    Ok(gzip) => gzip,
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e);
                    }
                };

                let status = wait_until(&mut child, deadline).map_err(|e| Error::io(log, e))?;
                // gzip sees EOF once the producer is gone
                let flush = deadline.map(|d| d.max(Instant::now()) + GZIP_FLUSH);
                let gzip_status = wait_until(&mut gzip, flush).map_err(|e| Error::io(log, e))?;

                if status.success() {
                    Ok(gzip_status)
                } else {
                    Ok(status)
                }
            }
        }
    }
}

/// Wait for `child`, killing it once `deadline` has passed.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> std::io::Result<RunStatus> {
    let Some(deadline) = deadline else {
        return child.wait().map(RunStatus::from_exit);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(RunStatus::from_exit(status));
        }

        if Instant::now() >= deadline {
            log::error!("Command (pid {}) timed out, killing it", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(RunStatus::TimedOut);
        }

        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Pretends every command succeeded without contacting any workload.
///
/// Output files are still created (empty) so the directory tree looks like
/// a real run. Individual containers can be scripted to fail.
pub struct MockRunner {
    kubectl: String,
    global_args: Vec<String>,
    failures: Vec<(String, RunStatus)>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new(kubectl: &str) -> Self {
        Self {
            kubectl: kubectl.to_string(),
            global_args: Vec::new(),
            failures: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Global cluster CLI arguments shown in the recorded command line.
    pub fn with_global_args(mut self, args: &[String]) -> Self {
        self.global_args = args.to_vec();
        self
    }

    /// Make every command run in `container` end with `status`.
    pub fn fail_container(mut self, container: &str, status: RunStatus) -> Self {
        self.failures.push((container.to_string(), status));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|x| x.clone()).unwrap_or_default()
    }
}

impl CommandRunner for MockRunner {
    fn describe(&self, invocation: &Invocation, log: &Path) -> String {
        invocation.render(&self.kubectl, &self.global_args, log)
    }

    fn run(&self, invocation: &Invocation, log: &Path) -> Result<RunStatus> {
        log::info!("Mocking success from: {}", self.describe(invocation, log));

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        File::create(log).map_err(|e| Error::io(log, e))?;
        match &invocation.stdout {
            OutputTarget::File(path) | OutputTarget::Gzip(path) => {
                File::create(path).map_err(|e| Error::io(path, e))?;
            }
            OutputTarget::Log => {}
        }

        Ok(self
            .failures
            .iter()
            .find(|(c, _)| *c == invocation.container)
            .map(|(_, status)| *status)
            .unwrap_or(RunStatus::Exited(0)))
    }
}
