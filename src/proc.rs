// src/proc.rs

//! Child process execution under cancellation
//!
//! Every external process the engine spawns runs through `CommandRunner`:
//! combined stdout/stderr capture, stdin nullification to prevent hangs,
//! cooperative cancellation with SIGTERM then SIGKILL escalation, and
//! environment scrubbing so host toolchain variables cannot leak into
//! supposedly-reproducible builds.

use crate::error::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Grace period between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Poll interval while waiting on a child
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation token
///
/// Cloned freely; all clones observe the same flag. A token may also carry
/// a deadline, after which it reports itself cancelled. Timeouts and
/// explicit cancellation surface identically.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token that additionally expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    /// Signal cancellation to every holder of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Error out if cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Captured result of a finished child process
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    /// Interleaved stdout + stderr
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The last `limit` bytes of combined output, for error reporting
    pub fn tail(&self, limit: usize) -> &str {
        let bytes = self.combined.as_bytes();
        if bytes.len() <= limit {
            return &self.combined;
        }
        let mut start = bytes.len() - limit;
        while start < bytes.len() && !self.combined.is_char_boundary(start) {
            start += 1;
        }
        &self.combined[start..]
    }
}

/// Builder for one child process invocation
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    scrub_prefixes: Vec<&'static str>,
    prepend_path: Vec<PathBuf>,
    cancel: CancelToken,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, cancel: &CancelToken) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            scrub_prefixes: Vec::new(),
            prepend_path: Vec::new(),
            cancel: cancel.clone(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Drop inherited variables whose names start with any of these
    /// prefixes (e.g. `GO`, `NODE_`, `PYTHON`, `BUNDLE_`)
    pub fn scrub_env(mut self, prefixes: &[&'static str]) -> Self {
        self.scrub_prefixes.extend_from_slice(prefixes);
        self
    }

    /// Prepend directories to the child's PATH
    pub fn with_paths(mut self, paths: &[PathBuf]) -> Self {
        self.prepend_path.extend_from_slice(paths);
        self
    }

    /// Cap this invocation's runtime
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.cancel = self.cancel.with_timeout(timeout);
        self
    }

    /// The rendered command line, for error messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run and require a zero exit status
    pub fn run(self) -> Result<CommandOutput> {
        let display = self.display();
        let output = self.run_unchecked()?;
        if !output.success() {
            return Err(Error::ProcessFailed {
                command: display,
                exit_code: output.exit_code,
                output: output.tail(4096).to_string(),
            });
        }
        Ok(output)
    }

    /// Run and return the outcome regardless of exit status
    pub fn run_unchecked(self) -> Result<CommandOutput> {
        self.cancel.check()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        self.apply_env(&mut cmd);

        // stdin is nullified: build tools must never wait on a terminal
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning: {}", self.display());

        let mut child = cmd.spawn().map_err(|e| Error::ProcessFailed {
            command: self.display(),
            exit_code: None,
            output: format!("failed to spawn: {}", e),
        })?;

        let combined = Arc::new(Mutex::new(Vec::new()));
        let stdout_reader = spawn_reader(child.stdout.take(), Arc::clone(&combined));
        let stderr_reader = spawn_reader(child.stderr.take(), Arc::clone(&combined));

        let status = loop {
            if self.cancel.is_cancelled() {
                terminate(&mut child, &self.display());
                let _ = stdout_reader.map(|h| h.join());
                let _ = stderr_reader.map(|h| h.join());
                return Err(Error::Cancelled);
            }

            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => break status,
                Ok(None) => continue,
                Err(e) => {
                    terminate(&mut child, &self.display());
                    return Err(Error::Io(format!("failed to wait on child: {}", e)));
                }
            }
        };

        if let Some(handle) = stdout_reader {
            let _ = handle.join();
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.join();
        }

        let bytes = combined.lock().expect("output buffer lock").clone();
        let combined = String::from_utf8_lossy(&bytes).into_owned();

        if std::env::var_os("TSUKU_DEBUG").is_some() && !combined.is_empty() {
            debug!("output of {}:\n{}", self.display(), combined);
        }

        Ok(CommandOutput {
            exit_code: status.code(),
            combined,
        })
    }

    fn apply_env(&self, cmd: &mut Command) {
        if !self.scrub_prefixes.is_empty() {
            cmd.env_clear();
            for (key, value) in std::env::vars() {
                let scrubbed = self.scrub_prefixes.iter().any(|p| key.starts_with(p));
                if !scrubbed {
                    cmd.env(&key, &value);
                }
            }
        }

        if !self.prepend_path.is_empty() {
            let mut entries: Vec<String> = self
                .prepend_path
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            if let Ok(existing) = std::env::var("PATH") {
                entries.push(existing);
            }
            cmd.env("PATH", entries.join(":"));
        }

        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
    }
}

/// SIGTERM, wait up to the grace period, then SIGKILL
fn terminate(child: &mut std::process::Child, cmd_line: &str) {
    let pid = Pid::from_raw(child.id() as i32);
    debug!("terminating {} (pid {})", cmd_line, pid);

    if signal::kill(pid, Signal::SIGTERM).is_ok() {
        match child.wait_timeout(KILL_GRACE) {
            Ok(Some(_)) => return,
            Ok(None) => warn!("{} did not exit after SIGTERM, killing", cmd_line),
            Err(_) => {}
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
    sink: Arc<Mutex<Vec<u8>>>,
) -> Option<std::thread::JoinHandle<()>> {
    let mut source = source?;
    Some(std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut sink = sink.lock().expect("output buffer lock");
                    sink.extend_from_slice(&buf[..n]);
                }
            }
        }
    }))
}
