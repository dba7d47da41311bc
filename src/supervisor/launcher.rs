//! Starts the agent process with programmatic stdio.
//!
//! The agent runs in its own process group so that termination also reaches
//! any helper processes it started. Stdout and stderr share one pipe, so the
//! output keeps the order in which the agent wrote it.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::SpawnError;

const READ_BUF_SIZE: usize = 4096;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Knows how to start the agent for a given model.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    program: String,
    args: Vec<String>,
    model_flag: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl AgentLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, model_flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model_flag: model_flag.into(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let mut launcher = Self::new(
            config.program.clone(),
            config.args.clone(),
            config.model_flag.clone(),
        );
        launcher.working_dir = config.working_dir.clone();
        // Agents written in Python buffer stdout when it is a pipe, which would hide prompts.
        launcher
            .env
            .insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        launcher
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for `model`.
    pub fn command_args(&self, model: &str) -> Vec<String> {
        let mut args = self.args.clone();
        if !self.model_flag.is_empty() {
            args.push(self.model_flag.clone());
        }
        args.push(model.to_string());
        args
    }

    /// Start the agent with `model` as its startup argument.
    pub fn spawn(&self, model: &str) -> Result<AgentProcess, SpawnError> {
        let spawn_err = |e: io::Error| SpawnError::from_io(&self.program, e);
        let (reader, writer) = os_pipe::pipe().map_err(spawn_err)?;
        let stdout_writer = writer.try_clone().map_err(spawn_err)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(model))
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(stdout_writer)
            .stderr(writer)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(spawn_err)?;
        // The command still holds our copies of the write end; the reader only
        // sees EOF once they are gone.
        drop(cmd);
        let pid = child.id();

        let stdin = child.stdin.take();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        start_pump(reader, tx).map_err(spawn_err)?;

        debug!(program = %self.program, ?pid, model, "agent process spawned");
        Ok(AgentProcess {
            pid,
            child,
            input: AgentInput { stdin },
            output: AgentOutput {
                rx,
                carry: Vec::new(),
            },
        })
    }
}

#[cfg(unix)]
fn start_pump(reader: os_pipe::PipeReader, tx: mpsc::Sender<Vec<u8>>) -> io::Result<()> {
    use std::os::fd::OwnedFd;

    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    tokio::spawn(pump(receiver, tx));
    Ok(())
}

#[cfg(not(unix))]
fn start_pump(mut reader: os_pipe::PipeReader, tx: mpsc::Sender<Vec<u8>>) -> io::Result<()> {
    use std::io::Read;

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 || tx.blocking_send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });
    Ok(())
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "agent output stream closed with error");
                break;
            }
        }
    }
}

/// A spawned agent. The parts are public so that one task can wait on the
/// exit, read output and write input concurrently.
pub struct AgentProcess {
    pub pid: Option<u32>,
    pub child: Child,
    pub input: AgentInput,
    pub output: AgentOutput,
}

/// Write side of the agent's stdin. Once closed it never writes again.
pub struct AgentInput {
    stdin: Option<ChildStdin>,
}

impl AgentInput {
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "agent input is closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    pub fn close(&mut self) {
        self.stdin = None;
    }

    pub fn is_closed(&self) -> bool {
        self.stdin.is_none()
    }
}

/// Merged stdout/stderr of the agent, decoded as UTF-8.
pub struct AgentOutput {
    rx: mpsc::Receiver<Vec<u8>>,
    // Incomplete UTF-8 sequence left over from the previous chunk.
    carry: Vec<u8>,
}

impl AgentOutput {
    /// Next piece of output text, or `None` once the pipe is closed.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Some(bytes) => {
                    self.carry.extend_from_slice(&bytes);
                    let text = decode_available(&mut self.carry);
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
                None => {
                    if self.carry.is_empty() {
                        return None;
                    }
                    let rest = std::mem::take(&mut self.carry);
                    return Some(String::from_utf8_lossy(&rest).into_owned());
                }
            }
        }
    }
}

/// Decode as much of `buf` as possible, leaving a trailing partial character in place.
fn decode_available(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(s) => {
                out.push_str(s);
                buf.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        buf.drain(..valid + bad);
                    }
                    None => {
                        buf.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

/// SIGKILL every process in the group led by `pid`. A group that is already gone is not an error.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "killed agent process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill agent process group"),
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

/// Kill the agent's whole process group and reap the agent.
///
/// Input is closed first so nothing can be written after the kill.
pub async fn terminate(
    pid: Option<u32>,
    child: &mut Child,
    input: &mut AgentInput,
) -> io::Result<ExitStatus> {
    input.close();
    if let Some(pid) = pid {
        kill_group(pid);
    }

    // Covers platforms without process groups and agents that already left their group.
    if let Err(e) = child.start_kill() {
        debug!(?pid, error = %e, "agent already exited before kill");
    }
    child.wait().await
}
