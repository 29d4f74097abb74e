//! Scoped subprocess execution.
//!
//! Every external tool (yt-dlp, ffprobe, ffmpeg, whisper engines) goes through
//! [`run`]. Each child leads its own process group. Dropping the future
//! (deadline at an outer level, client disconnect) kills the whole group, and
//! a budget that runs out inside [`run`] kills the group and reaps the child
//! before returning. Helpers the tool started itself, such as the ffmpeg
//! yt-dlp uses for merging, go down with it.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT_CHARS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} not found, is it installed and on PATH?")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} ran out of time and was killed")]
    TimedOut { program: String },

    #[error("I/O error while running {program}: {source}")]
    Io { program: String, source: io::Error },
}

impl ProcessError {
    /// stderr of a failed run, empty for every other variant.
    pub fn stderr(&self) -> &str {
        match self {
            ProcessError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `command` to completion or until `until`, whichever comes first.
///
/// stdin is closed and both output pipes are drained concurrently so a chatty
/// child cannot block on a full pipe.
pub async fn run(mut command: Command, until: Instant) -> Result<ProcessOutput, ProcessError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ProcessError::NotFound { program: program.clone() }
        } else {
            ProcessError::Spawn { program: program.clone(), source }
        }
    })?;
    debug!(program = %program, pid = ?child.id(), "subprocess started");
    // Declared after `child` so it drops first, while the leader is unreaped
    let mut group = ProcessGroup::new(child.id(), &program);

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let finished = tokio::time::timeout_at(until, async {
        let (out, err, status) = tokio::join!(
            drain(stdout.as_mut()),
            drain(stderr.as_mut()),
            child.wait()
        );
        Ok::<_, io::Error>((out?, err?, status?))
    })
    .await;

    match finished {
        Err(_elapsed) => {
            group.kill();
            terminate(&mut child, &program).await;
            Err(ProcessError::TimedOut { program })
        }
        Ok(Err(source)) => {
            group.kill();
            terminate(&mut child, &program).await;
            Err(ProcessError::Io { program, source })
        }
        Ok(Ok((stdout, stderr, status))) => {
            group.disarm();
            debug!(program = %program, status = %status, "subprocess exited");
            if status.success() {
                Ok(ProcessOutput { stdout, stderr })
            } else {
                Err(ProcessError::Failed {
                    program,
                    status,
                    stderr: excerpt(&stderr),
                })
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// The process group led by a spawned child. Killed on drop unless disarmed.
///
/// Only signalled while the leader is unreaped, so the group id cannot have
/// been recycled.
struct ProcessGroup {
    pgid: Option<Pid>,
    program: String,
}

impl ProcessGroup {
    fn new(pid: Option<u32>, program: &str) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
            program: program.to_string(),
        }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(program = %self.program, pgid = %pgid, "process group killed"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(program = %self.program, pgid = %pgid, error = %e, "failed to kill process group"),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill and reap, so no zombie or runaway child outlives the call.
async fn terminate(child: &mut Child, program: &str) {
    let pid = child.id();
    match child.kill().await {
        Ok(()) => warn!(program = %program, pid = ?pid, "subprocess killed"),
        Err(e) => warn!(program = %program, pid = ?pid, error = %e, "failed to kill subprocess"),
    }
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    // Tools print progress first and the actual error last
    let skip = trimmed.chars().count().saturating_sub(STDERR_EXCERPT_CHARS);
    trimmed.chars().skip(skip).collect()
}

/// Locate an executable the way the shell would, for health reporting.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
