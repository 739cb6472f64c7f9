//! Spawn, track, and terminate external decoder tools, including
//! multi-process pipelines.
//!
//! The fast-fail retry window is grounded on `BeastClient::
//! start_jetstream_with_shutdown`'s `tokio::select!` over a work future and a
//! cancellation signal; the actual child invocation generalizes
//! `WsprdWrapper::decode_wav`'s one-shot `Command::new(...).output()` call
//! into a long-running supervised child. Process-group creation and
//! group-wide signaling reuse `libc`, already a dependency for
//! `instance_lock.rs`'s `flock` calls.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};

/// What to do with a child's stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Stdout,
    Stderr,
    Both,
    None,
}

/// Opaque identifier for a spawned process (or pipeline) registered with the
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Construct a handle for tests that need to exercise handle-bearing
    /// state without going through a real spawn.
    #[cfg(any(test, feature = "test-support"))]
    pub fn new(id: u64) -> Self {
        Handle(id)
    }
}

struct Supervised {
    children: Vec<Child>,
}

/// Spawns, tracks, and terminates external tools.
///
/// Every spawned handle lives in `registry` until `terminate`/`terminate_all`
/// removes it, so a shutdown hook can always find and kill orphans.
pub struct ProcessSupervisor {
    registry: Mutex<HashMap<u64, Supervised>>,
    next_id: AtomicU64,
    termination_grace: Duration,
}

/// Output captured from a child during its fast-fail window, or drained
/// continuously by a reader task for the lifetime of the process.
pub struct CapturedStream {
    pub handle: Handle,
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
}

impl ProcessSupervisor {
    pub fn new(termination_grace: Duration) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            termination_grace,
        }
    }

    /// Start a single child process in its own process group. Returns the
    /// handle plus, if requested, the captured stream(s) as byte readers.
    /// Uncaptured streams are routed to the discard sink.
    pub fn spawn(
        &self,
        argv: &[String],
        capture: Capture,
    ) -> CoreResult<(Handle, Option<Box<dyn AsyncRead + Unpin + Send>>, Option<Box<dyn AsyncRead + Unpin + Send>>)> {
        let (argv0, args) = argv
            .split_first()
            .ok_or_else(|| CoreError::Internal("empty argv".to_string()))?;

        let mut cmd = Command::new(argv0);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(match capture {
            Capture::Stdout | Capture::Both => Stdio::piped(),
            _ => Stdio::null(),
        });
        cmd.stderr(match capture {
            Capture::Stderr | Capture::Both => Stdio::piped(),
            _ => Stdio::null(),
        });
        set_new_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| CoreError::SpawnFailed {
            message: e.to_string(),
        })?;

        let stdout = child.stdout.take().map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>);
        let stderr = child.stderr.take().map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .lock()
            .expect("supervisor mutex poisoned")
            .insert(id, Supervised { children: vec![child] });

        info!(argv = ?argv, handle = id, "spawned process");
        Ok((Handle(id), stdout, stderr))
    }

    /// Start N processes, connecting stdout(i) -> stdin(i+1). The parent's
    /// handle to each intermediate stdout is dropped immediately after the
    /// downstream process inherits it, so SIGPIPE propagates correctly when
    /// an upstream exits. The first stage's stderr is captured the same way
    /// `spawn` captures a single process's, so `fast_fail_check` has
    /// something to read for pipeline modes (e.g. UAT's `dump978-fa |
    /// uat2json`, where a bad device argument fails in the first stage).
    pub fn spawn_pipeline(
        &self,
        argvs: &[Vec<String>],
        capture_final_stdout: bool,
    ) -> CoreResult<(
        Handle,
        Option<Box<dyn AsyncRead + Unpin + Send>>,
        Option<Box<dyn AsyncRead + Unpin + Send>>,
    )> {
        if argvs.is_empty() {
            return Err(CoreError::Internal("empty pipeline".to_string()));
        }

        let mut children = Vec::with_capacity(argvs.len());
        let mut next_stdin: Option<Stdio> = None;
        let mut final_stdout: Option<Box<dyn AsyncRead + Unpin + Send>> = None;
        let mut first_stderr: Option<Box<dyn AsyncRead + Unpin + Send>> = None;

        for (i, argv) in argvs.iter().enumerate() {
            let (argv0, args) = argv
                .split_first()
                .ok_or_else(|| CoreError::Internal("empty argv in pipeline".to_string()))?;
            let is_last = i == argvs.len() - 1;
            let is_first = i == 0;

            let mut cmd = Command::new(argv0);
            cmd.args(args);
            cmd.stdin(next_stdin.take().unwrap_or_else(Stdio::null));
            cmd.stdout(if is_last && !capture_final_stdout {
                Stdio::null()
            } else {
                Stdio::piped()
            });
            cmd.stderr(if is_first { Stdio::piped() } else { Stdio::null() });
            set_new_process_group(&mut cmd);

            let mut child = cmd.spawn().map_err(|e| CoreError::SpawnFailed {
                message: format!("pipeline stage {i} ({argv0}): {e}"),
            })?;

            if is_first {
                first_stderr = child.stderr.take().map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>);
            }

            let stdout = child.stdout.take();
            if is_last {
                if capture_final_stdout {
                    final_stdout = stdout.map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>);
                }
            } else {
                // Hand this stage's stdout to the next stage's stdin. Converting
                // the tokio handle into a std::process::Stdio consumes the
                // parent's only copy of the fd, so EOF/SIGPIPE propagate once
                // the upstream exits.
                let stdio = match stdout {
                    Some(s) => s.try_into().map_err(|e| {
                        CoreError::Internal(format!(
                            "pipeline stage {i}: failed to convert stdout to stdio: {e}"
                        ))
                    })?,
                    None => Stdio::null(),
                };
                next_stdin = Some(stdio);
            }

            children.push(child);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .lock()
            .expect("supervisor mutex poisoned")
            .insert(id, Supervised { children });

        info!(stages = argvs.len(), handle = id, "spawned pipeline");
        Ok((Handle(id), final_stdout, first_stderr))
    }

    /// Wait `window` and check liveness. Returns `Ok(())` if the process
    /// survived, or `Err(FastFailExit)` with the stderr tail if it already
    /// exited.
    pub async fn fast_fail_check<R: AsyncRead + Unpin>(
        &self,
        handle: Handle,
        window: Duration,
        stderr: Option<&mut R>,
    ) -> CoreResult<()> {
        let mut stderr_tail = String::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr);
            let _ = timeout(window, async {
                let mut buf = Vec::new();
                let _ = tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await;
                buf.truncate(500);
                stderr_tail = String::from_utf8_lossy(&buf).to_string();
            })
            .await;
        } else {
            tokio::time::sleep(window).await;
        }

        match self.poll(handle) {
            PollResult::Running => Ok(()),
            PollResult::Exited(_) => {
                warn!(handle = handle.0, stderr = %stderr_tail, "fast-fail: child exited during startup window");
                Err(CoreError::FastFailExit { stderr_tail })
            }
            PollResult::Missing => Err(CoreError::Internal(
                "fast-fail check on unregistered handle".to_string(),
            )),
        }
    }

    /// Non-blocking status of every process in the handle's group. Reports
    /// `Exited` if any stage has exited (sufficient for the fast-fail check;
    /// pipelines fail closed together).
    pub fn poll(&self, handle: Handle) -> PollResult {
        let mut registry = self.registry.lock().expect("supervisor mutex poisoned");
        match registry.get_mut(&handle.0) {
            None => PollResult::Missing,
            Some(supervised) => {
                for child in &mut supervised.children {
                    match child.try_wait() {
                        Ok(Some(status)) => return PollResult::Exited(status.code()),
                        Ok(None) => continue,
                        Err(_) => return PollResult::Exited(None),
                    }
                }
                PollResult::Running
            }
        }
    }

    /// Send a graceful termination signal to every process group registered
    /// under `handle`; wait up to the configured grace period; if still
    /// alive, send a kill signal; reap; unregister.
    pub async fn terminate(&self, handle: Handle) {
        let pids: Vec<u32> = {
            let registry = self.registry.lock().expect("supervisor mutex poisoned");
            match registry.get(&handle.0) {
                Some(s) => s.children.iter().filter_map(|c| c.id()).collect(),
                None => return,
            }
        };

        for pid in &pids {
            signal_process_group(*pid, libc::SIGTERM);
        }

        let deadline = tokio::time::Instant::now() + self.termination_grace;
        loop {
            if matches!(self.poll(handle), PollResult::Exited(_) | PollResult::Missing) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                for pid in &pids {
                    signal_process_group(*pid, libc::SIGKILL);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut registry = self.registry.lock().expect("supervisor mutex poisoned");
        if let Some(mut supervised) = registry.remove(&handle.0) {
            for child in &mut supervised.children {
                let _ = child.start_kill();
                let _ = child.try_wait();
            }
        }
        metrics::counter!("supervisor.terminate").increment(1);
        debug!(handle = handle.0, "terminated and unregistered");
    }

    /// Terminate every supervised handle in reverse spawn order.
    pub async fn terminate_all(&self) -> usize {
        let mut ids: Vec<u64> = self
            .registry
            .lock()
            .expect("supervisor mutex poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        let count = ids.len();
        for id in ids {
            self.terminate(Handle(id)).await;
        }
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Running,
    Exited(Option<i32>),
    Missing,
}

/// Put the child in a new process group whose pgid equals its pid, so the
/// whole group (including grandchildren) can be signaled at once.
fn set_new_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn signal_process_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

/// Read a line-delimited stream, invoking `on_line` for each trimmed,
/// non-empty line. Returns when the stream hits EOF.
pub async fn drain_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    on_line(trimmed);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading captured stream");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_poll_running_then_exited() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 0.2".to_string()];
        let (handle, _stdout, _stderr) = supervisor.spawn(&argv, Capture::None).unwrap();
        assert_eq!(supervisor.poll(handle), PollResult::Running);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(supervisor.poll(handle), PollResult::Exited(_)));
    }

    #[tokio::test]
    async fn fast_fail_detects_immediate_exit() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo device not found 1>&2; exit 1".to_string(),
        ];
        let (handle, _stdout, stderr) = supervisor.spawn(&argv, Capture::Stderr).unwrap();
        let mut stderr = stderr.unwrap();
        let result = supervisor
            .fast_fail_check(handle, Duration::from_millis(100), Some(&mut stderr))
            .await;
        match result {
            Err(CoreError::FastFailExit { stderr_tail }) => {
                assert!(stderr_tail.contains("device not found"));
            }
            other => panic!("expected FastFailExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_fail_passes_for_long_running_child() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let (handle, _stdout, _stderr) = supervisor.spawn(&argv, Capture::None).unwrap();
        let result = supervisor
            .fast_fail_check::<tokio::process::ChildStderr>(handle, Duration::from_millis(50), None)
            .await;
        assert!(result.is_ok());
        supervisor.terminate(handle).await;
    }

    #[tokio::test]
    async fn terminate_reaps_and_unregisters() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(100));
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let (handle, _stdout, _stderr) = supervisor.spawn(&argv, Capture::None).unwrap();
        supervisor.terminate(handle).await;
        assert_eq!(supervisor.poll(handle), PollResult::Missing);
    }

    #[tokio::test]
    async fn terminate_all_clears_registry() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(100));
        for _ in 0..3 {
            let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
            supervisor.spawn(&argv, Capture::None).unwrap();
        }
        let count = supervisor.terminate_all().await;
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn no_pipe_deadlock_on_large_output() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        // stand-in child writing >10MB, forcing multiple pipe-buffer fills
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "head -c 12000000 /dev/zero | tr '\\0' 'a'".to_string(),
        ];
        let (_handle, stdout, _stderr) = supervisor.spawn(&argv, Capture::Stdout).unwrap();
        let mut stdout = stdout.unwrap();
        let mut total = 0usize;
        let mut buf = [0u8; 65536];
        loop {
            let n = tokio::io::AsyncReadExt::read(&mut stdout, &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert!(total >= 12_000_000);
    }
}
