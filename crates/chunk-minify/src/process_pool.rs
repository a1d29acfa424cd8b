//! Process backend: a fixed set of `ddc-cell-minify` children.
//!
//! Each worker is driven by its own task that pulls jobs off a shared queue,
//! so a free worker always picks up the next chunk. Requests go out as frames
//! on the worker's stdin; replies come back as frames on its stdout. Anything
//! else the worker prints is forwarded to our logs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cell_minify_proto::{
    Chunk, DecodeError, FrameReader, HostMessage, MinifyOutput, MinifyTask, WorkerMessage,
    write_frame,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::{PoolFactory, ShutdownReport, WorkerPool};
use crate::{Error, Result};

/// Name of the worker executable, without extension
pub const WORKER_BINARY: &str = "ddc-cell-minify";

/// How long a worker gets to exit after its stdin is closed
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Locating the worker
// ============================================================================

fn worker_executable() -> String {
    #[cfg(target_os = "windows")]
    let executable = format!("{WORKER_BINARY}.exe");
    #[cfg(not(target_os = "windows"))]
    let executable = WORKER_BINARY.to_string();
    executable
}

/// Directories searched for the worker, in order:
/// 1. `DODECA_CELL_PATH`
/// 2. next to the current executable
/// 3. `cells/` next to the current executable (installed releases)
/// 4. `target/debug` or `target/release` (development)
fn worker_search_paths() -> Vec<PathBuf> {
    let env_cell_path = std::env::var("DODECA_CELL_PATH").ok().map(PathBuf::from);

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));

    let cells_dir = exe_dir.as_ref().map(|p| p.join("cells"));

    #[cfg(debug_assertions)]
    let profile_dir = PathBuf::from("target/debug");
    #[cfg(not(debug_assertions))]
    let profile_dir = PathBuf::from("target/release");

    [env_cell_path, exe_dir, cells_dir, Some(profile_dir)]
        .into_iter()
        .flatten()
        .collect()
}

/// Find the worker executable. An explicit path is used as-is and must exist.
pub fn find_worker_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::WorkerNotFound {
            binary: path.display().to_string(),
            searched: path.display().to_string(),
        });
    }

    let executable = worker_executable();
    let search_paths = worker_search_paths();
    for dir in &search_paths {
        let path = dir.join(&executable);
        if path.is_file() {
            debug!("using minify worker {}", path.display());
            return Ok(path);
        }
    }

    Err(Error::WorkerNotFound {
        binary: executable,
        searched: search_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

// ============================================================================
// Pool
// ============================================================================

#[derive(Debug, Default)]
pub struct ProcessPoolFactory {
    worker_path: Option<PathBuf>,
}

impl ProcessPoolFactory {
    pub fn new(worker_path: Option<PathBuf>) -> Self {
        Self { worker_path }
    }
}

impl PoolFactory for ProcessPoolFactory {
    type Pool = ProcessPool;

    fn create(&self, max_workers: usize) -> Result<ProcessPool> {
        let binary = find_worker_binary(self.worker_path.as_deref())?;
        ProcessPool::spawn(binary, max_workers.max(1))
    }
}

struct Job {
    task: MinifyTask,
    reply: oneshot::Sender<Result<MinifyOutput>>,
}

pub struct ProcessPool {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    drivers: Mutex<Vec<JoinHandle<bool>>>,
}

impl ProcessPool {
    fn spawn(binary: PathBuf, max_workers: usize) -> Result<Self> {
        let workers = (0..max_workers)
            .map(|index| WorkerProcess::spawn(index, &binary))
            .collect::<Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::channel(max_workers);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let drivers = workers
            .into_iter()
            .enumerate()
            .map(|(index, worker)| {
                tokio::spawn(drive_worker(
                    index,
                    binary.clone(),
                    Some(worker),
                    Arc::clone(&rx),
                ))
            })
            .collect();

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            drivers: Mutex::new(drivers),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool for ProcessPool {
    async fn run(&self, task: MinifyTask) -> Result<MinifyOutput> {
        let jobs = lock(&self.jobs).clone().ok_or(Error::PoolClosed)?;

        let (reply, response) = oneshot::channel();
        jobs.send(Job { task, reply })
            .await
            .map_err(|_| Error::PoolClosed)?;
        drop(jobs);

        response.await.map_err(|_| Error::PoolClosed)?
    }

    async fn shutdown(&self) -> ShutdownReport {
        // Drivers finish once the queue is closed and drained.
        drop(lock(&self.jobs).take());
        let drivers = std::mem::take(&mut *lock(&self.drivers));

        let mut forced_exit = false;
        for driver in drivers {
            match driver.await {
                Ok(forced) => forced_exit |= forced,
                Err(e) => {
                    warn!("minify worker driver failed: {}", e);
                    forced_exit = true;
                }
            }
        }

        ShutdownReport { forced_exit }
    }
}

/// Feed jobs to one worker until the queue closes, replacing the worker if it
/// dies. Returns whether the worker had to be killed on the way out.
async fn drive_worker(
    index: usize,
    binary: PathBuf,
    mut worker: Option<WorkerProcess>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
) -> bool {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(Job { task, reply }) = job else {
            break;
        };

        let mut process = match worker.take() {
            Some(process) => process,
            None => match WorkerProcess::spawn(index, &binary) {
                Ok(process) => process,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    continue;
                }
            },
        };

        let result = process.connection.request(task).await;
        match &result {
            Err(e @ (Error::WorkerCrashed { .. } | Error::Protocol(_))) => {
                warn!("discarding minify worker {}: {}", index, e);
                process.kill().await;
            }
            _ => worker = Some(process),
        }

        let _ = reply.send(result);
    }

    match worker {
        Some(process) => process.shutdown().await,
        None => false,
    }
}

// ============================================================================
// Worker process
// ============================================================================

struct WorkerProcess {
    index: usize,
    child: Child,
    connection: WorkerConnection<ChildStdout, ChildStdin>,
    stderr_task: JoinHandle<()>,
}

impl WorkerProcess {
    fn spawn(index: usize, binary: &Path) -> Result<Self> {
        let mut cmd = Command::new(binary);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = ur_taking_me_with_you::spawn_dying_with_parent_async(cmd).map_err(
            |source| Error::Spawn {
                path: binary.to_path_buf(),
                source,
            },
        )?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Protocol(format!(
                "minify worker {index} was spawned without piped stdio"
            )));
        };

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::error!(target: "cell", "[minify worker {} stderr] {}", index, line);
            }
        });

        info!("launched minify worker {} (pid {:?})", index, child.id());

        Ok(Self {
            index,
            child,
            connection: WorkerConnection::new(index, stdout, stdin),
            stderr_task,
        })
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("failed to kill minify worker {}: {}", self.index, e);
        }
    }

    /// Close stdin and give the worker [`SHUTDOWN_GRACE`] to exit before
    /// killing it. Returns true if it had to be killed.
    async fn shutdown(self) -> bool {
        let WorkerProcess {
            index,
            mut child,
            connection,
            stderr_task,
        } = self;
        let WorkerConnection { mut reader, writer, .. } = connection;
        drop(writer);

        let exited = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Ok(Some(chunk)) = reader.next().await {
                if let Chunk::Text(line) = chunk {
                    forward_stdout(index, &line);
                }
            }
            child.wait().await
        })
        .await;

        let forced = match exited {
            Ok(Ok(status)) => {
                debug!("minify worker {} exited with {}", index, status);
                false
            }
            Ok(Err(e)) => {
                warn!("failed to wait for minify worker {}: {}", index, e);
                false
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill minify worker {}: {}", index, e);
                }
                true
            }
        };

        let _ = tokio::time::timeout(SHUTDOWN_GRACE, stderr_task).await;
        forced
    }
}

fn forward_stdout(index: usize, line: &str) {
    tracing::info!(target: "cell", "[minify worker {} stdout] {}", index, line);
}

// ============================================================================
// Connection
// ============================================================================

/// Request/response exchange with one worker over a byte stream pair.
pub struct WorkerConnection<R, W> {
    index: usize,
    reader: FrameReader<R>,
    writer: W,
    next_id: u64,
}

impl<R, W> WorkerConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `reader` is the worker's stdout, `writer` its stdin.
    pub fn new(index: usize, reader: R, writer: W) -> Self {
        Self {
            index,
            reader: FrameReader::new(reader),
            writer,
            next_id: 0,
        }
    }

    /// Send one task and wait for its reply. Text the worker prints in the
    /// meantime is forwarded to the log.
    pub async fn request(&mut self, task: MinifyTask) -> Result<MinifyOutput> {
        self.next_id += 1;
        let id = self.next_id;
        let index = self.index;

        let frame = HostMessage::Minify { id, task }
            .to_frame()
            .map_err(|e| Error::Protocol(e.to_string()))?;
        write_frame(&mut self.writer, &frame)
            .await
            .map_err(|e| Error::WorkerCrashed {
                index,
                reason: format!("failed to send task: {e}"),
            })?;

        loop {
            let chunk = match self.reader.next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    return Err(Error::WorkerCrashed {
                        index,
                        reason: "exited before replying".to_string(),
                    });
                }
                Err(DecodeError::Io(e)) => {
                    return Err(Error::WorkerCrashed {
                        index,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(Error::Protocol(e.to_string())),
            };

            let payload = match chunk {
                Chunk::Text(line) => {
                    forward_stdout(index, &line);
                    continue;
                }
                Chunk::Frame(payload) => payload,
            };

            let message =
                WorkerMessage::from_payload(&payload).map_err(|e| Error::Protocol(e.to_string()))?;
            if message.id() != id {
                debug!(
                    expected = id,
                    got = message.id(),
                    "ignoring stale reply from minify worker {}",
                    index
                );
                continue;
            }

            return match message {
                WorkerMessage::Done { output, .. } => Ok(output),
                WorkerMessage::Failed { message, .. } => Err(Error::Minify(message)),
            };
        }
    }
}
