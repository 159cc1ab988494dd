// PTY runtime for one session incarnation
//
// Wraps portable-pty for the worker:
// - Spawning the shell inside a PTY
// - Streaming output chunks to the event loop
// - Serializing writes through a writer thread
// - Reporting exit, or killing the shell on request

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const DEFAULT_COLS: u16 = 120;
const DEFAULT_ROWS: u16 = 40;

/// How often the wait thread polls the child for exit
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events emitted by the PTY runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// PTY produced output
    Output(Vec<u8>),
    /// Shell process exited on its own
    Exited { exit_code: Option<i32> },
}

/// What to run inside the PTY
#[derive(Debug, Clone)]
pub struct ShellSpec {
    pub shell: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

impl ShellSpec {
    pub fn new(shell: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            cwd: cwd.into(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Handle for writing to and controlling a PTY session
pub struct PtyRuntime {
    /// Channel for sending input to the PTY writer thread
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Shutdown signal for the wait thread
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Flag indicating if the shell is still alive
    alive: Arc<AtomicBool>,
    child_pid: Option<u32>,
}

impl PtyRuntime {
    /// Spawn the shell (no arguments) in a fresh PTY
    ///
    /// The child inherits this process's environment plus `TERM=xterm-256color`.
    /// Events arrive on the returned receiver in the order each thread saw them;
    /// trailing output may still arrive after `Exited`.
    pub fn spawn(spec: &ShellSpec) -> Result<(Self, mpsc::UnboundedReceiver<PtyEvent>)> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let portable_pty::PtyPair { master, slave } = pair;

        let mut cmd = CommandBuilder::new(&spec.shell);
        cmd.cwd(&spec.cwd);
        cmd.env("TERM", "xterm-256color");

        let child = slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn shell process {}", spec.shell))?;
        // Keeping the slave open would hide EOF from the reader
        drop(slave);

        let child_pid = child.process_id();
        let killer = child.clone_killer();

        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<PtyEvent>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let alive = Arc::new(AtomicBool::new(true));

        let reader = master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = master.take_writer().context("Failed to take PTY writer")?;

        Self::spawn_reader_thread(reader, event_tx.clone(), master);
        Self::spawn_writer_thread(writer, input_rx, Arc::clone(&alive));
        Self::spawn_wait_thread(child, event_tx, shutdown_rx, Arc::clone(&alive));

        Ok((
            Self {
                input_tx,
                killer: StdMutex::new(killer),
                shutdown_tx: Some(shutdown_tx),
                alive,
                child_pid,
            },
            event_rx,
        ))
    }

    /// Read PTY output until EOF
    ///
    /// The master handle lives here so the PTY stays open as long as output
    /// can still be read.
    fn spawn_reader_thread(
        mut reader: Box<dyn Read + Send>,
        event_tx: mpsc::UnboundedSender<PtyEvent>,
        master: Box<dyn portable_pty::MasterPty + Send>,
    ) {
        std::thread::spawn(move || {
            let _master = master;
            let mut buf = [0u8; 4096];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if event_tx.send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO once the shell side closes
                        tracing::debug!(error = %e, "PTY reader finished");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_writer_thread(
        mut writer: Box<dyn Write + Send>,
        mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        alive: Arc<AtomicBool>,
    ) {
        std::thread::spawn(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = writer.write_all(&data) {
                    tracing::warn!(error = %e, "PTY write failed");
                    break;
                }
                let _ = writer.flush();
            }
        });
    }

    fn spawn_wait_thread(
        mut child: Box<dyn portable_pty::Child + Send + Sync>,
        event_tx: mpsc::UnboundedSender<PtyEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
        alive: Arc<AtomicBool>,
    ) {
        std::thread::spawn(move || loop {
            match shutdown_rx.try_recv() {
                Ok(_) | Err(oneshot::error::TryRecvError::Closed) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    alive.store(false, Ordering::SeqCst);
                    break;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    alive.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(PtyEvent::Exited {
                        exit_code: Some(status.exit_code() as i32),
                    });
                    break;
                }
                Ok(None) => std::thread::sleep(WAIT_POLL_INTERVAL),
                Err(e) => {
                    tracing::warn!(error = %e, "error waiting for shell");
                    alive.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(PtyEvent::Exited { exit_code: None });
                    break;
                }
            }
        });
    }

    /// PID of the shell process
    pub fn pid(&self) -> Option<u32> {
        self.child_pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue bytes for the writer thread; order is preserved
    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.input_tx
            .send(data.into())
            .map_err(|_| anyhow::anyhow!("PTY writer has shut down"))
    }

    /// Kill the shell right away
    pub fn kill(&mut self) {
        if let Ok(mut killer) = self.killer.lock() {
            if let Err(e) = killer.kill() {
                tracing::debug!(error = %e, "shell already gone");
            }
        }
        self.stop();
    }

    /// Stop the wait thread; it kills the shell if still running
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for PtyRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
