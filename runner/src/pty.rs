//! PTY session multiplex.
//!
//! A runtime-local map of `sessionId -> session`. Each session owns a
//! pseudo-terminal pair and a child shell; one blocking reader task drains
//! output and feeds the data subscriber. Closing is idempotent: the done
//! flag flips once, the child is killed and reaped, and the close subscriber
//! runs exactly once in a fresh task.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use rand::RngCore;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

const DEFAULT_SHELL: &str = "/bin/bash";
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const READ_BUF_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("pty is closed")]
    Closed,

    #[error("pty error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for a new PTY session. All fields are optional.
#[derive(Debug, Default, Clone)]
pub struct PtyConfig {
    pub shell: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

type DataFn = Box<dyn Fn(&[u8]) + Send + Sync>;
type CloseFn = Box<dyn FnOnce() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    on_data: Option<DataFn>,
    on_close: Option<CloseFn>,
}

pub struct PtySession {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    subscribers: RwLock<Subscribers>,
    closed: AtomicBool,
    close_notified: AtomicBool,
    done_tx: watch::Sender<bool>,
    runtime: tokio::runtime::Handle,
}

impl PtySession {
    fn spawn(config: PtyConfig, default_dir: &Path) -> Result<Arc<Self>, PtyError> {
        let shell = config.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string());
        let cols = if config.cols == 0 { DEFAULT_COLS } else { config.cols };
        let rows = if config.rows == 0 { DEFAULT_ROWS } else { config.rows };
        let cwd = config
            .working_dir
            .unwrap_or_else(|| default_dir.to_path_buf());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Backend(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLUMNS", cols.to_string());
        cmd.env("LINES", rows.to_string());
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Backend(e.to_string()))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Backend(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Backend(e.to_string()))?;

        let (done_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            subscribers: RwLock::new(Subscribers::default()),
            closed: AtomicBool::new(false),
            close_notified: AtomicBool::new(false),
            done_tx,
            runtime: tokio::runtime::Handle::current(),
        });

        // Reader task: drains up to 4096 bytes per read until EOF or error.
        let reader_session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let subs = reader_session.subscribers.read().unwrap();
                        if let Some(on_data) = &subs.on_data {
                            on_data(&buf[..n]);
                        }
                    }
                }
            }
            reader_session.notify_closed();
        });

        Ok(session)
    }

    /// Receiver that flips to `true` when the session has closed.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    pub fn set_on_data(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.subscribers.write().unwrap().on_data = Some(Box::new(callback));
    }

    pub fn set_on_close(&self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.subscribers.write().unwrap().on_close = Some(Box::new(callback));
    }

    /// Write raw bytes to the shell's stdin.
    pub fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PtyError::Closed);
        }
        let mut guard = self.writer.lock().unwrap();
        let writer = guard.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_string(&self, input: &str) -> Result<(), PtyError> {
        self.write_input(input.as_bytes())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let guard = self.master.lock().unwrap();
        let master = guard.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Backend(e.to_string()))
    }

    /// Close the session. Idempotent: the first call kills and reaps the
    /// child and drops the device; later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the master ends the reader with EOF/error.
        *self.writer.lock().unwrap() = None;
        *self.master.lock().unwrap() = None;
        self.reap_child();
        self.notify_closed();
    }

    fn reap_child(&self) {
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Flip the done flag and run the close subscriber, exactly once.
    fn notify_closed(&self) {
        if self.close_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reap_child();
        let _ = self.done_tx.send(true);
        let on_close = self.subscribers.write().unwrap().on_close.take();
        if let Some(on_close) = on_close {
            // Fresh task so a subscriber touching the session cannot
            // re-enter our locks.
            self.runtime.spawn(async move {
                on_close();
            });
        }
    }
}

/// Map of live PTY sessions for one runtime.
pub struct PtyManager {
    sessions: RwLock<HashMap<String, Arc<PtySession>>>,
    default_dir: PathBuf,
}

impl PtyManager {
    pub fn new(default_dir: PathBuf) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_dir,
        }
    }

    pub fn create_session(
        &self,
        session_id: &str,
        config: Option<PtyConfig>,
    ) -> Result<Arc<PtySession>, PtyError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(session_id) {
            return Err(PtyError::AlreadyExists(session_id.to_string()));
        }
        let session = PtySession::spawn(config.unwrap_or_default(), &self.default_dir)?;
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        debug!(session_id, "created pty session");
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Close and forget a session. Missing ids are ignored.
    pub fn remove_session(&self, session_id: &str) {
        let session = self.sessions.write().unwrap().remove(session_id);
        if let Some(session) = session {
            session.close();
            debug!(session_id, "removed pty session");
        }
    }

    /// Close every session. Called when the runtime shuts down.
    pub fn cleanup(&self) {
        let drained: Vec<_> = self.sessions.write().unwrap().drain().collect();
        for (_, session) in drained {
            session.close();
        }
    }
}

/// 16 random bytes, hex encoded.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn manager() -> PtyManager {
        PtyManager::new(std::env::temp_dir())
    }

    fn sh_config() -> PtyConfig {
        PtyConfig {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn session_ids_are_32_hex_chars() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let manager = manager();
        manager.create_session("dup", Some(sh_config())).unwrap();
        let err = manager.create_session("dup", Some(sh_config())).unwrap_err();
        assert!(matches!(err, PtyError::AlreadyExists(_)));
        manager.cleanup();
    }

    #[tokio::test]
    async fn shell_output_reaches_data_subscriber() {
        let manager = manager();
        let session = manager.create_session("out", Some(sh_config())).unwrap();

        let collected = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&collected);
        session.set_on_data(move |data| {
            sink.lock().unwrap().push_str(&String::from_utf8_lossy(data));
        });

        session.write_string("echo marker-$((40+2))\n").unwrap();

        let mut found = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if collected.lock().unwrap().contains("marker-42") {
                found = true;
                break;
            }
        }
        manager.remove_session("out");
        assert!(found, "expected echoed marker in pty output");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_subscriber_runs_once() {
        let manager = manager();
        let session = manager.create_session("close", Some(sh_config())).unwrap();

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        session.set_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.close();
        session.close();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.write_string("echo nope\n"),
            Err(PtyError::Closed)
        ));
        assert!(matches!(session.resize(100, 40), Err(PtyError::Closed)));
    }

    #[tokio::test]
    async fn done_flag_flips_when_shell_exits() {
        let manager = manager();
        let session = manager.create_session("exit", Some(sh_config())).unwrap();
        let mut done = session.done();

        session.write_string("exit\n").unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("session did not close after shell exit");
    }
}
