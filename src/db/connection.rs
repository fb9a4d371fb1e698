use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "journal";

use crate::{log_error, log_info, log_warn};

const MEMORY_PATH: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Stops the worker when the last [`Database`] clone goes away.
struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.jobs.send(Message::Stop).is_err() {
            log_warn!("journal worker already gone at shutdown");
        }
        if handle.join().is_err() {
            log_error!("journal worker panicked");
        }
    }
}

/// Handle to the SQLite journal. Statements run one at a time on a
/// dedicated thread; callers await the result.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

fn open(path: &Path) -> Result<Connection> {
    let mut conn = if path.as_os_str() == MEMORY_PATH {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    }
    .with_context(|| format!("failed to open journal {}", path.display()))?;

    // In-memory databases stay in MEMORY journal mode.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log_warn!("WAL mode unavailable: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    run_migrations(&mut conn).context("failed to migrate journal schema")?;
    Ok(conn)
}

impl Database {
    /// Opens (or creates) the journal and brings its schema up to date.
    /// `":memory:"` gives a throwaway database.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create journal directory {}", parent.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("rollerline-db".into())
            .spawn(move || {
                let mut conn = match open(&thread_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(Message::Run(job)) = jobs_rx.recv() {
                    job(&mut conn);
                }
                log_info!("journal worker stopped");
            })
            .context("failed to spawn journal worker")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("journal worker exited during startup"))??;
        log_info!("journal ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(PathBuf::from(MEMORY_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `task` on the journal thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; nothing to report then.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("journal worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("journal worker stopped before replying"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn statements_run_on_the_worker() {
        let db = Database::in_memory().unwrap();
        let thread_name = db
            .execute(|_conn| Ok(thread::current().name().map(str::to_string)))
            .await
            .unwrap();
        assert_eq!(thread_name.as_deref(), Some("rollerline-db"));

        let err = db
            .execute(|conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                Ok(())
            })
            .await;
        assert!(err.is_err());
    }

    #[test]
    fn file_journal_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("rollerline-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("journal.sqlite3");
        let db = Database::new(path.clone()).unwrap();
        assert_eq!(db.path(), path.as_path());
        assert!(path.exists());
        drop(db);
        let _ = std::fs::remove_dir_all(dir);
    }
}
