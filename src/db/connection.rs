use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Close,
}

/// Owns the worker thread; the last `Database` clone to drop closes it.
struct Worker {
    queue: mpsc::Sender<WorkerMessage>,
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

        if self.queue.send(WorkerMessage::Close).is_err() {
            warn!("Database worker already gone at shutdown");
        }
        if let Err(panic) = handle.join() {
            error!("Database worker panicked: {panic:?}");
        }
    }
}

/// Opens the log database and brings its schema up to date. Pragma failures
/// are logged and tolerated; migration failures are not.
fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    if let Err(err) = conn.pragma_update(None, "synchronous", "NORMAL") {
        error!("Failed to relax synchronous mode: {err}");
    }
    if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
        error!("Failed to set busy timeout: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, inbox: mpsc::Receiver<WorkerMessage>) {
    for message in inbox {
        match message {
            WorkerMessage::Run(job) => job(&mut conn),
            WorkerMessage::Close => break,
        }
    }
    info!("Database worker stopped");
}

/// Handle to the single database thread.
///
/// The thread owns the only `Connection`. Every read, append and export is a
/// closure executed there in submission order, so writes never interleave.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (queue, inbox) = mpsc::channel::<WorkerMessage>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name("healthtrack-db".into())
            .spawn(move || match open_connection(&path) {
                Ok(conn) => {
                    if opened_tx.send(Ok(())).is_ok() {
                        serve(conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        opened_rx
            .recv()
            .context("database worker exited during startup")??;

        info!("Log database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                queue,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `task` on the database thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                warn!("Database caller went away before its result arrived");
            }
        });

        self.worker
            .queue
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("database worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_nested_directory_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("a").join("b").join("log.sqlite3")).unwrap();

        let tables: Vec<String> = db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        assert_eq!(tables, vec!["log_entries".to_string(), "sessions".to_string()]);
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("log.sqlite3")).unwrap();
        db.execute(|conn| {
            conn.execute_batch("CREATE TABLE seq (n INTEGER)")?;
            Ok(())
        })
        .await
        .unwrap();

        let pending: Vec<_> = (0..20)
            .map(|n| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.execute(move |conn| {
                        conn.execute("INSERT INTO seq (n) VALUES (?1)", [n])?;
                        Ok(())
                    })
                    .await
                })
            })
            .collect();
        for handle in pending {
            handle.await.unwrap().unwrap();
        }

        let count: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM seq", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("log.sqlite3")).unwrap();

        let result: Result<()> = db
            .execute(|conn| {
                conn.execute_batch("SELECT * FROM missing_table")?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        // The worker survives a failed job.
        let one: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
