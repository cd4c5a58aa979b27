use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_rusqlite::Connection;

use crate::error::{mask_secrets, Error, Result};

/// A fixed set of `tokio_rusqlite` connections handed out one caller at a time.
///
/// Every connection is opened up front and attached to the same extra
/// schemas, so callers see identical catalogs whichever one they get.
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    permits: Semaphore,
    closed: AtomicBool,
    location: String,
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<'a> {
    conn: Connection,
    pool: &'a ConnectionPool,
    _permit: SemaphorePermit<'a>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            self.pool.lock_idle().push(self.conn.clone());
        }
    }
}

impl ConnectionPool {
    /// Open `size` connections to the database file at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        size: usize,
        attachments: &[(String, PathBuf)],
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let location = path.display().to_string();
        let size = size.max(1);

        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(&path)
                .await
                .map_err(|e| connection_error(&location, e))?;
            init_connection(&conn, attachments)
                .await
                .map_err(|e| connection_error(&location, e))?;
            conns.push(conn);
        }

        log::debug!("opened {size} connection(s) to {}", mask_secrets(&location));
        Ok(Self::from_connections(conns, location))
    }

    /// A single private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| connection_error(":memory:", e))?;
        init_connection(&conn, &[])
            .await
            .map_err(|e| connection_error(":memory:", e))?;
        Ok(Self::from_connections(vec![conn], ":memory:".into()))
    }

    fn from_connections(conns: Vec<Connection>, location: String) -> Self {
        Self {
            permits: Semaphore::new(conns.len()),
            idle: Mutex::new(conns),
            closed: AtomicBool::new(false),
            location,
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for a free connection.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| self.closed_error())?;
        let conn = self.lock_idle().pop().ok_or_else(|| self.closed_error())?;
        Ok(PooledConnection {
            conn,
            pool: self,
            _permit: permit,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every idle connection. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let conns: Vec<Connection> = self.lock_idle().drain(..).collect();
        for conn in conns {
            if let Err(e) = conn.close().await {
                log::warn!("error closing connection: {e}");
            }
        }
        log::debug!("connection pool closed");
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn closed_error(&self) -> Error {
        Error::DatabaseConnection {
            message: "connection pool is closed".into(),
            connection_string: Some(mask_secrets(&self.location)),
        }
    }
}

async fn init_connection(
    conn: &Connection,
    attachments: &[(String, PathBuf)],
) -> std::result::Result<(), String> {
    let attachments: Vec<(String, String)> = attachments
        .iter()
        .map(|(schema, path)| (schema.clone(), path.display().to_string()))
        .collect();
    conn.call(move |conn| {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
            .map_err(|e| e.to_string())?;
        for (schema, path) in &attachments {
            conn.execute("ATTACH DATABASE ?1 AS ?2", [path, schema])
                .map_err(|e| format!("attach {schema}: {e}"))?;
        }
        Ok::<(), String>(())
    })
    .await
    .map_err(|e| e.to_string())
}

fn connection_error(location: &str, err: impl std::fmt::Display) -> Error {
    Error::DatabaseConnection {
        message: format!("failed to open database: {err}"),
        connection_string: Some(mask_secrets(location)),
    }
}
