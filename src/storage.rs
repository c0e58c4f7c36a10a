use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Schema steps, applied in order. `PRAGMA user_version` records how many ran.
const SCHEMA: &[&str] = &[r#"
CREATE TABLE sessions (
  server TEXT PRIMARY KEY,
  username TEXT NOT NULL,
  token TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE images (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  format TEXT NOT NULL,
  file TEXT NOT NULL,
  width INTEGER NOT NULL DEFAULT 0,
  height INTEGER NOT NULL DEFAULT 0,
  bytes INTEGER NOT NULL DEFAULT 0,
  stored_at INTEGER NOT NULL,
  expires_at INTEGER,
  sha1 TEXT NOT NULL DEFAULT ''
);

CREATE INDEX images_by_age ON images(stored_at);
CREATE INDEX images_by_expiry ON images(expires_at);
"#];

const IMAGE_COLUMNS: &str =
    "id, url, format, file, width, height, bytes, stored_at, expires_at, sha1";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Login remembered for one board server.
#[derive(Debug, Clone)]
pub struct SavedSession {
    pub server: String,
    pub username: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A downloaded post image. `url` is the resolved address and the cache key;
/// `file` is where the bytes live on disk.
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub id: i64,
    pub url: String,
    pub format: String,
    pub file: String,
    pub width: i64,
    pub height: i64,
    pub bytes: i64,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sha1: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = match opts.path {
            Some(path) => path,
            None => default_path().context("storage: no data directory")?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create {}", parent.display()))?;
        }

        let mut conn = Connection::open(&path)
            .with_context(|| format!("storage: open {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: journal mode")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("storage: busy timeout")?;
        upgrade(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn save_session(&self, session: SavedSession) -> Result<()> {
        if session.server.is_empty() || session.token.is_empty() {
            bail!("storage: session needs a server and a token");
        }
        let now = Utc::now().timestamp();
        let created = match session.created_at.timestamp() {
            0 => now,
            ts => ts,
        };
        self.conn
            .lock()
            .execute(
                "INSERT INTO sessions (server, username, token, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(server) DO UPDATE SET
                   username = excluded.username,
                   token = excluded.token,
                   updated_at = excluded.updated_at",
                params![session.server, session.username, session.token, created, now],
            )
            .with_context(|| format!("storage: save session for {}", session.server))?;
        Ok(())
    }

    pub fn get_session(&self, server: &str) -> Result<Option<SavedSession>> {
        self.conn
            .lock()
            .query_row(
                "SELECT server, username, token, created_at, updated_at
                 FROM sessions WHERE server = ?1",
                [server],
                |row| {
                    Ok(SavedSession {
                        server: row.get(0)?,
                        username: row.get(1)?,
                        token: row.get(2)?,
                        created_at: from_unix(row.get(3)?),
                        updated_at: from_unix(row.get(4)?),
                    })
                },
            )
            .optional()
            .with_context(|| format!("storage: load session for {server}"))
    }

    pub fn delete_session(&self, server: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM sessions WHERE server = ?1", [server])
            .with_context(|| format!("storage: forget session for {server}"))?;
        Ok(())
    }

    /// Inserts or replaces the row for `image.url` and returns its id.
    pub fn put_image(&self, image: &CachedImage) -> Result<i64> {
        if image.url.is_empty() {
            bail!("storage: image url required");
        }
        self.conn
            .lock()
            .query_row(
                "INSERT INTO images (url, format, file, width, height, bytes, stored_at, expires_at, sha1)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(url) DO UPDATE SET
                   format = excluded.format,
                   file = excluded.file,
                   width = excluded.width,
                   height = excluded.height,
                   bytes = excluded.bytes,
                   stored_at = excluded.stored_at,
                   expires_at = excluded.expires_at,
                   sha1 = excluded.sha1
                 RETURNING id",
                params![
                    image.url,
                    image.format,
                    image.file,
                    image.width,
                    image.height,
                    image.bytes,
                    image.stored_at.timestamp(),
                    image.expires_at.map(|at| at.timestamp()),
                    image.sha1,
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("storage: record image {}", image.url))
    }

    pub fn image(&self, url: &str) -> Result<Option<CachedImage>> {
        self.conn
            .lock()
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE url = ?1"),
                [url],
                image_from_row,
            )
            .optional()
            .with_context(|| format!("storage: look up image {url}"))
    }

    /// Sum of the recorded image sizes.
    pub fn image_bytes(&self) -> Result<i64> {
        self.conn
            .lock()
            .query_row("SELECT COALESCE(SUM(bytes), 0) FROM images", [], |row| {
                row.get(0)
            })
            .context("storage: sum image sizes")
    }

    /// Images whose expiry is at or before `now`, soonest first.
    pub fn expired_images(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CachedImage>> {
        self.select_images(
            "WHERE expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY expires_at LIMIT ?2",
            params![now.timestamp(), limit as i64],
        )
    }

    /// Eviction order: least recently stored first.
    pub fn images_by_age(&self, limit: usize) -> Result<Vec<CachedImage>> {
        self.select_images("ORDER BY stored_at, id LIMIT ?1", params![limit as i64])
    }

    pub fn forget_images(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin image delete")?;
        {
            let mut delete = tx.prepare("DELETE FROM images WHERE id = ?1")?;
            for id in ids {
                delete.execute([id])?;
            }
        }
        tx.commit().context("storage: delete images")
    }

    fn select_images(
        &self,
        clause: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<CachedImage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {IMAGE_COLUMNS} FROM images {clause}"))?;
        let images = stmt
            .query_map(args, image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("storage: list images")?;
        Ok(images)
    }
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<CachedImage> {
    Ok(CachedImage {
        id: row.get("id")?,
        url: row.get("url")?,
        format: row.get("format")?,
        file: row.get("file")?,
        width: row.get("width")?,
        height: row.get("height")?,
        bytes: row.get("bytes")?,
        stored_at: from_unix(row.get("stored_at")?),
        expires_at: row
            .get::<_, Option<i64>>("expires_at")?
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        sha1: row.get("sha1")?,
    })
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Brings the schema up to date, one transaction per step.
fn upgrade(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("storage: read schema version")?;
    for (step, sql) in SCHEMA.iter().enumerate().skip(version.max(0) as usize) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("storage: schema step {}", step + 1))?;
        tx.pragma_update(None, "user_version", (step + 1) as i64)?;
        tx.commit()?;
    }
    Ok(())
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("board-tui").join("state.db"))
}
