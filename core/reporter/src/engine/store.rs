//! SQLite persistence for the journal engine.
//!
//! Two tables: an append-only `events` journal whose rowid doubles as the
//! sequential event id, and a single-row `registration` table for the device
//! registered by the last successful login.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Failed to create journal directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("Failed to open journal {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Journal query failed: {context}: {source}")]
    Query {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Unknown journal event kind: {0}")]
    UnknownKind(String),

    #[error("Failed to spawn journal worker: {0}")]
    Spawn(#[source] std::io::Error),
}

fn query_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> JournalError {
    move |source| JournalError::Query { context, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
    Switch,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Switch => "switch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(EventKind::Start),
            "stop" => Some(EventKind::Stop),
            "switch" => Some(EventKind::Switch),
            _ => None,
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub eid: i64,
    pub recorded_at: String,
    pub kind: EventKind,
    pub app: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub server_name: String,
    pub username: String,
    pub device_name: String,
    pub registered_at: String,
}

pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    pub fn new(path: PathBuf) -> Result<Self, JournalError> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    /// Appends an event and returns its sequential id.
    pub fn append(&self, kind: EventKind, app: Option<&str>) -> Result<i64, JournalError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO events (recorded_at, kind, app) VALUES (?1, ?2, ?3)",
                params![Utc::now().to_rfc3339(), kind.as_str(), app],
            )
            .map_err(query_error("insert event"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn last_kind(&self) -> Result<Option<EventKind>, JournalError> {
        let kind: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT kind FROM events WHERE kind IN ('start', 'stop') \
                 ORDER BY eid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error("read latest span event"))
        })?;

        kind.map(|value| EventKind::parse(&value).ok_or(JournalError::UnknownKind(value)))
            .transpose()
    }

    #[cfg(test)]
    pub fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let rows: Vec<(i64, String, String, Option<String>)> = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT eid, recorded_at, kind, app FROM events ORDER BY eid ASC")
                .map_err(query_error("prepare events query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(query_error("read event rows"))?;
            let decoded = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_error("decode event row"))?;
            Ok(decoded)
        })?;

        rows.into_iter()
            .map(|(eid, recorded_at, kind, app)| {
                let kind = EventKind::parse(&kind).ok_or(JournalError::UnknownKind(kind))?;
                Ok(JournalEntry {
                    eid,
                    recorded_at,
                    kind,
                    app,
                })
            })
            .collect()
    }

    pub fn registration(&self) -> Result<Option<Registration>, JournalError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT server_name, username, device_name, registered_at \
                 FROM registration WHERE id = 1",
                [],
                |row| {
                    Ok(Registration {
                        server_name: row.get(0)?,
                        username: row.get(1)?,
                        device_name: row.get(2)?,
                        registered_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(query_error("read registration"))
        })
    }

    pub fn save_registration(&self, registration: &Registration) -> Result<(), JournalError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO registration (id, server_name, username, device_name, registered_at) \
                 VALUES (1, ?1, ?2, ?3, ?4) \
                 ON CONFLICT(id) DO UPDATE SET \
                    server_name = excluded.server_name, \
                    username = excluded.username, \
                    device_name = excluded.device_name, \
                    registered_at = excluded.registered_at",
                params![
                    registration.server_name,
                    registration.username,
                    registration.device_name,
                    registration.registered_at
                ],
            )
            .map_err(query_error("save registration"))?;
            Ok(())
        })
    }

    fn init_schema(&self) -> Result<(), JournalError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS events (
                    eid INTEGER PRIMARY KEY AUTOINCREMENT,
                    recorded_at TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    app TEXT
                 );
                 CREATE TABLE IF NOT EXISTS registration (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    server_name TEXT NOT NULL,
                    username TEXT NOT NULL,
                    device_name TEXT NOT NULL,
                    registered_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(query_error("initialize schema"))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, JournalError>,
    ) -> Result<T, JournalError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, JournalError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(JournalError::CreateDir)?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(|source| JournalError::Open {
                path: self.path.clone(),
                source,
            })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(query_error("enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(query_error("set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(query_error("set busy_timeout"))?;

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, JournalStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = JournalStore::new(dir.path().join("nested").join("journal.db"))
            .expect("open store");
        (dir, store)
    }

    #[test]
    fn event_ids_are_sequential() {
        let (_dir, store) = temp_store();
        let first = store.append(EventKind::Start, None).expect("append");
        let second = store
            .append(EventKind::Switch, Some("example.com"))
            .expect("append");
        assert_eq!(second, first + 1);

        let entries = store.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, EventKind::Switch);
        assert_eq!(entries[1].app.as_deref(), Some("example.com"));
    }

    #[test]
    fn last_kind_ignores_switch_rows() {
        let (_dir, store) = temp_store();
        assert_eq!(store.last_kind().expect("empty"), None);

        store.append(EventKind::Start, None).expect("append");
        store
            .append(EventKind::Switch, Some("docs.rs"))
            .expect("append");
        assert_eq!(store.last_kind().expect("kind"), Some(EventKind::Start));

        store.append(EventKind::Stop, None).expect("append");
        assert_eq!(store.last_kind().expect("kind"), Some(EventKind::Stop));
    }

    #[test]
    fn registration_is_replaced_in_place() {
        let (_dir, store) = temp_store();
        assert_eq!(store.registration().expect("none"), None);

        let mut registration = Registration {
            server_name: "srv:4201".to_string(),
            username: "u".to_string(),
            device_name: "laptop".to_string(),
            registered_at: "2026-10-16T09:00:00Z".to_string(),
        };
        store.save_registration(&registration).expect("save");
        registration.device_name = "desktop".to_string();
        store.save_registration(&registration).expect("save again");

        assert_eq!(store.registration().expect("some"), Some(registration));
    }
}
