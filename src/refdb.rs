use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

/// Outcome of running one SQL text against a reference database.
///
/// Execution never surfaces as an `Err`: syntax errors, missing tables,
/// locked files and the like all come back as `success: false` with the
/// engine's message and result codes preserved for display to the student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    pub message: String,
    pub row_count: i64,
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SqlErrorInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlErrorInfo {
    pub message: String,
    /// Extended result code from the engine, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Primary result code name, e.g. "ConstraintViolation".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

fn failure(err: rusqlite::Error) -> QueryResult {
    let (code, state) = match &err {
        rusqlite::Error::SqliteFailure(e, _) => {
            (Some(e.extended_code), Some(format!("{:?}", e.code)))
        }
        _ => (None, None),
    };
    let message = err.to_string();
    QueryResult {
        success: false,
        message: message.clone(),
        row_count: 0,
        columns: Vec::new(),
        rows: Vec::new(),
        error: Some(SqlErrorInfo {
            message,
            code,
            state,
        }),
    }
}

fn value_to_json(v: ValueRef) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|x| format!("{:02x}", x)).collect()),
    }
}

/// Run one SQL text on an open connection.
///
/// Column names come from the prepared statement's own column list, so they
/// are reported in SELECT-clause order even when the query returns zero
/// rows. Callers must not re-derive them from row data.
pub fn execute_on(conn: &Connection, sql: &str) -> QueryResult {
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return failure(e),
    };
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = match stmt.query([]) {
        Ok(r) => r,
        Err(e) => return failure(e),
    };

    let mut data: Vec<Value> = Vec::new();
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut obj = serde_json::Map::new();
                for (i, name) in columns.iter().enumerate() {
                    let v = row
                        .get_ref(i)
                        .map(value_to_json)
                        .unwrap_or(Value::Null);
                    obj.insert(name.clone(), v);
                }
                data.push(Value::Object(obj));
            }
            Ok(None) => break,
            Err(e) => return failure(e),
        }
    }

    let message = if data.is_empty() {
        "Query executed successfully, but returned no results".to_string()
    } else {
        "Query executed successfully".to_string()
    };

    QueryResult {
        success: true,
        message,
        row_count: data.len() as i64,
        columns,
        rows: data,
        error: None,
    }
}

/// Maps a database identifier to a SQLite file under `<workspace>/refdbs/`.
///
/// Unknown identifiers resolve to the configured default database. That is a
/// deliberate policy carried over from the source system, not an error: a
/// topic pointing at a database that was never provisioned still grades
/// against the default rather than failing outright.
pub struct RefDbRegistry {
    dir: PathBuf,
    default_id: String,
}

fn valid_db_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl RefDbRegistry {
    pub fn new(dir: PathBuf, default_id: String) -> Self {
        Self { dir, default_id }
    }

    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.sqlite3", name))
    }

    /// Databases currently provisioned in the workspace.
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.dir.is_dir() {
            return Ok(names);
        }
        for ent in std::fs::read_dir(&self.dir)? {
            let p = ent?.path();
            if !p.is_file() {
                continue;
            }
            let Some(file) = p.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(stem) = file.strip_suffix(".sqlite3") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve an identifier to the database that will actually run the
    /// query. Unknown or malformed identifiers fall back to the default.
    pub fn resolve(&self, database: &str) -> String {
        if valid_db_name(database) && self.path_for(database).is_file() {
            database.to_string()
        } else {
            self.default_id.clone()
        }
    }

    /// Open a database for seeding, creating the file if needed. Unlike
    /// `resolve`, this requires a well-formed name and does not fall back.
    pub fn create_or_open(&self, name: &str) -> anyhow::Result<Connection> {
        if !valid_db_name(name) {
            anyhow::bail!("invalid database name: {}", name);
        }
        self.ensure_dir()?;
        Ok(Connection::open(self.path_for(name))?)
    }

    /// Run untrusted SQL against the resolved database. The connection has
    /// whatever privileges the file allows; no write protection is applied.
    pub fn execute(&self, sql: &str, database: &str) -> QueryResult {
        let resolved = self.resolve(database);
        let conn = match Connection::open(self.path_for(&resolved)) {
            Ok(c) => c,
            Err(e) => return failure(e),
        };
        execute_on(&conn, sql)
    }

    /// Execute a seeding script (many statements) against a database.
    pub fn load_script(&self, database: &str, script: &str) -> anyhow::Result<String> {
        let conn = self.create_or_open(database)?;
        conn.execute_batch(script)?;
        Ok(database.to_string())
    }
}
