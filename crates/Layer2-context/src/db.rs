//! SQLite backing store for conversation context
//!
//! 테이블:
//! - sessions: 세션 시작/종료 시각
//! - turns: append-only 대화 턴
//! - state_snapshots: 작업 디렉토리, 환경변수, 명령 기록 스냅샷
//! - summaries: 세션당 한 행, 통째로 교체
//!
//! 모든 시각은 RFC 3339 문자열, 행 id 는 AUTOINCREMENT 로 단조 증가합니다.

use crate::error::{ContextError, Result};
use chrono::{DateTime, Utc};
use pocket_foundation::{CommandRecord, Turn, TurnRole};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// 현재 스키마 버전
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// DB 파일 이름
pub const CONTEXT_DB_FILE: &str = "context.db";

/// 세션 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub turn_count: usize,
}

/// 셸 상태 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub working_dir: String,
    pub env_vars: HashMap<String, String>,
    pub command_history: Vec<CommandRecord>,
    pub taken_at: DateTime<Utc>,
}

/// 컨텍스트 DB (여러 세션 공유)
#[derive(Clone)]
pub struct ContextDb {
    conn: Arc<Mutex<Connection>>,
}

impl ContextDb {
    /// `<data_dir>/context.db` 열기
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            ContextError::Persistence(format!("Failed to create data directory: {}", e))
        })?;
        Self::open_path(&data_dir.join(CONTEXT_DB_FILE))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(ContextError::db("open database"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(ContextError::db("set pragmas"))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        debug!("Context database opened at {}", path.display());
        Ok(db)
    }

    /// 메모리 DB (테스트용)
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(ContextError::db("create in-memory database"))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ContextError::Persistence("Lock poisoned".to_string()))
    }

    /// 스키마 생성 (여러 번 호출해도 안전)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_turns_session
                ON turns(session_id, id);

            CREATE TABLE IF NOT EXISTS state_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                working_dir TEXT NOT NULL,
                env_vars TEXT NOT NULL,
                command_history TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_state_session
                ON state_snapshots(session_id, id);

            CREATE TABLE IF NOT EXISTS summaries (
                session_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
            "#,
        )
        .map_err(ContextError::db("initialize schema"))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(ContextError::db("record schema version"))?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(ContextError::db("get schema version"))
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// 세션 생성 또는 재개. 새로 만들었으면 true
    pub fn ensure_session(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(ContextError::db("create session"))?;
        if inserted > 0 {
            info!("Created context session {}", id);
        }
        Ok(inserted > 0)
    }

    pub fn end_session(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET ended_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(ContextError::db("end session"))?;
        Ok(())
    }

    pub fn session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{} WHERE s.id = ?1", SESSION_SELECT),
            params![id],
            session_from_row,
        )
        .optional()
        .map_err(ContextError::db("get session"))
    }

    /// 최신 세션부터, `exclude` 는 제외
    pub fn sessions(&self, limit: usize, exclude: Option<&str>) -> Result<Vec<SessionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE (?1 IS NULL OR s.id != ?1) \
                 ORDER BY s.started_at DESC, s.rowid DESC LIMIT ?2",
                SESSION_SELECT
            ))
            .map_err(ContextError::db("prepare session query"))?;

        let sessions = stmt
            .query_map(params![exclude, limit as i64], session_from_row)
            .map_err(ContextError::db("query sessions"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ContextError::db("read session row"))?;
        Ok(sessions)
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// 턴 추가, 행 id 반환
    pub fn insert_turn(&self, session_id: &str, turn: &Turn) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO turns (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id,
                turn.role.as_str(),
                turn.content,
                turn.timestamp.to_rfc3339()
            ],
        )
        .map_err(ContextError::db("insert turn"))?;
        Ok(conn.last_insert_rowid())
    }

    /// 마지막 `limit` 개 턴 (시간순), `None` 이면 전부
    pub fn turns(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let conn = self.lock()?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = conn
            .prepare(
                r#"
                SELECT role, content, created_at FROM (
                    SELECT id, role, content, created_at FROM turns
                    WHERE session_id = ?1
                    ORDER BY id DESC LIMIT ?2
                ) ORDER BY id ASC
                "#,
            )
            .map_err(ContextError::db("prepare turn query"))?;

        let rows = stmt
            .query_map(params![session_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(ContextError::db("query turns"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ContextError::db("read turn row"))?;

        rows.into_iter()
            .map(|(role, content, created_at)| {
                let role: TurnRole = role.parse().map_err(|e: pocket_foundation::Error| {
                    ContextError::Persistence(format!("Corrupt turn in {}: {}", session_id, e))
                })?;
                Ok(Turn {
                    role,
                    content,
                    timestamp: parse_time(&created_at),
                })
            })
            .collect()
    }

    pub fn turn_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(ContextError::db("count turns"))?;
        Ok(count as usize)
    }

    // ========================================================================
    // State snapshots
    // ========================================================================

    pub fn insert_snapshot(&self, session_id: &str, snapshot: &StateSnapshot) -> Result<i64> {
        let env_vars = serde_json::to_string(&snapshot.env_vars)?;
        let history = serde_json::to_string(&snapshot.command_history)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO state_snapshots (session_id, working_dir, env_vars, command_history, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session_id,
                snapshot.working_dir,
                env_vars,
                history,
                snapshot.taken_at.to_rfc3339()
            ],
        )
        .map_err(ContextError::db("insert state snapshot"))?;
        Ok(conn.last_insert_rowid())
    }

    /// 가장 최근 스냅샷
    pub fn latest_snapshot(&self, session_id: &str) -> Result<Option<StateSnapshot>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT working_dir, env_vars, command_history, created_at
                FROM state_snapshots WHERE session_id = ?1
                ORDER BY id DESC LIMIT 1
                "#,
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(ContextError::db("get latest snapshot"))?;

        let Some((working_dir, env_vars, history, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StateSnapshot {
            working_dir,
            env_vars: serde_json::from_str(&env_vars)?,
            command_history: serde_json::from_str(&history)?,
            taken_at: parse_time(&created_at),
        }))
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    /// 요약 교체
    pub fn replace_summary(&self, session_id: &str, content: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO summaries (session_id, content, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(session_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
            params![session_id, content, Utc::now().to_rfc3339()],
        )
        .map_err(ContextError::db("replace summary"))?;
        Ok(())
    }

    pub fn summary(&self, session_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT content FROM summaries WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(ContextError::db("get summary"))
    }
}

const SESSION_SELECT: &str = r#"
    SELECT s.id, s.started_at, s.ended_at, m.content,
           (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id)
    FROM sessions s
    LEFT JOIN summaries m ON m.session_id = s.id
"#;

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let started_at: String = row.get(1)?;
    let ended_at: Option<String> = row.get(2)?;
    let turn_count: i64 = row.get(4)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        started_at: parse_time(&started_at),
        ended_at: ended_at.as_deref().map(parse_time),
        summary: row.get(3)?,
        turn_count: turn_count as usize,
    })
}

/// RFC 3339 파싱, 실패 시 epoch
fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = ContextDb::open(dir.path()).unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        drop(db);

        let db = ContextDb::open(dir.path()).unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(dir.path().join(CONTEXT_DB_FILE).exists());
    }

    #[test]
    fn test_ensure_session_once() {
        let db = ContextDb::in_memory().unwrap();
        assert!(db.ensure_session("s1").unwrap());
        assert!(!db.ensure_session("s1").unwrap());
        let record = db.session("s1").unwrap().unwrap();
        assert_eq!(record.turn_count, 0);
        assert!(record.ended_at.is_none());
        assert!(db.session("missing").unwrap().is_none());
    }

    #[test]
    fn test_turns_window_is_chronological() {
        let db = ContextDb::in_memory().unwrap();
        db.ensure_session("s").unwrap();
        for i in 0..5 {
            db.insert_turn("s", &Turn::user(format!("msg {}", i))).unwrap();
        }

        let last_two = db.turns("s", Some(2)).unwrap();
        let contents: Vec<_> = last_two.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 3", "msg 4"]);
        assert_eq!(db.turns("s", None).unwrap().len(), 5);
        assert_eq!(db.turn_count("s").unwrap(), 5);
    }

    #[test]
    fn test_row_ids_increase() {
        let db = ContextDb::in_memory().unwrap();
        db.ensure_session("s").unwrap();
        let a = db.insert_turn("s", &Turn::user("a")).unwrap();
        let b = db.insert_turn("s", &Turn::assistant("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_undecodable_rows_are_errors() {
        let db = ContextDb::in_memory().unwrap();
        db.ensure_session("s").unwrap();
        db.insert_turn("s", &Turn::user("fine")).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO turns (session_id, role, content, created_at) \
                 VALUES ('s', 'user', X'DEADBEEF', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO sessions (id, started_at) VALUES ('broken', X'00')",
                [],
            )
            .unwrap();
        }

        // 깨진 행을 조용히 빼지 않고 에러로 알림
        assert!(matches!(db.turns("s", None), Err(ContextError::Sqlite(_))));
        assert!(matches!(db.sessions(10, None), Err(ContextError::Sqlite(_))));
    }

    #[test]
    fn test_summary_replaced_whole() {
        let db = ContextDb::in_memory().unwrap();
        db.ensure_session("s").unwrap();
        assert_eq!(db.summary("s").unwrap(), None);
        db.replace_summary("s", "first").unwrap();
        db.replace_summary("s", "second").unwrap();
        assert_eq!(db.summary("s").unwrap().as_deref(), Some("second"));
    }
}
