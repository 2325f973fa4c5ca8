use std::path::Path;
use std::time::Duration;
use anyhow::{anyhow, Result};
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use crate::config::DatabaseConfig;
use crate::modem::caller_id::CallerRecord;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// The screening lists a number can be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerList {
    Whitelist,
    Blacklist
}
impl CallerList {
    fn table(&self) -> &'static str {
        match self {
            CallerList::Whitelist => "Whitelist",
            CallerList::Blacklist => "Blacklist"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLogEntry {
    pub call_no: i64,
    pub name: String,
    pub number: String,
    pub action: String,
    pub reason: String,
    pub system_date_time: String
}

fn system_date_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Clone)]
pub struct CallDatabase {
    pool: SqlitePool
}
impl CallDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_path(&config.path).await
    }

    pub async fn connect_path(path: &Path) -> Result<Self> {
        let connection_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA temp_store = memory").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(connection_options)
            .await
            .map_err(|e| anyhow!(e))?;

        let db = Self { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        debug!("CallDatabase tables initialized successfully!");
        Ok(())
    }

    /// Records an incoming call and how it was classified. Returns the call number.
    pub async fn log_caller(&self, record: &CallerRecord, action: &str, reason: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO CallLog (Name, Number, Date, Time, Action, Reason, SystemDateTime) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
            .bind(&record.name)
            .bind(&record.number)
            .bind(&record.date)
            .bind(&record.time)
            .bind(action)
            .bind(reason)
            .bind(system_date_time())
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent calls first.
    pub async fn recent_calls(&self, limit: i64) -> Result<Vec<CallLogEntry>> {
        let result = sqlx::query(
            "SELECT CallLogID, Name, Number, Action, Reason, SystemDateTime FROM CallLog ORDER BY CallLogID DESC LIMIT ?"
        )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(result.into_iter()
            .map(|row| CallLogEntry {
                call_no: row.get("CallLogID"),
                name: row.get::<Option<String>, _>("Name").unwrap_or_default(),
                number: row.get::<Option<String>, _>("Number").unwrap_or_default(),
                action: row.get::<Option<String>, _>("Action").unwrap_or_default(),
                reason: row.get::<Option<String>, _>("Reason").unwrap_or_default(),
                system_date_time: row.get::<Option<String>, _>("SystemDateTime").unwrap_or_default()
            })
            .collect())
    }

    pub async fn add_message(&self, call_no: i64, path: &Path) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO Message (CallLogID, Filename, DateTime) VALUES (?, ?, ?)"
        )
            .bind(call_no)
            .bind(path.to_string_lossy().to_string())
            .bind(system_date_time())
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn set_message_played(&self, msg_no: i64, played: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE Message SET Played = ? WHERE MessageID = ?")
            .bind(played)
            .bind(msg_no)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes a message row, returning the recording's filename if it existed.
    pub async fn delete_message(&self, msg_no: i64) -> Result<Option<String>> {
        let filename: Option<Option<String>> = sqlx::query_scalar("DELETE FROM Message WHERE MessageID = ? RETURNING Filename")
            .bind(msg_no)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(filename.flatten())
    }

    pub async fn unplayed_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM Message WHERE Played = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    /// Returns the reason the number was listed, if it is.
    pub async fn check_list(&self, list: CallerList, number: &str) -> Result<Option<String>> {
        let reason: Option<Option<String>> = sqlx::query_scalar(
            &format!("SELECT Reason FROM {} WHERE PhoneNo = ?", list.table())
        )
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(reason.map(|reason| reason.unwrap_or_default()))
    }

    /// Adds or replaces a number on the given list.
    pub async fn add_to_list(&self, list: CallerList, record: &CallerRecord, reason: &str) -> Result<()> {
        sqlx::query(
            &format!("INSERT OR REPLACE INTO {} (PhoneNo, Name, Reason, SystemDateTime) VALUES (?, ?, ?, ?)", list.table())
        )
            .bind(&record.number)
            .bind(&record.name)
            .bind(reason)
            .bind(system_date_time())
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        debug!("Added {} to the {:?}: {}", record.number, list, reason);
        Ok(())
    }

    pub async fn check_whitelist(&self, number: &str) -> Result<Option<String>> {
        self.check_list(CallerList::Whitelist, number).await
    }

    pub async fn check_blacklist(&self, number: &str) -> Result<Option<String>> {
        self.check_list(CallerList::Blacklist, number).await
    }

    pub async fn add_whitelist(&self, record: &CallerRecord, reason: &str) -> Result<()> {
        self.add_to_list(CallerList::Whitelist, record, reason).await
    }

    pub async fn add_blacklist(&self, record: &CallerRecord, reason: &str) -> Result<()> {
        self.add_to_list(CallerList::Blacklist, record, reason).await
    }

    pub async fn remove_from_list(&self, list: CallerList, number: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE PhoneNo = ?", list.table()))
            .bind(number)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn temp_database() -> (CallDatabase, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CallDatabase::connect_path(&dir.path().join("test.db")).await.unwrap();
        (db, dir)
    }

    pub(crate) fn caller(number: &str, name: &str) -> CallerRecord {
        CallerRecord {
            date: "0801".to_string(),
            time: "1801".to_string(),
            name: name.to_string(),
            number: number.to_string()
        }
    }

    #[tokio::test]
    async fn test_log_caller_numbers_calls() {
        let (db, _dir) = temp_database().await;
        let first = db.log_caller(&caller("8055554567", "Test1"), "Screened", "").await.unwrap();
        let second = db.log_caller(&caller("8055554567", "Test1"), "Blocked", "Telemarketer Caller ID").await.unwrap();
        assert_eq!(second, first + 1);

        let calls = db.recent_calls(10).await.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_no, second);
        assert_eq!(calls[0].action, "Blocked");
        assert_eq!(calls[0].reason, "Telemarketer Caller ID");
        assert_eq!(calls[1].name, "Test1");
    }

    #[tokio::test]
    async fn test_messages_and_unplayed_count() {
        let (db, _dir) = temp_database().await;
        let call_no = db.log_caller(&caller("123", "Bob"), "Screened", "").await.unwrap();

        assert_eq!(db.unplayed_count().await.unwrap(), 0);
        let msg_no = db.add_message(call_no, Path::new("/tmp/1_123_Bob.wav")).await.unwrap();
        db.add_message(call_no, Path::new("/tmp/2_123_Bob.wav")).await.unwrap();
        assert_eq!(db.unplayed_count().await.unwrap(), 2);

        assert!(db.set_message_played(msg_no, true).await.unwrap());
        assert_eq!(db.unplayed_count().await.unwrap(), 1);
        assert!(!db.set_message_played(999, true).await.unwrap());

        assert_eq!(db.delete_message(msg_no).await.unwrap().as_deref(), Some("/tmp/1_123_Bob.wav"));
        assert_eq!(db.delete_message(msg_no).await.unwrap(), None);
        assert_eq!(db.unplayed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_caller_lists() {
        let (db, _dir) = temp_database().await;
        let record = caller("8055554567", "Bruce");

        assert_eq!(db.check_list(CallerList::Whitelist, &record.number).await.unwrap(), None);
        db.add_to_list(CallerList::Whitelist, &record, "Family").await.unwrap();
        assert_eq!(db.check_list(CallerList::Whitelist, &record.number).await.unwrap().as_deref(), Some("Family"));
        assert_eq!(db.check_list(CallerList::Blacklist, &record.number).await.unwrap(), None);

        db.add_to_list(CallerList::Whitelist, &record, "Friend").await.unwrap();
        assert_eq!(db.check_list(CallerList::Whitelist, &record.number).await.unwrap().as_deref(), Some("Friend"));

        assert!(db.remove_from_list(CallerList::Whitelist, &record.number).await.unwrap());
        assert!(!db.remove_from_list(CallerList::Whitelist, &record.number).await.unwrap());
    }
}
