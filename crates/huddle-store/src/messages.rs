use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use huddle_core::ids::{GroupId, MessageId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Upper bound on history rows delivered for a single join.
pub const HISTORY_PAGE_SIZE: u32 = 200;

/// A stored chat message row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message for a group, stamped with the current time.
    #[instrument(skip(self, text), fields(group_id = %group_id, sender = %sender))]
    pub fn append(
        &self,
        group_id: &GroupId,
        sender: &str,
        text: &str,
    ) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = MessageId::new();
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, group_id, sender, text, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), group_id.as_str(), sender, text, now],
            )?;

            Ok(MessageRow {
                id,
                group_id: group_id.clone(),
                sender: sender.to_string(),
                text: text.to_string(),
                timestamp: now,
            })
        })
    }

    /// Oldest-first page of messages for a group, at most `limit` rows.
    /// Message ids break ties between equal timestamps.
    #[instrument(skip(self), fields(group_id = %group_id, limit))]
    pub fn list_for_group(
        &self,
        group_id: &GroupId,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, group_id, sender, text, timestamp FROM messages
                 WHERE group_id = ?1
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![group_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Count messages stored for a group.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub fn count_for_group(&self, group_id: &GroupId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE group_id = ?1",
                [group_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    Ok(MessageRow {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        group_id: GroupId::from_raw(row_helpers::get::<String>(row, 1, "messages", "group_id")?),
        sender: row_helpers::get(row, 2, "messages", "sender")?,
        text: row_helpers::get(row, 3, "messages", "text")?,
        timestamp: row_helpers::get(row, 4, "messages", "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::in_memory().unwrap()
    }

    fn insert_at(db: &Database, group_id: &GroupId, sender: &str, text: &str, ts: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, group_id, sender, text, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![MessageId::new().as_str(), group_id.as_str(), sender, text, ts],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn append_message() {
        let repo = MessageRepo::new(test_db());
        let gid = GroupId::new();
        let row = repo.append(&gid, "ortho", "hello there").unwrap();
        assert!(row.id.as_str().starts_with("msg_"));
        assert_eq!(row.group_id, gid);
        assert_eq!(row.sender, "ortho");
        assert_eq!(row.text, "hello there");
        assert!(row.timestamp.contains('T'));
    }

    #[test]
    fn list_returns_oldest_first() {
        let db = test_db();
        let repo = MessageRepo::new(db.clone());
        let gid = GroupId::new();

        insert_at(&db, &gid, "a", "second", "2026-03-01T10:00:01Z");
        insert_at(&db, &gid, "b", "first", "2026-03-01T10:00:00Z");
        insert_at(&db, &gid, "c", "third", "2026-03-01T10:00:02Z");

        let rows = repo.list_for_group(&gid, HISTORY_PAGE_SIZE).unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn list_honors_limit_keeping_oldest() {
        let db = test_db();
        let repo = MessageRepo::new(db.clone());
        let gid = GroupId::new();

        for i in 0..5 {
            insert_at(&db, &gid, "a", &format!("msg {i}"), &format!("2026-03-01T10:00:0{i}Z"));
        }

        let rows = repo.list_for_group(&gid, 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].text, "msg 0");
        assert_eq!(rows[2].text, "msg 2");
    }

    #[test]
    fn list_unknown_group_is_empty() {
        let repo = MessageRepo::new(test_db());
        let rows = repo.list_for_group(&GroupId::new(), HISTORY_PAGE_SIZE).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn list_scoped_to_group() {
        let repo = MessageRepo::new(test_db());
        let a = GroupId::new();
        let b = GroupId::new();
        repo.append(&a, "x", "for a").unwrap();
        repo.append(&b, "y", "for b").unwrap();

        let rows = repo.list_for_group(&a, HISTORY_PAGE_SIZE).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "for a");
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let db = test_db();
        let repo = MessageRepo::new(db.clone());
        let gid = GroupId::new();

        // Same second; monotonic message ids decide the order
        insert_at(&db, &gid, "a", "one", "2026-03-01T10:00:00Z");
        insert_at(&db, &gid, "a", "two", "2026-03-01T10:00:00Z");

        let rows = repo.list_for_group(&gid, HISTORY_PAGE_SIZE).unwrap();
        assert_eq!(rows[0].text, "one");
        assert_eq!(rows[1].text, "two");
    }

    #[test]
    fn count_messages() {
        let repo = MessageRepo::new(test_db());
        let gid = GroupId::new();
        assert_eq!(repo.count_for_group(&gid).unwrap(), 0);

        for _ in 0..3 {
            repo.append(&gid, "a", "hi").unwrap();
        }
        assert_eq!(repo.count_for_group(&gid).unwrap(), 3);
    }
}
