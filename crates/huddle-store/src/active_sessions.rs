use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use huddle_core::ids::{AccountId, GroupId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// The group a durable account is currently associated with. One row per
/// account; overwritten whenever the account lands in a new group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveSessionRecord {
    pub account_id: AccountId,
    pub group_id: GroupId,
    pub display_name: String,
    pub shared_tags: Vec<String>,
    pub expires_at: Option<i64>,
    pub updated_at: String,
}

pub struct ActiveSessionRepo {
    db: Database,
}

impl ActiveSessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the active-session record for an account.
    /// Account ids are case-insensitive; stored lowercased.
    #[instrument(skip(self, shared_tags), fields(account_id = %account_id, group_id = %group_id))]
    pub fn set(
        &self,
        account_id: &AccountId,
        group_id: &GroupId,
        display_name: &str,
        shared_tags: &[String],
        expires_at: Option<i64>,
    ) -> Result<(), StoreError> {
        let key = account_id.as_str().to_lowercase();
        let tags_json = serde_json::to_string(shared_tags)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO active_sessions (account_id, group_id, display_name, shared_tags, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(account_id) DO UPDATE SET
                     group_id = excluded.group_id,
                     display_name = excluded.display_name,
                     shared_tags = excluded.shared_tags,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                rusqlite::params![key, group_id.as_str(), display_name, tags_json, expires_at, now],
            )?;
            Ok(())
        })
    }

    /// Drop the record for an account. Missing rows are not an error.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn clear(&self, account_id: &AccountId) -> Result<(), StoreError> {
        let key = account_id.as_str().to_lowercase();
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM active_sessions WHERE account_id = ?1",
                [key.as_str()],
            )?;
            Ok(())
        })
    }

    /// Fetch the record for an account, if any.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn get(&self, account_id: &AccountId) -> Result<Option<ActiveSessionRecord>, StoreError> {
        let key = account_id.as_str().to_lowercase();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT account_id, group_id, display_name, shared_tags, expires_at, updated_at
                 FROM active_sessions WHERE account_id = ?1",
            )?;
            let mut rows = stmt.query([key.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_record(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ActiveSessionRecord, StoreError> {
    let tags_raw: String = row_helpers::get(row, 3, "active_sessions", "shared_tags")?;
    let shared_tags = row_helpers::parse_string_array(&tags_raw, "active_sessions", "shared_tags")?;

    Ok(ActiveSessionRecord {
        account_id: AccountId::from_raw(row_helpers::get::<String>(row, 0, "active_sessions", "account_id")?),
        group_id: GroupId::from_raw(row_helpers::get::<String>(row, 1, "active_sessions", "group_id")?),
        display_name: row_helpers::get(row, 2, "active_sessions", "display_name")?,
        shared_tags,
        expires_at: row_helpers::get_opt(row, 4, "active_sessions", "expires_at")?,
        updated_at: row_helpers::get(row, 5, "active_sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn set_and_get() {
        let repo = ActiveSessionRepo::new(test_db());
        let acct = AccountId::from_raw("srn-100");
        let gid = GroupId::new();

        repo.set(&acct, &gid, "Cosmic Penguins", &["chess".into()], Some(1_900_000_000_000))
            .unwrap();

        let rec = repo.get(&acct).unwrap().unwrap();
        assert_eq!(rec.group_id, gid);
        assert_eq!(rec.display_name, "Cosmic Penguins");
        assert_eq!(rec.shared_tags, vec!["chess".to_string()]);
        assert_eq!(rec.expires_at, Some(1_900_000_000_000));
    }

    #[test]
    fn set_overwrites_previous_group() {
        let repo = ActiveSessionRepo::new(test_db());
        let acct = AccountId::from_raw("srn-100");
        let first = GroupId::new();
        let second = GroupId::new();

        repo.set(&acct, &first, "Sneaky Ducks", &[], None).unwrap();
        repo.set(&acct, &second, "Feral Waffles", &["music".into()], None).unwrap();

        let rec = repo.get(&acct).unwrap().unwrap();
        assert_eq!(rec.group_id, second);
        assert_eq!(rec.display_name, "Feral Waffles");
        assert_eq!(rec.shared_tags, vec!["music".to_string()]);
    }

    #[test]
    fn account_ids_lowercased() {
        let repo = ActiveSessionRepo::new(test_db());
        let gid = GroupId::new();

        repo.set(&AccountId::from_raw("SRN-ABC"), &gid, "Turbo Noodles", &[], None)
            .unwrap();

        let rec = repo.get(&AccountId::from_raw("srn-abc")).unwrap().unwrap();
        assert_eq!(rec.account_id.as_str(), "srn-abc");
        assert_eq!(rec.group_id, gid);
    }

    #[test]
    fn null_expiry_roundtrips() {
        let repo = ActiveSessionRepo::new(test_db());
        let acct = AccountId::from_raw("srn-2");

        repo.set(&acct, &GroupId::new(), "Sleepy Otters", &[], None).unwrap();

        let rec = repo.get(&acct).unwrap().unwrap();
        assert_eq!(rec.expires_at, None);
    }

    #[test]
    fn clear_removes_record() {
        let repo = ActiveSessionRepo::new(test_db());
        let acct = AccountId::from_raw("srn-3");

        repo.set(&acct, &GroupId::new(), "Glitchy Gnomes", &[], None).unwrap();
        repo.clear(&acct).unwrap();

        assert!(repo.get(&acct).unwrap().is_none());
    }

    #[test]
    fn clear_missing_account_is_ok() {
        let repo = ActiveSessionRepo::new(test_db());
        repo.clear(&AccountId::from_raw("never-seen")).unwrap();
    }

    #[test]
    fn get_missing_returns_none() {
        let repo = ActiveSessionRepo::new(test_db());
        assert!(repo.get(&AccountId::from_raw("nobody")).unwrap().is_none());
    }
}
