use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON string array column, returning CorruptRow on parse failure.
pub fn parse_string_array(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_string_array_success() {
        let result = parse_string_array(r#"["chess","music"]"#, "active_sessions", "shared_tags");
        assert_eq!(result.unwrap(), vec!["chess".to_string(), "music".to_string()]);
    }

    #[test]
    fn parse_string_array_empty() {
        let result = parse_string_array("[]", "active_sessions", "shared_tags");
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn parse_string_array_failure() {
        let result = parse_string_array("not valid json", "active_sessions", "shared_tags");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "active_sessions", column: "shared_tags", .. })
        ));
    }

    #[test]
    fn corrupt_row_display() {
        let err = StoreError::CorruptRow {
            table: "messages",
            column: "timestamp",
            detail: "type mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt row in messages.timestamp: type mismatch"
        );
    }
}
