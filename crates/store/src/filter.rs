use engram_core::Role;
use rusqlite::types::Value;

/// Equality and range predicates over the mirrored metadata columns.
/// Search modes, incremental dedup and recovery cleanup all compile down to
/// one of these; an empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub session_id: Option<String>,
    pub project_name: Option<String>,
    pub role: Option<Role>,
    pub primary_topic: Option<String>,
    pub has_code: Option<bool>,
    pub is_solution_attempt: Option<bool>,
    pub is_validated_solution: Option<bool>,
    pub is_refuted_attempt: Option<bool>,
    pub backfill_processed: Option<bool>,
    pub min_timestamp_unix: Option<i64>,
    pub max_timestamp_unix: Option<i64>,
}

impl MetadataFilter {
    pub fn for_session(session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Render as a SQL `WHERE` body plus positional parameters. Returns
    /// `("1=1", [])` for the empty filter so callers can always interpolate.
    pub(crate) fn sql(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        let text_predicates = [
            ("session_id = ?", &self.session_id),
            ("project_name = ?", &self.project_name),
            ("primary_topic = ?", &self.primary_topic),
        ];
        for (clause, value) in text_predicates {
            if let Some(v) = value {
                clauses.push(clause);
                params.push(Value::Text(v.clone()));
            }
        }

        if let Some(role) = self.role {
            clauses.push("role = ?");
            params.push(Value::Text(role.as_str().to_string()));
        }

        let bool_predicates = [
            ("has_code = ?", self.has_code),
            ("is_solution_attempt = ?", self.is_solution_attempt),
            ("is_validated_solution = ?", self.is_validated_solution),
            ("is_refuted_attempt = ?", self.is_refuted_attempt),
            ("backfill_processed = ?", self.backfill_processed),
        ];
        for (clause, value) in bool_predicates {
            if let Some(v) = value {
                clauses.push(clause);
                params.push(Value::Integer(i64::from(v)));
            }
        }

        if let Some(min) = self.min_timestamp_unix {
            clauses.push("timestamp_unix >= ?");
            params.push(Value::Integer(min));
        }
        if let Some(max) = self.max_timestamp_unix {
            clauses.push("timestamp_unix <= ?");
            params.push(Value::Integer(max));
        }

        if clauses.is_empty() {
            ("1=1".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let (clause, params) = MetadataFilter::default().sql();
        assert_eq!(clause, "1=1");
        assert!(params.is_empty());
    }

    #[test]
    fn combined_predicates_join_with_and() {
        let filter = MetadataFilter {
            project_name: Some("projA".into()),
            is_validated_solution: Some(true),
            min_timestamp_unix: Some(100),
            ..Default::default()
        };
        let (clause, params) = filter.sql();
        assert_eq!(
            clause,
            "project_name = ? AND is_validated_solution = ? AND timestamp_unix >= ?"
        );
        assert_eq!(params.len(), 3);
    }
}
