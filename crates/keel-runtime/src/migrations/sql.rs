use keel_core::datastore::{BoxFuture, Transaction};
use keel_core::error::{KeelError, Result};
use keel_core::migration::{MigrationLogger, MigrationUnit, Version};

/// A migration unit backed by SQL text.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: Version,
    name: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlMigration {
    /// Create an irreversible unit from its up SQL.
    pub fn new(version: Version, name: impl Into<String>, up_sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: None,
        }
    }

    /// Attach the SQL that reverses this unit.
    pub fn with_down(mut self, down_sql: impl Into<String>) -> Self {
        self.down_sql = Some(down_sql.into());
        self
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }

    async fn run_statements(
        &self,
        sql: &str,
        tx: &mut dyn Transaction,
        log: &MigrationLogger,
    ) -> Result<()> {
        let statements = split_sql_statements(sql);
        if statements.is_empty() {
            log.debug("No statements to execute");
            return Ok(());
        }

        for (index, statement) in statements.iter().enumerate() {
            log.debug(&format!(
                "Executing statement {}/{}",
                index + 1,
                statements.len()
            ));
            if let Err(e) = tx.execute(statement).await {
                log.error(&format!("Statement {} failed: {}", index + 1, e));
                return Err(e);
            }
        }
        Ok(())
    }
}

impl MigrationUnit for SqlMigration {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reversible(&self) -> bool {
        self.down_sql.is_some()
    }

    fn up<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.run_statements(&self.up_sql, tx, log).await })
    }

    fn down<'a>(
        &'a self,
        tx: &'a mut dyn Transaction,
        log: &'a MigrationLogger,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &self.down_sql {
                Some(sql) => self.run_statements(sql, tx, log).await,
                None => Err(KeelError::Execution(format!(
                    "Migration {} ({}) has no down SQL",
                    self.version, self.name
                ))),
            }
        })
    }
}

/// Split SQL into individual statements.
///
/// Semicolons inside dollar-quoted bodies (`$$`, `$tag$`), string literals and
/// comments do not end a statement. Chunks holding only comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;

    let mut dollar_tag: Option<String> = None;
    let mut dollar_body_start = 0;
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                current.push('/');
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        if in_string {
            // A doubled quote closes and reopens, which nets out the same.
            if c == '\'' {
                in_string = false;
            }
            continue;
        }

        if let Some(tag) = &dollar_tag {
            if c == '$' && current[dollar_body_start..].ends_with(tag.as_str()) {
                dollar_tag = None;
            }
            continue;
        }

        match c {
            '-' if chars.peek() == Some(&'-') => {
                in_line_comment = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push('*');
                chars.next();
                in_block_comment = true;
            }
            '\'' => {
                has_code = true;
                in_string = true;
            }
            '$' => {
                has_code = true;
                // Look for a dollar-quote tag like $$ or $tag$
                let mut tag = String::from("$");
                while let Some(&next) = chars.peek() {
                    if next == '$' {
                        tag.push(next);
                        current.push(next);
                        chars.next();
                        break;
                    } else if next.is_alphanumeric() || next == '_' {
                        tag.push(next);
                        current.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }

                // `$1` style parameters never end with a second `$`.
                if tag.len() >= 2 && tag.ends_with('$') {
                    dollar_body_start = current.len();
                    dollar_tag = Some(tag);
                }
            }
            ';' => {
                if has_code {
                    let stmt = current.trim().trim_end_matches(';').trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                }
                current.clear();
                has_code = false;
            }
            c if !c.is_whitespace() => {
                has_code = true;
            }
            _ => {}
        }
    }

    // The last statement may not end with ;
    if has_code {
        let stmt = current.trim().trim_end_matches(';').trim().to_string();
        if !stmt.is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatastore;
    use keel_core::datastore::Datastore;
    use keel_core::ErrorKind;

    #[test]
    fn test_split_simple_statements() {
        let sql = "SELECT 1; SELECT 2; SELECT 3;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let stmts = split_sql_statements("CREATE TABLE a (id INT);\nDROP TABLE b");
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)", "DROP TABLE b"]);
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION test() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
        assert!(stmts[1].contains("SELECT 3"));
    }

    #[test]
    fn test_split_with_named_dollar_tag() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT 2;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT 2"]);
    }

    #[test]
    fn test_split_preserves_dollar_quote_content() {
        let sql = r#"
CREATE FUNCTION notify() RETURNS trigger AS $$
DECLARE
    row_id TEXT;
BEGIN
    row_id := NEW.id::TEXT;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("row_id := NEW.id::TEXT"));
    }

    #[test]
    fn test_split_ignores_semicolons_in_strings_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');\n-- note; not a statement\nSELECT 1; /* x; y */ SELECT 2;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('a;b', 'it''s')");
        assert!(stmts[1].ends_with("SELECT 1"));
        assert!(stmts[2].ends_with("SELECT 2"));
    }

    #[test]
    fn test_split_drops_comment_only_chunks() {
        let sql = "-- Migration: add_users\n-- Created at: 2024-01-01\n\n";
        assert!(split_sql_statements(sql).is_empty());
        assert!(split_sql_statements("").is_empty());
        assert!(split_sql_statements(";;").is_empty());
    }

    #[test]
    fn test_positional_parameter_is_not_a_tag() {
        let stmts = split_sql_statements("SELECT $1; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT $1", "SELECT 2"]);
    }

    #[test]
    fn test_reversible_follows_down_sql() {
        let up_only = SqlMigration::new(Version::new(1), "seed", "INSERT INTO t VALUES (1)");
        assert!(!up_only.reversible());
        assert!(up_only.down_sql().is_none());

        let both = up_only.clone().with_down("DELETE FROM t");
        assert!(both.reversible());
        assert_eq!(both.down_sql(), Some("DELETE FROM t"));
    }

    #[tokio::test]
    async fn test_up_executes_each_statement() {
        let ds = MemoryDatastore::new();
        let unit = SqlMigration::new(
            Version::new(1),
            "create_users",
            "CREATE TABLE users (id INT);\nCREATE INDEX idx ON users (id);",
        );
        let log = MigrationLogger::new(unit.version(), unit.name());

        let mut tx = ds.begin().await.unwrap();
        unit.up(tx.as_mut(), &log).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            ds.statements().await,
            vec!["CREATE TABLE users (id INT)", "CREATE INDEX idx ON users (id)"]
        );
    }

    #[tokio::test]
    async fn test_down_without_sql_fails() {
        let ds = MemoryDatastore::new();
        let unit = SqlMigration::new(Version::new(1), "seed", "SELECT 1");
        let log = MigrationLogger::new(unit.version(), unit.name());

        let mut tx = ds.begin().await.unwrap();
        let err = unit.down(tx.as_mut(), &log).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[tokio::test]
    async fn test_statement_error_propagates() {
        let ds = MemoryDatastore::new();
        ds.fail_statements_containing("broken").await;
        let unit = SqlMigration::new(Version::new(1), "m", "SELECT 1; SELECT broken; SELECT 3;");
        let log = MigrationLogger::new(unit.version(), unit.name());

        let mut tx = ds.begin().await.unwrap();
        assert!(unit.up(tx.as_mut(), &log).await.is_err());
        tx.rollback().await.unwrap();
        assert!(ds.statements().await.is_empty());
    }
}
