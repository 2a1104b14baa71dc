//! SQL helpers: statement batch splitting and the ledger table statements.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Split a statement batch into individually executable statements.
///
/// Prepared statements accept a single command, so batches such as
/// `CREATE TABLE ...; CREATE INDEX ...;` are parsed and re-rendered one by
/// one. Input the parser cannot handle falls back to a lexical split on `;`
/// that leaves quoted strings, dollar-quoted bodies and comments intact.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => statements
            .into_iter()
            .map(|stmt| format!("{};", stmt))
            .collect(),
        Err(e) => {
            tracing::warn!("SQL parsing failed, splitting statements lexically: {}", e);
            split_lexically(sql)
        }
    }
}

fn split_lexically(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    let mut push = |statement: &str| {
        let statement = statement.trim();
        if statement.ends_with(';') {
            statements.push(statement.to_string());
        } else if !statement.is_empty() {
            statements.push(format!("{};", statement));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'$' => match dollar_tag(&sql[i..]) {
                Some(tag) => {
                    let body = i + tag.len();
                    i = match sql[body..].find(tag) {
                        Some(end) => body + end + tag.len(),
                        None => bytes.len(),
                    };
                }
                None => i += 1,
            },
            b';' => {
                push(&sql[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        push(&sql[start..]);
    }
    statements
}

/// The `$tag$` opening a dollar-quoted string at the start of `s`, if any
fn dollar_tag(s: &str) -> Option<&str> {
    let rest = s.get(1..)?;
    let end = rest.find('$')?;
    let name = &rest[..end];
    let valid = name
        .chars()
        .enumerate()
        .all(|(n, c)| c == '_' || c.is_ascii_alphabetic() || (n > 0 && c.is_ascii_digit()));

    valid.then(|| &s[..end + 2])
}

/// Statements against the ledger table
#[derive(Debug, Clone)]
pub struct LedgerSql {
    table: String,
}

impl LedgerSql {
    /// `table` must already be a validated identifier
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL run by the bootstrap migration
    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id SERIAL PRIMARY KEY,\n    \
                migration_id INTEGER NOT NULL,\n    \
                name VARCHAR(255) NOT NULL,\n    \
                applied_at TIMESTAMP NOT NULL DEFAULT NOW()\n\
            )",
            self.table
        )
    }

    pub fn drop_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table)
    }

    pub fn select_applied_ids(&self) -> String {
        format!("SELECT migration_id FROM {} ORDER BY migration_id", self.table)
    }

    pub fn select_entries(&self) -> String {
        format!(
            "SELECT migration_id, name, applied_at FROM {} ORDER BY migration_id",
            self.table
        )
    }

    /// Parameters: migration id, name, applied-at timestamp
    pub fn insert_entry(&self) -> String {
        format!(
            "INSERT INTO {} (migration_id, name, applied_at) VALUES ($1, $2, $3)",
            self.table
        )
    }

    /// Parameters: migration id
    pub fn delete_entry(&self) -> String {
        format!("DELETE FROM {} WHERE migration_id = $1", self.table)
    }
}
