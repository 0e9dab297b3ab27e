use thiserror::Error;

/// Unified error type for database operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation on {}", target_description(table.as_deref(), columns))]
    UniqueViolation {
        table: Option<String>,
        columns: Vec<String>,
        message: String,
    },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation { message: String },

    /// Check constraint violation
    #[error("Check constraint violation")]
    CheckViolation { message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// True when this is a unique violation on `table.column`.
    pub fn is_unique_on(&self, table: &str, column: &str) -> bool {
        matches!(
            self,
            DbError::UniqueViolation { table: Some(t), columns, .. } if t == table && columns.iter().any(|c| c == column)
        )
    }
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let (table, columns) = parse_unique_target(db_err.message());
                    DbError::UniqueViolation {
                        table,
                        columns,
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation {
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation {
                        message: db_err.message().to_string(),
                    }
                } else {
                    // All other database errors are non-recoverable - convert to anyhow
                    DbError::Other(anyhow::Error::from(err))
                }
            }
            // All other sqlx errors are non-recoverable - convert to anyhow with context
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// SQLite reports unique violations as `UNIQUE constraint failed: table.col[, table.col...]`.
/// It doesn't populate `table()` or `constraint()`, so pull the target out of the message.
fn parse_unique_target(message: &str) -> (Option<String>, Vec<String>) {
    let Some((_, target)) = message.split_once("constraint failed:") else {
        return (None, Vec::new());
    };

    let mut table = None;
    let mut columns = Vec::new();
    for qualified in target.split(',') {
        if let Some((t, c)) = qualified.trim().split_once('.') {
            table.get_or_insert_with(|| t.to_string());
            columns.push(c.to_string());
        }
    }
    (table, columns)
}

fn target_description(table: Option<&str>, columns: &[String]) -> String {
    match table {
        Some(t) => format!("{t}({})", columns.join(", ")),
        None => "unknown target".to_string(),
    }
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;
