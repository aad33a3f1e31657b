#[cfg(feature = "postgres")]
use sqlx::PgPool;

#[cfg(feature = "postgres")]
use crate::error::{Error, Result};

/// Creates the first user schema of the connection's `search_path` when it
/// is missing, so tables created without a schema qualifier have a home.
#[cfg(feature = "postgres")]
pub async fn ensure_schema_from_search_path(pool: &PgPool) -> Result<()> {
    let search_path: String = sqlx::query_scalar("SHOW search_path")
        .fetch_one(pool)
        .await?;
    let schema = search_path
        .split(',')
        .map(|s| s.trim().trim_matches('"'))
        .find(|s| {
            !s.is_empty() && !s.starts_with('$') && *s != "pg_catalog" && *s != "information_schema"
        });
    if let Some(schema) = schema {
        let query = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            schema.replace('"', "\"\"")
        );
        sqlx::query(&query)
            .execute(pool)
            .await
            .map_err(|e| Error::registry(format!("creating schema `{schema}`: {e}")))?;
    }
    Ok(())
}

/// Makes `s` usable as an unquoted SQL identifier.
pub fn sanitize_identifier(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        if c.is_alphanumeric() || c == '_' {
            result.push(c);
        } else {
            result.push_str("__");
        }
    }
    result
}
