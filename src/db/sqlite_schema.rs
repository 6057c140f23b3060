pub const SQLITE_SCHEMA_SQL: &str = include_str!("../../sql/sqlite_schema.sql");

pub const SCHEMA_VERSION: &str = "1";

/// Splits a schema script on top-level `;`, ignoring separators inside
/// quoted strings and identifiers.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let body: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    let body = body.trim();
    if !body.is_empty() {
        statements.push(body.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_top_level_semicolons() {
        let sql = "CREATE TABLE a (x TEXT);\n-- note\nINSERT INTO a VALUES ('x;y');\n";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "INSERT INTO a VALUES ('x;y')");
    }

    #[test]
    fn comment_only_chunks_are_dropped() {
        assert!(split_sql_statements("-- header\n;\n  ;").is_empty());
    }

    #[test]
    fn bundled_schema_creates_every_table() {
        let statements = split_sql_statements(SQLITE_SCHEMA_SQL);
        for table in [
            "_db_metadata",
            "learning_settings",
            "item_tiers",
            "tier_progress",
            "review_events",
        ] {
            let needle = format!("CREATE TABLE IF NOT EXISTS \"{table}\"");
            assert!(
                statements.iter().any(|stmt| stmt.contains(&needle)),
                "missing table {table}"
            );
        }
    }
}
