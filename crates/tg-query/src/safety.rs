// SPDX-License-Identifier: MIT OR Apache-2.0
//! Source-level checks over template SQL.
//!
//! Redundant with the compile-time whitelist, but cheap: a template must
//! start with SELECT and must not contain a mutating or set-combining
//! keyword outside string literals.

/// Keywords that must not appear outside string literals.
const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "CALL", "MERGE", "REPLACE", "UNION",
];

/// Strip single-quoted string literals (with `''` escapes) from SQL.
fn strip_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;
    while let Some(c) = chars.next() {
        if in_literal {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    in_literal = false;
                }
            }
            continue;
        }
        if c == '\'' {
            in_literal = true;
            continue;
        }
        out.push(c);
    }
    out
}

/// Validate one template's source.
///
/// # Errors
///
/// A human-readable description of the violation.
pub fn check_template_source(sql: &str) -> Result<(), String> {
    let stripped = strip_literals(sql);
    let mut words = stripped
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty());

    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("select") => {}
        Some(first) => return Err(format!("first token is {first:?}, not SELECT")),
        None => return Err("empty template".to_string()),
    }

    for word in stripped
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        if FORBIDDEN.iter().any(|kw| word.eq_ignore_ascii_case(kw)) {
            return Err(format!("forbidden keyword {word:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select_passes() {
        check_template_source("SELECT a FROM t WHERE tenant_id = :tenant_id").unwrap();
    }

    #[test]
    fn non_select_entry_points_fail() {
        assert!(check_template_source("DELETE FROM t").is_err());
        assert!(check_template_source("  UPDATE t SET a = 1").is_err());
        assert!(check_template_source("").is_err());
    }

    #[test]
    fn forbidden_keywords_fail_anywhere() {
        assert!(check_template_source("SELECT a FROM t; DROP TABLE t").is_err());
        assert!(check_template_source("SELECT a FROM t UNION SELECT b FROM u").is_err());
    }

    #[test]
    fn keywords_inside_string_literals_are_fine() {
        check_template_source("SELECT a FROM t WHERE tenant_id = :tenant_id AND b = 'DROP'")
            .unwrap();
        // Escaped quote inside the literal.
        check_template_source(
            "SELECT a FROM t WHERE tenant_id = :tenant_id AND b = 'it''s a DELETE'",
        )
        .unwrap();
    }

    #[test]
    fn keyword_substrings_do_not_trip_the_scanner() {
        // `updated_at` contains `update` but is not the keyword.
        check_template_source("SELECT updated_at FROM t WHERE tenant_id = :tenant_id").unwrap();
    }
}
