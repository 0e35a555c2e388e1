use std::fs;
use std::path::{Path, PathBuf};

// The whole workspace talks to SQLite. A Postgres-flavored literal would
// only fail at runtime, so catch it here instead.
fn source_roots() -> Vec<PathBuf> {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    vec![
        manifest.join("src"),
        manifest.join("../../libs/quotabot-db/src"),
    ]
}

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn line_number(content: &str, byte_idx: usize) -> usize {
    content[..byte_idx].bytes().filter(|b| *b == b'\n').count() + 1
}

fn parse_sql_literal_from_call(content: &str, call_idx: usize) -> Option<(usize, String)> {
    let open_paren_rel = content[call_idx..].find('(')?;
    let mut i = call_idx + open_paren_rel + 1;
    let bytes = content.as_bytes();

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }

    // Raw string: r"..." or r#"..."# etc.
    if bytes[i] == b'r' {
        let mut j = i + 1;
        let mut hashes = 0usize;
        while j < bytes.len() && bytes[j] == b'#' {
            hashes += 1;
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b'"' {
            return None;
        }
        let start = j + 1;
        let mut end_marker = String::from("\"");
        end_marker.push_str(&"#".repeat(hashes));
        let end_rel = content[start..].find(&end_marker)?;
        let end = start + end_rel;
        return Some((i, content[start..end].to_string()));
    }

    // Standard string: "..."
    if bytes[i] == b'"' {
        let start = i + 1;
        let mut j = start;
        let mut escaped = false;
        while j < bytes.len() {
            let b = bytes[j];
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                return Some((i, content[start..j].to_string()));
            }
            j += 1;
        }
    }

    None
}

fn extract_sql_literals(content: &str) -> Vec<(usize, String)> {
    let mut result = Vec::new();
    let mut pos = 0usize;
    while let Some(rel) = content[pos..].find("sqlx::query") {
        let idx = pos + rel;
        if let Some(parsed) = parse_sql_literal_from_call(content, idx) {
            result.push(parsed);
        }
        pos = idx + "sqlx::query".len();
    }
    result
}

// `$` followed by a digit, the Postgres bind style. A lone `$` in a
// literal is fine.
fn has_pg_placeholder(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    bytes
        .windows(2)
        .any(|pair| pair[0] == b'$' && pair[1].is_ascii_digit())
}

fn check_literals(flag: impl Fn(&str) -> bool, what: &str) -> Vec<String> {
    let mut violations = Vec::new();
    for root in source_roots() {
        let mut files = Vec::new();
        collect_rs_files(&root, &mut files);

        for file in files {
            let Ok(content) = fs::read_to_string(&file) else {
                continue;
            };
            for (byte_idx, sql) in extract_sql_literals(&content) {
                if flag(&sql) {
                    let line = line_number(&content, byte_idx);
                    violations.push(format!("{}:{} contains {}", file.display(), line, what));
                }
            }
        }
    }
    violations
}

#[test]
fn sqlx_queries_must_not_use_postgres_placeholders() {
    let violations = check_literals(has_pg_placeholder, "a '$N' placeholder in an sqlx query");

    assert!(
        violations.is_empty(),
        "Found Postgres placeholders in SQL literals:\n{}",
        violations.join("\n")
    );
}

#[test]
fn sqlx_queries_must_not_use_postgres_specific_syntax() {
    let violations = check_literals(
        |sql| {
            let lower = sql.to_lowercase();
            lower.contains("ilike") || lower.contains("now()") || lower.contains("::")
        },
        "Postgres-only SQL syntax",
    );

    assert!(
        violations.is_empty(),
        "Found Postgres-specific SQL in query literals:\n{}",
        violations.join("\n")
    );
}
