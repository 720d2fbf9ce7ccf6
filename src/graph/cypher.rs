use lazy_static::lazy_static;
use regex::Regex;

use super::{GraphError, GraphResult};

lazy_static! {
    static ref UPDATING_CLAUSE: Regex =
        Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP)\b").expect("static regex");
    static ref MATCH_CLAUSE: Regex = Regex::new(r"(?i)\bMATCH\b").expect("static regex");
    static ref RETURN_CLAUSE: Regex = Regex::new(r"(?i)\bRETURN\b").expect("static regex");
}

/// Read-only sanity check for selector seeds and saved queries. String literals are
/// stripped first so `WHERE n.name = 'SET'` is not mistaken for a clause.
pub fn validate_read_only(query: &str) -> GraphResult<()> {
    let stripped = strip_string_literals(query);
    if stripped.trim().is_empty() {
        return Err(GraphError::InvalidCypher("cypher query is empty".to_string()));
    }
    if UPDATING_CLAUSE.is_match(&stripped) {
        return Err(GraphError::InvalidCypher("cypher query contains updating clauses".to_string()));
    }
    if !MATCH_CLAUSE.is_match(&stripped) || !RETURN_CLAUSE.is_match(&stripped) {
        return Err(GraphError::InvalidCypher("cypher query is invalid".to_string()));
    }
    Ok(())
}

fn strip_string_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in query.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                    out.push(' ');
                }
            }
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_read_queries() {
        assert!(validate_read_only("MATCH (n:User) WHERE n.name = 'SET ME' RETURN n").is_ok());
        assert!(validate_read_only("match (n) return n limit 5").is_ok());
    }

    #[test]
    fn rejects_mutations_and_garbage() {
        let err = validate_read_only("MATCH (n) DETACH DELETE n").unwrap_err();
        assert_eq!(err.to_string(), "cypher query contains updating clauses");
        assert!(validate_read_only("   ").is_err());
        assert_eq!(validate_read_only("RETURN 1").unwrap_err().to_string(), "cypher query is invalid");
    }
}
