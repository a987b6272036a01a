//! Account search patterns for ListAccounts.
//!
//! - Empty pattern matches every account
//! - `*` matches any run of characters, `?` exactly one
//! - A pattern without wildcards matches as a substring
//! - Matching is case-insensitive

use regex::{Regex, RegexBuilder};

use super::errors::{ChatError, ChatResult};

/// Compiled account search pattern.
#[derive(Debug, Clone)]
pub struct AccountPattern {
    regex: Regex,
}

impl AccountPattern {
    /// Compile a client-supplied wildcard pattern.
    pub fn compile(pattern: &str) -> ChatResult<Self> {
        let has_wildcard = pattern.contains('*') || pattern.contains('?');

        let source = if pattern.is_empty() {
            String::from(".*")
        } else if has_wildcard {
            let mut out = String::with_capacity(pattern.len() + 8);
            out.push('^');
            for c in pattern.chars() {
                match c {
                    '*' => out.push_str(".*"),
                    '?' => out.push('.'),
                    c => out.push_str(&regex::escape(&c.to_string())),
                }
            }
            out.push('$');
            out
        } else {
            regex::escape(pattern)
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| ChatError::InvalidRequest(format!("bad account pattern: {}", e)))?;

        Ok(Self { regex })
    }

    pub fn matches(&self, username: &str) -> bool {
        self.regex.is_match(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matches_all() {
        let p = AccountPattern::compile("").unwrap();
        assert!(p.matches("alice"));
        assert!(p.matches(""));
    }

    #[test]
    fn test_plain_pattern_is_substring() {
        let p = AccountPattern::compile("li").unwrap();
        assert!(p.matches("alice"));
        assert!(p.matches("CHARLIE"));
        assert!(!p.matches("bob"));
    }

    #[test]
    fn test_star_and_question_mark() {
        let p = AccountPattern::compile("a*e").unwrap();
        assert!(p.matches("alice"));
        assert!(p.matches("ae"));
        assert!(!p.matches("alicia"));

        let p = AccountPattern::compile("b?b").unwrap();
        assert!(p.matches("bob"));
        assert!(!p.matches("boob"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = AccountPattern::compile("a.b*").unwrap();
        assert!(p.matches("a.bc"));
        assert!(!p.matches("axbc"));
    }
}
