//! Dot-separated subjects and wildcard subscription patterns.
//!
//! A pattern token `*` matches exactly one subject token and a trailing `>`
//! matches one or more remaining tokens.

use crate::error::{Result, TransportError};

/// Check a concrete subject used for publishing
pub fn validate_subject(subject: &str) -> Result<()> {
    let valid = !subject.is_empty()
        && !subject.chars().any(|c| c.is_whitespace() || c.is_control())
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">");

    if valid {
        Ok(())
    } else {
        Err(TransportError::InvalidSubject(subject.to_string()))
    }
}

/// A parsed subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    pattern: String,
    tokens: Vec<PatternToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternToken {
    Exact(String),
    /// `*`
    Single,
    /// `>`, only valid as the last token
    Tail,
}

impl SubjectPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TransportError::InvalidPattern(pattern));
        }

        let raw: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(raw.len());
        for (i, token) in raw.iter().enumerate() {
            let parsed = match *token {
                "" => return Err(TransportError::InvalidPattern(pattern.clone())),
                "*" => PatternToken::Single,
                ">" if i == raw.len() - 1 => PatternToken::Tail,
                ">" => return Err(TransportError::InvalidPattern(pattern.clone())),
                exact => PatternToken::Exact(exact.to_string()),
            };
            tokens.push(parsed);
        }

        Ok(Self { pattern, tokens })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut subject_tokens = subject.split('.');

        for token in &self.tokens {
            match (token, subject_tokens.next()) {
                (_, None) => return false,
                (PatternToken::Tail, Some(_)) => return true,
                (PatternToken::Single, Some(_)) => {}
                (PatternToken::Exact(expected), Some(actual)) => {
                    if expected != actual {
                        return false;
                    }
                }
            }
        }

        subject_tokens.next().is_none()
    }
}

impl std::fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}
