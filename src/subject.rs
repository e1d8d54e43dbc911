//! Hierarchical subjects.
//!
//! A subject is a dot-delimited list of non-empty tokens, e.g. `ORDERS.EU.NEW`.
//! Patterns used by listeners may contain wildcards:
//!
//! - `*` matches exactly one token (`ORDERS.*.NEW`)
//! - `>` matches one or more trailing tokens and must be last (`ORDERS.>`)
//!
//! Subjects used to publish or reply must be wildcard-free.

use std::fmt;

use crate::types::{Error, Result};

/// Longest accepted subject, in bytes.
pub const MAX_SUBJECT_LEN: usize = 255;

const TOKEN_WILDCARD: &str = "*";
const TAIL_WILDCARD: &str = ">";

/// Validated subject or subject pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    raw: String,
    wildcard: bool,
}

impl Subject {
    /// Parse a subject that may contain wildcards.
    pub fn pattern(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_argument("subject cannot be empty"));
        }
        if raw.len() > MAX_SUBJECT_LEN {
            return Err(Error::invalid_argument(format!(
                "subject is {} bytes, limit is {}",
                raw.len(),
                MAX_SUBJECT_LEN
            )));
        }

        let tokens: Vec<&str> = raw.split('.').collect();
        let last = tokens.len() - 1;
        let mut wildcard = false;
        for (i, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "subject {:?} has an empty token",
                    raw
                )));
            }
            if *token == TAIL_WILDCARD {
                if i != last {
                    return Err(Error::invalid_argument(format!(
                        "subject {:?}: '>' is only allowed as the last token",
                        raw
                    )));
                }
                wildcard = true;
            } else if *token == TOKEN_WILDCARD {
                wildcard = true;
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            wildcard,
        })
    }

    /// Parse a subject that can be published to (no wildcards).
    pub fn publishable(raw: &str) -> Result<Self> {
        let subject = Self::pattern(raw)?;
        if subject.wildcard {
            return Err(Error::invalid_argument(format!(
                "subject {:?} contains wildcards and cannot be published to",
                raw
            )));
        }
        Ok(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// True when this pattern matches the concrete `subject`.
    pub fn matches(&self, subject: &Subject) -> bool {
        let mut pattern_tokens = self.raw.split('.');
        let mut subject_tokens = subject.raw.split('.');
        loop {
            match (pattern_tokens.next(), subject_tokens.next()) {
                (Some(TAIL_WILDCARD), Some(_)) => return true,
                (Some(TOKEN_WILDCARD), Some(_)) => {}
                (Some(p), Some(s)) if p == s => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
