//! Fixed-width integer tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// One encoded event: an event id, its parameter ids, then padding.
///
/// Serializes as a bare JSON array of integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Vec<u32>);

impl Token {
    pub fn new(ids: Vec<u32>) -> Self {
        Self(ids)
    }

    /// A token of `width` copies of `id`.
    pub fn filled(id: u32, width: usize) -> Self {
        Self(vec![id; width])
    }

    /// The event-type position.
    pub fn head(&self) -> Option<u32> {
        self.0.first().copied()
    }

    pub fn ids(&self) -> &[u32] {
        &self.0
    }
}

impl Deref for Token {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for Token {
    fn from(ids: Vec<u32>) -> Self {
        Self(ids)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_serializes_as_bare_array() {
        let token = Token::new(vec![1, 0, 0]);
        assert_eq!(serde_json::to_string(&token).unwrap(), "[1,0,0]");
        assert_eq!(token.to_string(), "[1,0,0]");
    }

    #[test]
    fn test_head() {
        assert_eq!(Token::filled(7, 8).head(), Some(7));
        assert_eq!(Token::new(vec![]).head(), None);
    }
}
