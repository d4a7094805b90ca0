//! Pairing codes.
//!
//! A code is 8 symbols from the RFC 4648 base32 alphabet (`A-Z`, `2-7`),
//! giving 40 bits of entropy. Codes are short enough to read aloud and
//! avoid the easily-confused digits `0`, `1`, `8` and `9`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// The 32-symbol alphabet codes are drawn from.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Number of symbols in a code.
pub const CODE_LENGTH: usize = 8;

/// Short-lived pairing code shared between the LLM side and the browser side.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Draw a code uniformly from the alphabet.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code: String = (0..CODE_LENGTH)
            .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Parse user input. Lowercase input is accepted and normalised.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let upper = raw.trim().to_ascii_uppercase();
        if is_valid_code(&upper) {
            Ok(Self(upper))
        } else {
            Err(RelayError::invalid_field(
                "sessionCode",
                format!("must be {CODE_LENGTH} characters of A-Z and 2-7"),
            ))
        }
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `s` is exactly a well-formed, already-normalised code.
pub fn is_valid_code(s: &str) -> bool {
    s.len() == CODE_LENGTH && s.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = RelayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = RelayError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}
