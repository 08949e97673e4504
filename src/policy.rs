//! # Credential Policy
//!
//! Pure checks applied to a username or password before an account is created or a
//! password is changed. Every function is total: any input, including a missing one,
//! produces a [`Verdict`].
//!
//! ```rust
//! use session_shield::policy::{evaluate_password, PolicyViolation, Verdict};
//!
//! assert_eq!(evaluate_password(Some("Abc123!@")), Verdict::Accepted);
//! assert_eq!(
//!     evaluate_password(Some("P@ssw0rd1!")),
//!     Verdict::Rejected(PolicyViolation::BlacklistedWord("password"))
//! );
//! ```

use std::fmt;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 128;

/// Separators allowed inside a username
const USERNAME_SEPARATORS: [char; 3] = ['_', '-', '.'];

/// Words a password may not contain, even after common character substitutions
const BLACKLIST: [&str; 14] = [
    "password", "qwerty", "letmein", "welcome", "admin", "iloveyou", "monkey", "dragon",
    "football", "baseball", "sunshine", "master", "shadow", "trustno",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    Missing,
    TooShort { min: usize, actual: usize },
    TooLong { max: usize, actual: usize },
    InvalidCharacter(char),
    SeparatorAtEdge,
    ConsecutiveSeparators,
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
    BlacklistedWord(&'static str),
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::Missing => write!(f, "value is missing"),
            PolicyViolation::TooShort { min, actual } => {
                write!(f, "too short: {actual} characters, minimum is {min}")
            }
            PolicyViolation::TooLong { max, actual } => {
                write!(f, "too long: {actual} characters, maximum is {max}")
            }
            PolicyViolation::InvalidCharacter(c) => write!(f, "character {c:?} is not allowed"),
            PolicyViolation::SeparatorAtEdge => {
                write!(f, "must not start or end with a separator")
            }
            PolicyViolation::ConsecutiveSeparators => {
                write!(f, "must not contain two separators in a row")
            }
            PolicyViolation::MissingLowercase => write!(f, "needs a lowercase letter"),
            PolicyViolation::MissingUppercase => write!(f, "needs an uppercase letter"),
            PolicyViolation::MissingDigit => write!(f, "needs a digit"),
            PolicyViolation::MissingSymbol => write!(f, "needs a symbol"),
            PolicyViolation::BlacklistedWord(word) => {
                write!(f, "contains the common word {word:?}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(PolicyViolation),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn violation(&self) -> Option<PolicyViolation> {
        match self {
            Verdict::Accepted => None,
            Verdict::Rejected(v) => Some(*v),
        }
    }
}

impl From<Result<(), PolicyViolation>> for Verdict {
    fn from(result: Result<(), PolicyViolation>) -> Self {
        match result {
            Ok(()) => Verdict::Accepted,
            Err(v) => Verdict::Rejected(v),
        }
    }
}

fn check_length(len: usize, min: usize, max: usize) -> Result<(), PolicyViolation> {
    if len < min {
        return Err(PolicyViolation::TooShort { min, actual: len });
    }
    if len > max {
        return Err(PolicyViolation::TooLong { max, actual: len });
    }
    Ok(())
}

fn is_separator(c: char) -> bool {
    USERNAME_SEPARATORS.contains(&c)
}

fn username_rules(username: &str) -> Result<(), PolicyViolation> {
    check_length(username.chars().count(), USERNAME_MIN_LEN, USERNAME_MAX_LEN)?;

    if let Some(bad) = username
        .chars()
        .find(|&c| !c.is_ascii_alphanumeric() && !is_separator(c))
    {
        return Err(PolicyViolation::InvalidCharacter(bad));
    }

    let starts = username.chars().next().is_some_and(is_separator);
    let ends = username.chars().next_back().is_some_and(is_separator);
    if starts || ends {
        return Err(PolicyViolation::SeparatorAtEdge);
    }

    let bytes = username.as_bytes();
    if bytes
        .windows(2)
        .any(|w| is_separator(w[0] as char) && is_separator(w[1] as char))
    {
        return Err(PolicyViolation::ConsecutiveSeparators);
    }
    Ok(())
}

/// Undo the usual leetspeak substitutions and lowercase
fn normalize(password: &str) -> String {
    password
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' => 'i',
            '3' => 'e',
            '@' => 'a',
            '$' => 's',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn password_rules(password: &str) -> Result<(), PolicyViolation> {
    check_length(password.chars().count(), PASSWORD_MIN_LEN, PASSWORD_MAX_LEN)?;

    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PolicyViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PolicyViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PolicyViolation::MissingDigit);
    }
    if !password.chars().any(|c| c.is_ascii_punctuation()) {
        return Err(PolicyViolation::MissingSymbol);
    }

    let normalized = normalize(password);
    if let Some(word) = BLACKLIST.iter().find(|w| normalized.contains(*w)) {
        return Err(PolicyViolation::BlacklistedWord(*word));
    }
    Ok(())
}

pub fn evaluate_username(username: Option<&str>) -> Verdict {
    username
        .ok_or(PolicyViolation::Missing)
        .and_then(username_rules)
        .into()
}

pub fn evaluate_password(password: Option<&str>) -> Verdict {
    password
        .ok_or(PolicyViolation::Missing)
        .and_then(password_rules)
        .into()
}

pub fn is_valid_username(username: &str) -> bool {
    evaluate_username(Some(username)).is_accepted()
}

pub fn is_valid_password(password: &str) -> bool {
    evaluate_password(Some(password)).is_accepted()
}
