//! Content validator: decides whether a raw passage is worth storing.
//!
//! Four independent heuristics, any one of which rejects the text:
//!
//! | Check | Rejects |
//! |-------|---------|
//! | Hex identifier | exactly 24 hex characters (a leaked object id) |
//! | Numeric only | only digits, whitespace and `.,;:-` |
//! | Length | fewer than 10 or more than 1000 characters |
//! | Alphabetic density | ASCII letters make up less than 40% of the text |

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

pub const MIN_CHARS: usize = 10;
pub const MAX_CHARS: usize = 1000;
pub const MIN_ALPHA_RATIO: f64 = 0.4;

/// Why a text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    HexIdentifier,
    NumericOnly,
    Length,
    LowAlphaRatio,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::HexIdentifier => "hex_identifier",
            Rejection::NumericOnly => "numeric_only",
            Rejection::Length => "length",
            Rejection::LowAlphaRatio => "low_alpha_ratio",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Rejection {}

fn hex_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[a-f0-9]{24}$").expect("valid regex"))
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[\d\s.,;:\-]+\s*$").expect("valid regex"))
}

/// Run every check and report the first failure.
pub fn check_content(text: &str) -> Result<(), Rejection> {
    if hex_id_re().is_match(text) {
        return Err(Rejection::HexIdentifier);
    }
    if numeric_re().is_match(text) {
        return Err(Rejection::NumericOnly);
    }

    let len = text.chars().count();
    if !(MIN_CHARS..=MAX_CHARS).contains(&len) {
        return Err(Rejection::Length);
    }

    let alpha = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if (alpha as f64) / (len as f64) < MIN_ALPHA_RATIO {
        return Err(Rejection::LowAlphaRatio);
    }

    Ok(())
}

/// Pure predicate form of [`check_content`].
pub fn is_valid_content(text: &str) -> bool {
    check_content(text).is_ok()
}
