//! Ordering of revision tokens across the notations found in document
//! registers: `R3`, `B2`, `1.2.10`, `2.5` and free text.
//!
//! Rules are tried in a fixed priority and the first one that applies decides;
//! there is no attempt to pick the "best" notation for a pair.

use std::cmp::Ordering;
use std::num::ParseIntError;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

static R_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Rr](\d+)$").expect("valid revision pattern"));
static LETTER_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)(\d*)$").expect("valid revision pattern"));

/// The rule that decided a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    /// `R` followed by digits on both sides.
    RNumber,
    /// Letters with an optional numeric suffix on both sides.
    LetterNumber,
    /// At least one side is dot-separated integers.
    Dotted,
    /// Both sides parse as floating-point numbers.
    Numeric,
    /// Plain string ordering.
    Lexical,
}

/// Returns true when `new` is a later revision than `old`.
///
/// Identical tokens are never newer. A comparison that cannot be evaluated
/// reports `true` so the caller re-ingests rather than silently keeping a
/// stale document.
pub fn is_newer(old: &str, new: &str) -> bool {
    let (old, new) = (old.trim(), new.trim());
    if old == new {
        return false;
    }
    match compare(old, new) {
        Ok((notation, newer)) => {
            debug!(old, new, ?notation, newer, "revision compared");
            newer
        }
        Err(error) => {
            warn!(old, new, %error, "revision comparison failed, assuming newer");
            true
        }
    }
}

/// Which rule [`is_newer`] applies to a pair of tokens.
pub fn notation(old: &str, new: &str) -> Notation {
    let (old, new) = (old.trim(), new.trim());
    if R_NUMBER.is_match(old) && R_NUMBER.is_match(new) {
        Notation::RNumber
    } else if LETTER_NUMBER.is_match(old) && LETTER_NUMBER.is_match(new) {
        Notation::LetterNumber
    } else if (old.contains('.') || new.contains('.'))
        && dotted_components(old).is_some()
        && dotted_components(new).is_some()
    {
        Notation::Dotted
    } else if old.parse::<f64>().is_ok() && new.parse::<f64>().is_ok() {
        Notation::Numeric
    } else {
        Notation::Lexical
    }
}

fn compare(old: &str, new: &str) -> Result<(Notation, bool), ParseIntError> {
    let notation = notation(old, new);
    let newer = match notation {
        Notation::RNumber => r_number(new)? > r_number(old)?,
        Notation::LetterNumber => letter_number(new)? > letter_number(old)?,
        Notation::Dotted => {
            let (Some(old_parts), Some(new_parts)) = (dotted_components(old), dotted_components(new))
            else {
                return Ok((Notation::Lexical, new > old));
            };
            match compare_padded(&old_parts?, &new_parts?) {
                // `1.2` vs `1.2.0` reads as newer both ways; a re-ingest beats a missed change.
                Ordering::Equal => true,
                ordering => ordering == Ordering::Greater,
            }
        }
        Notation::Numeric => {
            let old_value: f64 = old.parse().unwrap_or_default();
            let new_value: f64 = new.parse().unwrap_or_default();
            new_value > old_value
        }
        Notation::Lexical => new > old,
    };
    Ok((notation, newer))
}

fn r_number(token: &str) -> Result<u64, ParseIntError> {
    let digits = R_NUMBER
        .captures(token)
        .and_then(|captures| captures.get(1))
        .map_or("", |m| m.as_str());
    digits.parse()
}

fn letter_number(token: &str) -> Result<(String, u64), ParseIntError> {
    let Some(captures) = LETTER_NUMBER.captures(token) else {
        return Ok((token.to_ascii_uppercase(), 0));
    };
    let letters = captures.get(1).map_or("", |m| m.as_str()).to_ascii_uppercase();
    let digits = captures.get(2).map_or("", |m| m.as_str());
    let number = if digits.is_empty() { 0 } else { digits.parse()? };
    Ok((letters, number))
}

/// Splits a dotted token into integer components. `None` when a component is
/// not made of digits; `Some(Err)` when it is but does not fit in a `u64`.
fn dotted_components(token: &str) -> Option<Result<Vec<u64>, ParseIntError>> {
    let parts: Vec<&str> = token.split('.').map(str::trim).collect();
    if parts
        .iter()
        .any(|part| part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()))
    {
        return None;
    }
    Some(parts.into_iter().map(str::parse).collect())
}

fn compare_padded(old: &[u64], new: &[u64]) -> Ordering {
    let width = old.len().max(new.len());
    (0..width)
        .map(|index| {
            let lhs = new.get(index).copied().unwrap_or(0);
            let rhs = old.get(index).copied().unwrap_or(0);
            lhs.cmp(&rhs)
        })
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_numbers_compare_as_integers() {
        assert!(is_newer("R1", "R2"));
        assert!(is_newer("R2", "R10"));
        assert!(!is_newer("R10", "R2"));
        assert!(!is_newer("r01", "R1"));
        assert_eq!(notation("R1", "r2"), Notation::RNumber);
    }

    #[test]
    fn letters_then_numeric_suffix() {
        assert!(is_newer("A1", "B1"));
        assert!(is_newer("A9", "B1"));
        assert!(is_newer("B", "B1"));
        assert!(!is_newer("b2", "B1"));
        assert_eq!(notation("A", "B2"), Notation::LetterNumber);
    }

    #[test]
    fn dotted_versions_are_zero_padded() {
        assert!(is_newer("1.2", "1.10"));
        assert!(!is_newer("1.10", "1.2"));
        assert!(is_newer("1.2", "2"));
        assert!(is_newer("1.2.0", "1.2"));
        assert!(is_newer("1.2", "1.2.0"));
        assert_eq!(notation("3", "3.1"), Notation::Dotted);
    }

    #[test]
    fn floats_and_lexical_fallback() {
        assert!(is_newer("1e1", "20"));
        assert_eq!(notation("1e1", "20"), Notation::Numeric);
        assert!(is_newer("1.2a", "1.3"));
        assert_eq!(notation("1.2a", "1.3"), Notation::Lexical);
        assert!(is_newer("초안", "최종"));
    }

    #[test]
    fn identical_tokens_are_never_newer() {
        assert!(!is_newer("X", "X"));
        assert!(!is_newer(" R3 ", "R3"));
    }

    #[test]
    fn overflowing_tokens_fail_open() {
        assert!(is_newer("R99999999999999999999999", "R1"));
        assert!(is_newer("1.99999999999999999999999", "1.0"));
    }
}
