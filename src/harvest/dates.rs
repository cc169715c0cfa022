//! Datestamp validation for selective harvesting.
//!
//! Two granularities are accepted: day (`YYYY-MM-DD`) and second
//! (`YYYY-MM-DDThh:mm:ssZ`). Only the shape is checked; both bounds of a
//! range must share a granularity and compare in order as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::harvest::traits::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Second,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Day => f.write_str("day"),
            Granularity::Second => f.write_str("second"),
        }
    }
}

const DAY_SHAPE: &[u8] = b"dddd-dd-dd";
const SECOND_SHAPE: &[u8] = b"dddd-dd-ddTdd:dd:ddZ";

/// `d` in a shape matches an ASCII digit, anything else matches itself.
fn matches_shape(value: &str, shape: &[u8]) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == shape.len()
        && bytes.iter().zip(shape).all(|(b, s)| match s {
            b'd' => b.is_ascii_digit(),
            literal => b == literal,
        })
}

/// Granularity of a datestamp, or `None` if it matches neither form.
pub fn granularity(value: &str) -> Option<Granularity> {
    if matches_shape(value, DAY_SHAPE) {
        Some(Granularity::Day)
    } else if matches_shape(value, SECOND_SHAPE) {
        Some(Granularity::Second)
    } else {
        None
    }
}

pub fn is_valid_date(value: &str) -> bool {
    granularity(value).is_some()
}

/// Validates an optional `from`/`until` pair.
///
/// # Errors
///
/// - [`ValidationError::InvalidDate`] if either bound has the wrong shape
/// - [`ValidationError::GranularityMismatch`] if the bounds differ in granularity
/// - [`ValidationError::InvertedRange`] if `from > until`
pub fn validate_date_range(from: Option<&str>, until: Option<&str>) -> Result<(), ValidationError> {
    let from_granularity = from.map(|value| check("from", value)).transpose()?;
    let until_granularity = until.map(|value| check("until", value)).transpose()?;

    if let (Some(from), Some(until), Some(from_g), Some(until_g)) =
        (from, until, from_granularity, until_granularity)
    {
        if from_g != until_g {
            return Err(ValidationError::GranularityMismatch {
                from: from_g,
                until: until_g,
            });
        }
        if from > until {
            return Err(ValidationError::InvertedRange {
                from: from.to_string(),
                until: until.to_string(),
            });
        }
    }

    Ok(())
}

fn check(field: &'static str, value: &str) -> Result<Granularity, ValidationError> {
    granularity(value).ok_or_else(|| ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
