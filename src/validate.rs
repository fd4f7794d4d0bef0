// Guard clauses for motion arguments, checked before any hardware call

use crate::config::{MAX_ANGLE, MAX_DIST, MIN_ANGLE, MIN_DIST};
use crate::error::ValidationError;

pub fn in_range(name: &'static str, value: i64, min: i64, max: i64) -> Result<i64, ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            name,
            value: value as f64,
            min,
            max,
        });
    }
    Ok(value)
}

/// Accept only whole numbers within `[min, max]`
pub fn integer_in(
    name: &'static str,
    value: f64,
    min: i64,
    max: i64,
) -> Result<i64, ValidationError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ValidationError::NotInteger { name, value });
    }
    if value < min as f64 || value > max as f64 {
        return Err(ValidationError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(value as i64)
}

pub fn distance(value: i64) -> Result<i64, ValidationError> {
    in_range("distance", value, MIN_DIST, MAX_DIST)
}

pub fn angle(value: i64) -> Result<i64, ValidationError> {
    in_range("angle", value, MIN_ANGLE, MAX_ANGLE)
}
