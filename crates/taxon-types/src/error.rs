use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, PartialEq)]
pub enum TypeError {
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("unknown skill status: {0:?}")]
    InvalidStatus(String),
}

/// Check that `value` lies in the closed unit interval.
pub fn check_unit_interval(field: &'static str, value: f64) -> Result<f64, TypeError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(TypeError::OutOfRange { field, value })
    }
}
