use thiserror::Error;

/// Failure of a single monthly query against a rate source.
///
/// Never fatal for a build: the builder records the whole month as unknown.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateSourceError {
    #[error("no quotes available for {year}-{month:02}: {reason}")]
    Unavailable { year: i32, month: u32, reason: String },

    #[error("malformed quotes for {year}-{month:02}: {reason}")]
    Malformed { year: i32, month: u32, reason: String },

    #[error("quote request for {year}-{month:02} exceeded {timeout_ms}ms")]
    Timeout { year: i32, month: u32, timeout_ms: u128 },
}

/// Failure to interpret one raw vacancy row. The row is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number in `{field}`: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid publication date {0:?}")]
    InvalidDate(String),
}
