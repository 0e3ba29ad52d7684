use thiserror::Error;

/// Malformed query or write input, rejected before any work is done.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("filter `{0}` requires a value")]
    MissingFilterValue(String),

    #[error("invalid {field} value: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unknown sort order: {0}")]
    UnknownSort(String),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("`{0}` requires a signed-in viewer")]
    ViewerRequired(&'static str),

    #[error("address text must not be empty")]
    EmptyAddress,

    #[error("address too long ({len} chars, max {max})")]
    AddressTooLong { len: usize, max: usize },
}

/// Why an address could not be turned into a coordinate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("address not found")]
    NotFound,

    #[error("geocoding provider unavailable")]
    ProviderUnavailable,
}

#[derive(Error, Debug)]
pub enum CivicMapError {
    #[error("Configuration error: {0}")]
    Config(String),
}
