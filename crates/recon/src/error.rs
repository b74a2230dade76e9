use std::fmt;

/// Fatal conditions only. Everything recoverable (coercion failures,
/// date-parse failures, duplicate approval ids, amount drift in relaxed
/// tiers) is reported through the diagnostic report instead.
#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad tolerance, zero node cap, etc.).
    ConfigValidation(String),
    /// A required input is missing or empty after filtering.
    EmptyInput { source: &'static str },
    /// A required join produced zero rows.
    EmptyJoin { left: &'static str, right: &'static str },
    /// Missing required column in tabular input.
    MissingColumn { source: String, column: String },
    /// A row in tabular input failed to parse.
    RowParse { source: String, row: usize, msg: String },
    /// IO error (file read, etc.) at the caller boundary.
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::EmptyInput { source } => {
                write!(f, "required input '{source}' is missing or empty after filtering")
            }
            Self::EmptyJoin { left, right } => {
                write!(f, "join of '{left}' against '{right}' produced zero rows")
            }
            Self::MissingColumn { source, column } => {
                write!(f, "input '{source}': missing column '{column}'")
            }
            Self::RowParse { source, row, msg } => {
                write!(f, "input '{source}', row {row}: {msg}")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
