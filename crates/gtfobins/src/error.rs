use thiserror::Error;

/// Failures while loading and typing the catalog data file.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog is not valid JSON of the expected shape.
    #[error("malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A method declared a `type` outside the closed capability set.
    #[error("unknown capability {value:?} for binary {binary:?}")]
    UnknownCapability {
        /// Binary whose method carried the unknown value.
        binary: String,
        /// The offending `type` field.
        value: String,
    },
    /// A method declared a `stream` outside the closed stream-mode set.
    #[error("unknown stream mode {value:?} for binary {binary:?}")]
    UnknownStream {
        /// Binary whose method carried the unknown value.
        binary: String,
        /// The offending `stream` field.
        value: String,
    },
}

/// Expected, recoverable reasons a method cannot be used right now.
///
/// Callers iterate to the next candidate binary or method on any of these;
/// only an exhausted candidate list surfaces to the user.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ResolutionError {
    /// A template references a binary that `which` could not locate on the
    /// remote host.
    #[error("required remote binary not found: {0}")]
    MissingDependency(String),
    /// The binary exists in the catalog but offers none of the requested
    /// capabilities.
    #[error("binary does not support the requested capability")]
    UnsupportedCapability,
    /// No catalog entry (or no entry passing the stream filter) matched.
    #[error("no template available for the requested capability and stream")]
    NoTemplate,
    /// The sudo command spec forbids the arguments this method needs.
    #[error("sudo command spec does not permit this method")]
    SudoNotPossible,
}
