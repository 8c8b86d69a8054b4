/// Convenience result type used across tilecore.
pub type TileResult<T> = Result<T, TileError>;

/// Top-level error taxonomy used by the scheduling, caching and registry APIs.
#[derive(thiserror::Error, Debug)]
pub enum TileError {
    /// A required parameter was absent, out of range, or referred to an unknown node or key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported by this implementation or configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A status query named a tile that is not part of the request.
    #[error("tile ({x}, {y}) is not part of this request")]
    UnknownTile {
        /// Tile column index.
        x: i32,
        /// Tile row index.
        y: i32,
    },

    /// Tile compute logic reported an error or panicked.
    #[error("tile computation failed: {0}")]
    Computation(String),

    /// Invalid configuration values or an unreadable configuration source.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TileError {
    /// Build a [`TileError::InvalidArgument`] value.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Build a [`TileError::Unsupported`] value.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Build a [`TileError::Computation`] value.
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Build a [`TileError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error reports a caller-side argument problem.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::UnknownTile { .. })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
