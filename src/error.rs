use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that aborts a training, prediction or evaluation run.
#[derive( Error, Debug )]
pub enum Error {
    /// A session record could not be read
    #[error( "malformed input at line {line}: {reason}" )]
    MalformedInput { line: usize, reason: String },

    /// An internal invariant does not hold, e.g. a probability table without mass.
    #[error( "inconsistent model state: {0}" )]
    Inconsistent( String ),

    #[error( "i/o error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "parameter serialization failed: {0}" )]
    Json( #[from] serde_json::Error ),
}

impl Error {
    pub fn malformed( line: usize, reason: impl Into<String> ) -> Error {
	Error::MalformedInput { line, reason: reason.into() }
    }
}
