/// All errors that can occur within strata.
///
/// Two families exist: geometry/configuration problems (a step or pooling
/// factor that does not divide a dimension, mismatched operand lengths,
/// hyperparameters that were never set) and sequencing problems (a backward
/// pass requested without a matching forward pass). Every check returns one of
/// these to the caller; nothing in the engine aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `(in_side + 2*pad - filter_side)` is not a multiple of the step.
    #[error(
        "input and filter size difference is not a factor of the step size: \
         in_side {in_side}, pad {pad}, filter_side {filter_side}, step {step}"
    )]
    StepMismatch {
        in_side: usize,
        pad: usize,
        filter_side: usize,
        step: usize,
    },

    /// The filter does not fit inside the padded input.
    #[error("filter side {filter_side} exceeds padded input side {padded_side}")]
    FilterTooLarge {
        filter_side: usize,
        padded_side: usize,
    },

    /// Two operands (or an operand and its declared geometry) disagree in length.
    #[error("{context}: expected {expected} elements, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A pooling factor does not divide the dimension it pools over.
    #[error("pooling factor {factor} is not a factor of the input {axis} ({dim})")]
    PoolingFactor {
        factor: usize,
        axis: &'static str,
        dim: usize,
    },

    /// A "use cached hyperparameters" call was made before they were set.
    #[error("{0} not set")]
    MissingHyperparameters(&'static str),

    /// Backward was requested without a preceding forward on the same instance.
    #[error("{0}: feed-forward has not been called for the current cycle")]
    BackwardBeforeForward(&'static str),

    /// Checkpoint read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic configuration message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Geometry or configuration problem detected before any state changed.
    Configuration,
    /// Calls made out of order (backward without forward).
    Sequencing,
    /// Underlying IO failure.
    Io,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BackwardBeforeForward(_) => ErrorKind::Sequencing,
            Error::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Configuration,
        }
    }

    pub fn is_sequencing(&self) -> bool {
        self.kind() == ErrorKind::Sequencing
    }
}

/// Convenience Result type used throughout strata.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

/// Return a [`Error::LengthMismatch`] unless `got == expected`.
pub fn ensure_len(context: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::LengthMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}
