use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Dump format errors
    #[error("malformed dump: {0}")]
    Dump(String),

    #[error("invalid block type: {0}")]
    InvalidBlockType(u32),

    #[error("invalid token length: {0} (must be 3-258)")]
    InvalidTokenLength(u32),

    #[error("invalid token distance: {0} (must be 1-32768)")]
    InvalidTokenDistance(u32),

    // Recoverable DP failures: no valid length assignment exists under the
    // current CL costs. The outer search catches these, discards the
    // candidate and retries with a different CL table.
    #[error("literal code DP infeasible under current CL costs")]
    LitDpInfeasible,

    #[error("distance code DP infeasible under current CL costs")]
    DistDpInfeasible,

    #[error("no RLE parse for run (value={value}, count={count}) under current CL costs")]
    RleDpInfeasible { value: u8, count: usize },
}

impl Error {
    /// True for the three recoverable DP failures; everything else is a
    /// hard error.
    pub fn is_dp_failure(&self) -> bool {
        matches!(
            self,
            Error::LitDpInfeasible | Error::DistDpInfeasible | Error::RleDpInfeasible { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
