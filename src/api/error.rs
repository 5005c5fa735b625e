//! Error type for Linode API calls.

use thiserror::Error;

const NOT_FOUND: u16 = 404;

/// Errors raised by a [`super::LinodeApi`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The API answered with a non-success status. `reasons` carries the
    /// provider's error messages verbatim.
    #[error("linode api returned {status}: {reasons}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Provider error reasons joined with `; `.
        reasons: String,
    },
    /// The request never produced a response.
    #[error("linode api request failed: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },
    /// The response body did not match the expected shape.
    #[error("failed to decode linode api response: {message}")]
    Decode {
        /// Decoder error.
        message: String,
    },
}

impl ApiError {
    /// Returns `true` for a 404 response.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote { status, .. } if *status == NOT_FOUND)
    }
}
