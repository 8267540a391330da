//! Error taxonomy for the RPC core engine.

use thiserror::Error;

/// Closed set of error conditions the engine can report.
///
/// Transport failures are wrapped rather than flattened so that callers who
/// care can still match on the underlying [`NetError`](crate::net::NetError).
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    /// A blocking call exceeded its timeout with nothing to deliver.
    #[error("timeout")]
    Timeout,

    /// An argument failed validation (null class/context, bad address, ...).
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// A buffer was too small for the data it needed to hold.
    #[error("size error")]
    SizeError,

    /// Allocation failure.
    #[error("out of memory")]
    NoMem,

    /// A header failed to decode or failed its integrity check, or an API
    /// was used out of its required order (e.g. destroying a context with a
    /// non-empty completion queue).
    #[error("protocol error: {0}")]
    ProtocolError(&'static str),

    /// No RPC callback is registered for the id carried by a request header.
    #[error("no matching RPC registration")]
    NoMatch,

    /// A header failed its checksum.
    #[error("checksum error")]
    ChecksumError,

    /// Generic wrap of a transport-layer failure.
    #[error("network error: {0}")]
    NetworkError(#[from] crate::net::NetError),
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Thin wrapper mirroring `HG_Error_to_string`: a stable, human-readable
/// label for each error variant, independent of the `Display` impl (which
/// may carry call-site detail).
pub fn error_to_string(err: &RpcError) -> &'static str {
    match err {
        RpcError::Timeout => "TIMEOUT",
        RpcError::InvalidParam(_) => "INVALID_PARAM",
        RpcError::SizeError => "SIZE_ERROR",
        RpcError::NoMem => "NOMEM_ERROR",
        RpcError::ProtocolError(_) => "PROTOCOL_ERROR",
        RpcError::NoMatch => "NO_MATCH",
        RpcError::ChecksumError => "CHECKSUM_ERROR",
        RpcError::NetworkError(_) => "NETWORK_ERROR",
    }
}

/// Crate version, exposed the way `HG_Version_get` exposes the library's.
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Thin wrapper mirroring `HG_Version_get`.
pub fn version_get() -> (u32, u32, u32) {
    (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_stable() {
        assert_eq!(version_get(), (0, 1, 0));
    }

    #[test]
    fn error_strings_are_stable_labels() {
        assert_eq!(error_to_string(&RpcError::Timeout), "TIMEOUT");
        assert_eq!(error_to_string(&RpcError::NoMatch), "NO_MATCH");
    }
}
