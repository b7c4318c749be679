use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("No road network node within {max_distance_m} m of ({lat}, {lng})")]
    NoNetworkNearby {
        lat: f64,
        lng: f64,
        max_distance_m: f64,
    },
    #[error("No path found between the snapped endpoints")]
    NoPathFound,
    #[error("Search budget exhausted after expanding {expanded} nodes")]
    Timeout { expanded: usize },
    #[error("Upstream data unavailable: {0}")]
    UpstreamDataUnavailable(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable reason code reported to API callers.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::InvalidCoordinates(_) | Error::NoNetworkNearby { .. } => "INVALID_COORDINATES",
            Error::NoPathFound => "NO_PATH_FOUND",
            Error::Timeout { .. } => "TIMEOUT",
            Error::UpstreamDataUnavailable(_) => "UPSTREAM_DATA_UNAVAILABLE",
            Error::InvalidData(_) | Error::InvalidConfig(_) | Error::IoError(_) => "INTERNAL",
        }
    }

    /// Only upstream outages are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamDataUnavailable(_) | Error::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapping_failure_is_reported_as_invalid_coordinates() {
        let err = Error::NoNetworkNearby {
            lat: 0.0,
            lng: 0.0,
            max_distance_m: 500.0,
        };
        assert_eq!(err.reason(), "INVALID_COORDINATES");
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_request_has_its_own_reason() {
        let err = Error::InvalidRequest("unknown variant `bike`".into());
        assert_eq!(err.reason(), "INVALID_REQUEST");
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_errors_are_retryable() {
        assert!(Error::UpstreamDataUnavailable("store down".into()).is_retryable());
        assert!(!Error::NoPathFound.is_retryable());
        assert!(!Error::Timeout { expanded: 3 }.is_retryable());
    }
}
