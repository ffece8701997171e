//! Error handling utilities for route handlers

use axum::http::StatusCode;

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{}", context);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::warn!(error = %e, status = status.as_u16(), "{}", context);
            status
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_500_maps_any_display_error() {
        let result: Result<(), &str> = Err("boom");
        assert_eq!(result.log_500("ctx"), Err(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn log_status_keeps_ok_values() {
        let result: Result<u8, &str> = Ok(7);
        assert_eq!(result.log_status("ctx", StatusCode::BAD_REQUEST), Ok(7));
    }
}
