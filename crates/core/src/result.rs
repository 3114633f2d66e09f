//! Result type definition and extension traits.
//!
//! Provides combinators that log and degrade instead of unwrapping.

use crate::error::Error;

/// The standard Result type for Orchid core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logged fallbacks for any `Result` whose error is displayable.
pub trait ResultExt<T> {
    /// Get the value or a default, logging the error if present.
    fn or_default_logged(self, default: T) -> T;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn or_default_logged(self, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Operation failed, using default: {}", e);
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_or_default_logged_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.or_default_logged(0), 42);
    }

    #[test]
    fn test_result_or_default_logged_err() {
        let result: Result<i32> = Err(Error::not_found("template", "orchestrator"));
        assert_eq!(result.or_default_logged(99), 99);
    }
}
