//! Utility macros and functions used across the crate.

/// Returns early with an error if a condition is not met.
///
/// Similar to `assert!`, but returns the error instead of panicking.
///
/// ```ignore
/// ensure!(length <= limit, ContentError::payload_too_large(limit, length));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
