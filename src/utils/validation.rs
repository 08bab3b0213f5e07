//! Input validation utilities
//!
//! Guards command arguments before they reach the control connection.

/// Longest argument accepted for a single command.
pub const MAX_ARGUMENT_LENGTH: usize = 4096;

/// Validate that a command argument is non-empty and cannot smuggle a second
/// command onto the control connection.
pub fn is_valid_argument(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= MAX_ARGUMENT_LENGTH
        && !input.contains(['\r', '\n', '\0'])
}
