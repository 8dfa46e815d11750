//! Error types.
//!
//! This core has no recoverable runtime errors: every input is produced by a
//! trusted internal caller under established preconditions, and contract
//! violations are caught by assertions. The error types below exist only for
//! the few operations whose outcome legitimately depends on the calling
//! context or on caller-supplied parameters.

/// The operation is not permitted in the current calling context (e.g., the
/// CPU Lock state is already active).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadContextError {
    BadContext,
}

/// A caller-supplied parameter is outside the supported range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadParamError {
    BadParam,
}
