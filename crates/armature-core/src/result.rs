//! Convenience result type alias for Armature.

use crate::error::CoreError;

/// A specialized `Result` type for Armature operations.
///
/// This is defined as a convenience so that every crate does not need to
/// write `Result<T, CoreError>` explicitly.
pub type CoreResult<T> = Result<T, CoreError>;
