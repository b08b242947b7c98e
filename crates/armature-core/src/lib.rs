//! # armature-core
//!
//! Core crate for the Armature plugin engine. Contains the unified error
//! system plus the small path and text utilities the engine builds plugin
//! identities from.
//!
//! This crate has **no** internal dependencies on other Armature crates.

pub mod error;
pub mod paths;
pub mod result;
pub mod text;

pub use error::{CoreError, ErrorKind};
pub use result::CoreResult;
