//! Media classification and header validation.

pub mod kind;
pub mod validator;

pub use kind::{MediaFilter, MediaKind, extension_of, media_kind};
pub use validator::{validate, validate_bytes, validate_file};
