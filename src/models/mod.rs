//! Domain model module declarations.

pub mod artifact;
pub mod diagnostic;
pub mod event;
pub mod result;
pub mod source;
