//! Domain model module declarations.

pub mod instance;
