//! Command handlers.

pub mod interpreter;
