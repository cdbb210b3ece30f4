//! Terminal code interpreter: messages go to a hosted model, its
//! `execute_python` tool calls run in a remote notebook sandbox, and the
//! results, logs and media artifacts come back to the terminal.

pub mod cli;
pub mod config;
pub mod errors;
pub mod execution;
pub mod functions;
pub mod handlers;
pub mod llm;
pub mod printer;
pub mod sandbox;
