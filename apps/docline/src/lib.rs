//! # docline
//!
//! Command-line front end for `docline-core`: configuration loading,
//! argument parsing and the command implementations. The binary in
//! `main.rs` only sets up logging and calls [`cli::execute`].

pub mod cli;
pub mod config;
pub mod processor;
