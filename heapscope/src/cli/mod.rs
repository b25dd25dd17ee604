//! Command-line interface for the demo binary

pub mod args;

pub use args::Args;
