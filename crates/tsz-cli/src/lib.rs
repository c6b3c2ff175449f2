//! Command line front end for tsz: argument parsing, console reporting
//! and the batch/watch driver.

pub mod args;
pub mod driver;
pub mod reporter;
pub mod tracing_config;
