//! Common types and utilities for the tsz TypeScript compiler.
//!
//! This crate provides foundational types used across the tsz crates:
//! - Diagnostics (`Diagnostic`, `DiagnosticCategory`, message table)

pub mod diagnostics;
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticMessage};
