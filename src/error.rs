//! Error types for caller contract violations.
//!
//! Expected per-sample outcomes (motif not found, codon window unresolvable,
//! nothing above the reporting threshold) are not errors; they are carried as
//! [`crate::summary::FailureReason`] inside the result record.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodonMixError {
    #[error("Invalid chromatogram '{name}': {reason}")]
    InvalidChromatogram { name: String, reason: String },

    #[error("Invalid motif '{name}': {reason}")]
    InvalidMotif { name: String, reason: String },

    #[error("Invalid reference sequence: {0}")]
    InvalidReference(String),

    #[error("Invalid codon: '{0}'")]
    InvalidCodon(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Malformed AB1 file: {0}")]
    Abif(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodonMixError>;
