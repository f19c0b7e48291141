//! codonmix - amino-acid mixture quantification from Sanger chromatograms
//!
//! Locates a codon of interest through its surrounding amino-acid motif,
//! extracts the trace signal spanning that codon, and deconvolves it into
//! weighted contributions of pure-codon templates with simulated annealing.
//! The per-codon weights are then summed into amino-acid percentages.

pub mod config;
pub mod error;
pub mod fit;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod protein;
pub mod scan;
pub mod sequence;
pub mod summary;
pub mod trace;

// Re-export main types for convenience
pub use config::{AnalysisParams, GeneConfig, MotifDescriptor, ReferenceSequence, ScoringStrategy};
pub use error::{CodonMixError, Result};
pub use fit::{FitResult, MixtureFitter};
pub use model::{CandidateSet, CodonModelLibrary};
pub use pipeline::{analyze, run_batch, Stage};
pub use scan::{MatchWindow, MotifScanner};
pub use summary::{CallStatus, FailureReason, MotifCallResult, ResultSummarizer};
pub use trace::{read_ab1, Chromatogram, CodonWindowExtractor, TraceWindow};
