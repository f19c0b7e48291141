pub mod abif;
pub mod chromatogram;
pub mod synthetic;
pub mod window;

pub use abif::read_ab1;
pub use chromatogram::Chromatogram;
pub use synthetic::SyntheticTrace;
pub use window::{CodonWindowExtractor, ExtractionFailure, TraceWindow};
