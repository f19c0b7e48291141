pub mod anneal;

pub use anneal::{amino_acid_distribution, FitResult, FitSettings, MixtureFitter};
