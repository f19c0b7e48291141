pub mod codon;
pub mod conversion;
pub mod translation;

pub use codon::*;
pub use conversion::*;
pub use translation::*;
