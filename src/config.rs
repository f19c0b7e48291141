//! Immutable configuration passed explicitly into the pipeline: tunable
//! analysis parameters, and one [`GeneConfig`] per target gene.

use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{CodonMixError, Result};
use crate::model::CandidateSet;
use crate::sequence::{normalize_calls, translate_calls, Base, Codon};

/// Which motif similarity function the scanner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringStrategy {
    /// Positional identity over the whole motif.
    #[default]
    Identity,
    /// Positional identity ignoring the central residue.
    FlankIdentity,
}

impl FromStr for ScoringStrategy {
    type Err = CodonMixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "flank" | "flank-identity" => Ok(Self::FlankIdentity),
            other => Err(CodonMixError::InvalidParameter {
                name: "scoring",
                reason: format!("unknown scoring strategy '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisParams {
    /// Minimum motif similarity (fraction of matching residues) to accept a match.
    pub min_motif_score: f64,
    pub scoring: ScoringStrategy,
    /// Amino acids below this percentage are not reported.
    pub min_percent: f64,
    /// Rows per nucleotide period in extracted trace windows.
    pub samples_per_base: usize,
    /// Peak snapping radius, as a fraction of the local peak spacing.
    pub snap_fraction: f64,
    /// Annealing iterations per restart.
    pub iterations: usize,
    pub restarts: usize,
    /// Wall-clock cap per fit. Fits hitting it are not reproducible.
    pub time_budget: Option<Duration>,
    pub sparsity_penalty: f64,
    /// Residual increase, as a fraction of window energy, allowed when minor
    /// codons are folded into heavier ones after the fit.
    pub merge_tolerance: f64,
    /// Residual/energy ratio above which a fit is flagged as not converged.
    pub max_relative_residual: f64,
    /// Starting temperature, as a fraction of the observed window energy.
    pub initial_temperature: f64,
    pub seed: Option<u64>,
    pub threads: usize,
    pub candidates: CandidateSet,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            min_motif_score: 0.7,
            scoring: ScoringStrategy::Identity,
            min_percent: 5.0,
            samples_per_base: 10,
            snap_fraction: 0.35,
            iterations: 12_000,
            restarts: 4,
            time_budget: None,
            sparsity_penalty: 0.02,
            merge_tolerance: 5e-4,
            max_relative_residual: 0.15,
            initial_temperature: 0.02,
            seed: None,
            threads: num_cpus::get(),
            candidates: CandidateSet::All,
        }
    }
}

impl AnalysisParams {
    /// Defaults overlaid with `CODONMIX_*` environment variables.
    pub fn from_env() -> Self {
        let mut params = Self::default();
        if let Some(seed) = env_value("CODONMIX_SEED") {
            params.seed = Some(seed);
        }
        if let Some(min_percent) = env_value("CODONMIX_MIN_PERCENT") {
            params.min_percent = min_percent;
        }
        if let Some(iterations) = env_value("CODONMIX_ITERATIONS") {
            params.iterations = iterations;
        }
        if let Some(restarts) = env_value("CODONMIX_RESTARTS") {
            params.restarts = restarts;
        }
        if let Some(threads) = env_value("CODONMIX_THREADS") {
            params.threads = threads;
        }
        params
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &'static str, reason: &str| {
            Err(CodonMixError::InvalidParameter {
                name,
                reason: reason.to_string(),
            })
        };
        // A match must score above the threshold, so 1.0 would reject everything.
        if !(0.0..1.0).contains(&self.min_motif_score) {
            return invalid("min_motif_score", "must be within [0, 1)");
        }
        if !(0.0..100.0).contains(&self.min_percent) {
            return invalid("min_percent", "must be within [0, 100)");
        }
        if self.samples_per_base < 4 {
            return invalid("samples_per_base", "must be at least 4");
        }
        if !(0.0..0.5).contains(&self.snap_fraction) {
            return invalid("snap_fraction", "must be within [0, 0.5)");
        }
        if self.iterations == 0 || self.restarts == 0 {
            return invalid("iterations", "iterations and restarts must be positive");
        }
        if self.sparsity_penalty < 0.0 || !self.sparsity_penalty.is_finite() {
            return invalid("sparsity_penalty", "must be a non-negative number");
        }
        if self.merge_tolerance < 0.0 || !self.merge_tolerance.is_finite() {
            return invalid("merge_tolerance", "must be a non-negative number");
        }
        if self.max_relative_residual <= 0.0 {
            return invalid("max_relative_residual", "must be positive");
        }
        if self.initial_temperature <= 0.0 || !self.initial_temperature.is_finite() {
            return invalid("initial_temperature", "must be positive");
        }
        if self.threads == 0 {
            return invalid("threads", "must be positive");
        }
        if self.candidates.codons().is_empty() {
            return invalid("candidates", "candidate codon set is empty");
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => {
            debug!("{key} = {raw}");
            Some(value)
        }
        Err(_) => {
            warn!("Ignoring invalid value '{raw}' for {key}");
            None
        }
    }
}

/// A mutation site: an amino-acid context with the residue of interest at its center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotifDescriptor {
    name: String,
    motif: String,
    reference_aa: char,
    alternate_aa: char,
}

const AMINO_ACIDS: &[u8] = b"ACDEFGHIKLMNPQRSTVWY*";

impl MotifDescriptor {
    pub fn new(name: &str, motif: &str, reference_aa: char, alternate_aa: char) -> Result<Self> {
        let invalid = |reason: String| CodonMixError::InvalidMotif {
            name: name.to_string(),
            reason,
        };
        let motif = motif.trim().to_ascii_uppercase();
        if name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if motif.len() < 3 || motif.len() % 2 == 0 {
            return Err(invalid(format!(
                "motif '{motif}' must have odd length >= 3 so the residue of interest is central"
            )));
        }
        if let Some(bad) = motif.bytes().find(|b| !AMINO_ACIDS.contains(b)) {
            return Err(invalid(format!("'{}' is not an amino acid", bad as char)));
        }
        let reference_aa = reference_aa.to_ascii_uppercase();
        let alternate_aa = alternate_aa.to_ascii_uppercase();
        for aa in [reference_aa, alternate_aa] {
            if !aa.is_ascii() || !AMINO_ACIDS.contains(&(aa as u8)) {
                return Err(invalid(format!("'{aa}' is not an amino acid")));
            }
        }
        let center = motif.as_bytes()[motif.len() / 2] as char;
        if center != reference_aa && center != alternate_aa {
            warn!(
                "Motif {name}: central residue {center} is neither {} nor {}",
                reference_aa, alternate_aa
            );
        }
        Ok(MotifDescriptor {
            name: name.trim().to_string(),
            motif,
            reference_aa,
            alternate_aa,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn motif(&self) -> &str {
        &self.motif
    }

    pub fn len(&self) -> usize {
        self.motif.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motif.is_empty()
    }

    pub fn center_index(&self) -> usize {
        self.motif.len() / 2
    }

    pub fn reference_aa(&self) -> char {
        self.reference_aa
    }

    pub fn alternate_aa(&self) -> char {
        self.alternate_aa
    }
}

impl FromStr for MotifDescriptor {
    type Err = CodonMixError;

    /// `NAME:MOTIF:REF:ALT`, e.g. `K76T:VCVMNKIFAKR:K:T`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let single = |field: &str| {
            let mut chars = field.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(CodonMixError::InvalidMotif {
                    name: parts[0].to_string(),
                    reason: format!("'{field}' must be a single amino-acid letter"),
                }),
            }
        };
        if parts.len() != 4 {
            return Err(CodonMixError::InvalidMotif {
                name: s.to_string(),
                reason: "expected NAME:MOTIF:REF:ALT".to_string(),
            });
        }
        MotifDescriptor::new(parts[0], parts[1], single(parts[2])?, single(parts[3])?)
    }
}

/// In-frame reference coding sequence, used to orient ambiguous motif matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    dna: Vec<u8>,
    protein: String,
}

impl ReferenceSequence {
    pub fn new(dna: &str) -> Result<Self> {
        let dna: Vec<u8> = normalize_calls(
            &dna.bytes().filter(|b| !b.is_ascii_whitespace()).collect::<Vec<u8>>(),
        );
        if dna.len() < 3 {
            return Err(CodonMixError::InvalidReference(
                "sequence is shorter than one codon".to_string(),
            ));
        }
        if dna.len() % 3 != 0 {
            return Err(CodonMixError::InvalidReference(format!(
                "length {} is not a multiple of 3",
                dna.len()
            )));
        }
        if let Some(bad) = dna.iter().find(|&&b| Base::from_byte(b).is_none()) {
            return Err(CodonMixError::InvalidReference(format!(
                "'{}' is not a nucleotide",
                *bad as char
            )));
        }
        let protein = translate_calls(&dna);
        Ok(ReferenceSequence { dna, protein })
    }

    pub fn dna(&self) -> &[u8] {
        &self.dna
    }

    pub fn protein(&self) -> &str {
        &self.protein
    }

    /// Codon-aligned start with the best positional identity to `nts`, and
    /// that identity. The earliest start wins ties.
    pub fn locate(&self, nts: &[u8]) -> Option<(usize, f64)> {
        if nts.is_empty() || nts.len() > self.dna.len() {
            return None;
        }
        (0..=self.dna.len() - nts.len())
            .step_by(3)
            .map(|start| {
                let matches = self.dna[start..start + nts.len()]
                    .iter()
                    .zip(nts)
                    .filter(|(a, b)| a.eq_ignore_ascii_case(b))
                    .count();
                (start, matches as f64 / nts.len() as f64)
            })
            .fold(None, |best: Option<(usize, f64)>, (start, identity)| match best {
                Some((_, top)) if top >= identity => best,
                _ => Some((start, identity)),
            })
    }

    /// The reference codon starting at nucleotide `start`.
    pub fn codon_at(&self, start: usize) -> Option<Codon> {
        let triplet = self.dna().get(start..start + 3)?;
        std::str::from_utf8(triplet).ok()?.parse().ok()
    }
}

/// Per-gene lookup data. One instance per target gene, never mutated.
#[derive(Debug, Clone)]
pub struct GeneConfig {
    pub name: String,
    pub reference: Option<ReferenceSequence>,
    pub motifs: Vec<MotifDescriptor>,
}

impl GeneConfig {
    pub fn new(
        name: &str,
        reference: Option<ReferenceSequence>,
        motifs: Vec<MotifDescriptor>,
    ) -> Result<Self> {
        if motifs.is_empty() {
            return Err(CodonMixError::InvalidParameter {
                name: "motifs",
                reason: format!("gene '{name}' has no motifs"),
            });
        }
        Ok(GeneConfig {
            name: name.to_string(),
            reference,
            motifs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(AnalysisParams::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = AnalysisParams {
            min_percent: 120.0,
            ..AnalysisParams::default()
        };
        assert!(params.validate().is_err());

        let params = AnalysisParams {
            restarts: 0,
            ..AnalysisParams::default()
        };
        assert!(params.validate().is_err());

        for min_motif_score in [1.0, 5.0, -0.1] {
            let params = AnalysisParams {
                min_motif_score,
                ..AnalysisParams::default()
            };
            assert!(params.validate().is_err(), "{min_motif_score}");
        }

        let params = AnalysisParams {
            merge_tolerance: -1e-3,
            ..AnalysisParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_motif_parsing() {
        let motif: MotifDescriptor = "K76T:vcvmnkifakr:K:T".parse().unwrap();
        assert_eq!(motif.name(), "K76T");
        assert_eq!(motif.motif(), "VCVMNKIFAKR");
        assert_eq!(motif.center_index(), 5);
        assert_eq!(motif.reference_aa(), 'K');
        assert_eq!(motif.alternate_aa(), 'T');
    }

    #[test]
    fn test_malformed_motifs() {
        assert!("K76T:VCVMNKIFAK:K:T".parse::<MotifDescriptor>().is_err());
        assert!("K76T:VCVMNKIF1KR:K:T".parse::<MotifDescriptor>().is_err());
        assert!("K76T:VCVMNKIFAKR:KK:T".parse::<MotifDescriptor>().is_err());
        assert!("K76T:VCVMNKIFAKR:K".parse::<MotifDescriptor>().is_err());
    }

    #[test]
    fn test_reference_sequence() {
        let reference = ReferenceSequence::new("ATG AAA TGT\nGTA").unwrap();
        assert_eq!(reference.protein(), "MKCV");
        assert_eq!(reference.locate(b"AAATGT"), Some((3, 1.0)));
        assert_eq!(reference.codon_at(3), Some("AAA".parse().unwrap()));
        assert_eq!(reference.codon_at(10), None);
        // Present only out of frame.
        assert!(reference.locate(b"AAAATG").unwrap().1 < 1.0);
        assert_eq!(reference.locate(b"ATGAAATGTGTAA"), None);
        assert!(ReferenceSequence::new("ATGA").is_err());
        assert!(ReferenceSequence::new("ATN").is_err());
    }

    #[test]
    fn test_scoring_strategy_parse() {
        assert_eq!("identity".parse::<ScoringStrategy>().unwrap(), ScoringStrategy::Identity);
        assert_eq!("flank".parse::<ScoringStrategy>().unwrap(), ScoringStrategy::FlankIdentity);
        assert!("blosum".parse::<ScoringStrategy>().is_err());
    }
}
