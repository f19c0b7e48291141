//! Parametric signal templates for pure codons.
//!
//! A template has one Gaussian peak per codon position, in the channel of
//! that position's base and nowhere else. Peak shape (center offset, width,
//! amplitude) is shared by every template within a fit, so a weighted sum of
//! templates reduces to per-position base marginals times the peak profiles.

use std::str::FromStr;

use crate::error::{CodonMixError, Result};
use crate::sequence::{Base, Codon};
use crate::trace::window::nominal_center;

/// Which codons the fitter may assign weight to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CandidateSet {
    #[default]
    All,
    Codons(Vec<Codon>),
}

impl CandidateSet {
    /// Every codon translating to one of `amino_acids`.
    pub fn for_amino_acids(amino_acids: &[char]) -> Self {
        let mut codons: Vec<Codon> = amino_acids
            .iter()
            .flat_map(|&aa| Codon::encoding(aa))
            .collect();
        codons.sort();
        codons.dedup();
        CandidateSet::Codons(codons)
    }

    pub fn codons(&self) -> Vec<Codon> {
        match self {
            CandidateSet::All => Codon::all().collect(),
            CandidateSet::Codons(codons) => codons.clone(),
        }
    }
}

impl FromStr for CandidateSet {
    type Err = CodonMixError;

    /// `all`, or a comma-separated list of amino-acid letters (`K,T`).
    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CandidateSet::All);
        }
        let mut amino_acids = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            let mut chars = part.chars();
            match (chars.next(), chars.next()) {
                (Some(aa), None) if !Codon::encoding(aa).is_empty() => amino_acids.push(aa),
                _ => {
                    return Err(CodonMixError::InvalidParameter {
                        name: "candidates",
                        reason: format!("'{part}' is not an amino-acid letter"),
                    })
                }
            }
        }
        Ok(CandidateSet::for_amino_acids(&amino_acids))
    }
}

/// Shape of one codon position's peak, in window rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParams {
    /// Displacement from the nominal center of the position's period.
    pub offset: f64,
    /// Gaussian standard deviation.
    pub width: f64,
    pub amplitude: f64,
}

/// Nuisance parameters shared by all templates in a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakShape {
    pub positions: [PeakParams; 3],
}

/// Box constraints on [`PeakParams`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeBounds {
    pub max_offset: f64,
    pub min_width: f64,
    pub max_width: f64,
    pub min_amplitude: f64,
    pub max_amplitude: f64,
}

impl ShapeBounds {
    pub fn for_samples_per_base(samples_per_base: usize) -> Self {
        let s = samples_per_base as f64;
        ShapeBounds {
            max_offset: 0.35 * s,
            min_width: 0.1 * s,
            max_width: 0.5 * s,
            min_amplitude: 0.7,
            max_amplitude: 1.3,
        }
    }

    pub fn clamp(&self, params: PeakParams) -> PeakParams {
        PeakParams {
            offset: params.offset.clamp(-self.max_offset, self.max_offset),
            width: params.width.clamp(self.min_width, self.max_width),
            amplitude: params.amplitude.clamp(self.min_amplitude, self.max_amplitude),
        }
    }
}

impl PeakShape {
    /// Centered peaks with a quarter-period width and unit amplitude.
    pub fn nominal(samples_per_base: usize) -> Self {
        let params = PeakParams {
            offset: 0.0,
            width: 0.25 * samples_per_base as f64,
            amplitude: 1.0,
        };
        PeakShape {
            positions: [params; 3],
        }
    }
}

/// Synthetic trace of a pure codon.
#[derive(Debug, Clone, PartialEq)]
pub struct CodonTemplate {
    pub codon: Codon,
    pub rows: Vec<[f64; 4]>,
}

pub struct CodonModelLibrary {
    samples_per_base: usize,
    candidates: Vec<Codon>,
}

impl CodonModelLibrary {
    pub fn new(samples_per_base: usize, candidates: &CandidateSet) -> Self {
        CodonModelLibrary {
            samples_per_base,
            candidates: candidates.codons(),
        }
    }

    pub fn samples_per_base(&self) -> usize {
        self.samples_per_base
    }

    pub fn rows(&self) -> usize {
        3 * self.samples_per_base
    }

    pub fn candidates(&self) -> &[Codon] {
        &self.candidates
    }

    pub fn bounds(&self) -> ShapeBounds {
        ShapeBounds::for_samples_per_base(self.samples_per_base)
    }

    /// Amplitude-scaled Gaussian of each codon position, evaluated on every row.
    pub fn peak_profiles(&self, shape: &PeakShape) -> [Vec<f64>; 3] {
        let mut profiles: [Vec<f64>; 3] = Default::default();
        for (position, profile) in profiles.iter_mut().enumerate() {
            let params = shape.positions[position];
            let center = nominal_center(self.samples_per_base, position) + params.offset;
            let denom = 2.0 * params.width * params.width;
            *profile = (0..self.rows())
                .map(|row| {
                    let d = row as f64 - center;
                    params.amplitude * (-d * d / denom).exp()
                })
                .collect();
        }
        profiles
    }

    pub fn template(&self, codon: Codon, shape: &PeakShape) -> CodonTemplate {
        let profiles = self.peak_profiles(shape);
        let mut rows = vec![[0.0; 4]; self.rows()];
        for (position, base) in codon.bases().iter().enumerate() {
            for (row, value) in rows.iter_mut().zip(&profiles[position]) {
                row[base.channel()] += value;
            }
        }
        CodonTemplate { codon, rows }
    }

    /// Per-position base composition implied by candidate weights.
    pub fn marginals(&self, weights: &[f64]) -> [[f64; 4]; 3] {
        let mut marginals = [[0.0; 4]; 3];
        for (codon, &w) in self.candidates.iter().zip(weights) {
            for (position, base) in codon.bases().iter().enumerate() {
                marginals[position][base.channel()] += w;
            }
        }
        marginals
    }

    /// Weighted sum of candidate templates, written into `out`.
    pub fn render_mixture(
        &self,
        marginals: &[[f64; 4]; 3],
        profiles: &[Vec<f64>; 3],
        out: &mut [[f64; 4]],
    ) {
        for (row, slot) in out.iter_mut().enumerate() {
            let mut value = [0.0; 4];
            for position in 0..3 {
                let p = profiles[position][row];
                for base in Base::ALL {
                    value[base.channel()] += marginals[position][base.channel()] * p;
                }
            }
            *slot = value;
        }
    }

    pub fn mixture(&self, weights: &[f64], shape: &PeakShape) -> Vec<[f64; 4]> {
        let mut out = vec![[0.0; 4]; self.rows()];
        self.render_mixture(&self.marginals(weights), &self.peak_profiles(shape), &mut out);
        out
    }
}
