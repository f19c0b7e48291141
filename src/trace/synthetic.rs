//! Simulated chromatograms: one Gaussian peak per called position, with
//! amplitude jitter, baseline noise, and optional mixed positions.

use rand::Rng;

use crate::error::{CodonMixError, Result};
use crate::sequence::{Base, Codon};
use crate::trace::Chromatogram;

#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    sequence: Vec<Base>,
    /// Per-position channel fractions; `None` means pure.
    mixtures: Vec<Option<Vec<(Base, f64)>>>,
    pub spacing: f64,
    pub sigma: f64,
    pub height: f64,
    /// Relative peak-height variation, uniform in `[-j, j]`.
    pub amplitude_jitter: f64,
    /// Baseline noise ceiling, as a fraction of `height`.
    pub noise: f64,
    /// Maximum displacement of reported peak locations from true centers.
    pub anchor_jitter: usize,
}

impl SyntheticTrace {
    pub fn new(sequence: &str) -> Result<Self> {
        let sequence = sequence
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|b| {
                Base::from_byte(b).ok_or_else(|| CodonMixError::InvalidParameter {
                    name: "sequence",
                    reason: format!("'{}' is not a nucleotide", b as char),
                })
            })
            .collect::<Result<Vec<Base>>>()?;
        let mixtures = vec![None; sequence.len()];
        Ok(SyntheticTrace {
            sequence,
            mixtures,
            spacing: 10.0,
            sigma: 2.3,
            height: 1000.0,
            amplitude_jitter: 0.2,
            noise: 0.01,
            anchor_jitter: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Superimpose several bases at one position. Fractions are normalized.
    pub fn with_mixture(mut self, position: usize, fractions: &[(Base, f64)]) -> Self {
        let total: f64 = fractions.iter().map(|(_, f)| f.max(0.0)).sum();
        if position < self.sequence.len() && total > 0.0 {
            self.mixtures[position] = Some(
                fractions
                    .iter()
                    .map(|&(b, f)| (b, f.max(0.0) / total))
                    .collect(),
            );
        }
        self
    }

    /// Mix whole codons starting at `start`, as a polyclonal sample would.
    pub fn with_codon_mixture(mut self, start: usize, codons: &[(Codon, f64)]) -> Self {
        for pos in 0..3 {
            let mut fractions: Vec<(Base, f64)> = Vec::new();
            for &(codon, weight) in codons {
                let base = codon.bases()[pos];
                match fractions.iter_mut().find(|(b, _)| *b == base) {
                    Some((_, f)) => *f += weight,
                    None => fractions.push((base, weight)),
                }
            }
            self = self.with_mixture(start + pos, &fractions);
        }
        self
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_anchor_jitter(mut self, jitter: usize) -> Self {
        self.anchor_jitter = jitter;
        self
    }

    fn fractions(&self, position: usize) -> Vec<(Base, f64)> {
        match &self.mixtures[position] {
            Some(fractions) => fractions.clone(),
            None => vec![(self.sequence[position], 1.0)],
        }
    }

    pub fn build<R: Rng>(&self, name: &str, rng: &mut R) -> Result<Chromatogram> {
        let lead = self.spacing;
        let len = (2.0 * lead + self.spacing * self.sequence.len() as f64).ceil() as usize;
        let mut channels: [Vec<f64>; 4] = Default::default();
        for channel in channels.iter_mut() {
            *channel = (0..len)
                .map(|_| rng.gen_range(0.0..=self.noise.max(0.0)) * self.height)
                .collect();
        }

        let reach = (5.0 * self.sigma).ceil() as isize;
        let jitter = self
            .anchor_jitter
            .min(((self.spacing / 2.0) as usize).saturating_sub(1)) as isize;
        let mut calls = Vec::with_capacity(self.sequence.len());
        let mut peak_locations = Vec::with_capacity(self.sequence.len());

        for position in 0..self.sequence.len() {
            let center = lead + self.spacing * (position as f64 + 0.5);
            let amplitude =
                self.height * (1.0 + rng.gen_range(-1.0..=1.0) * self.amplitude_jitter);
            let fractions = self.fractions(position);

            let first = (center.round() as isize - reach).max(0);
            let last = (center.round() as isize + reach).min(len as isize - 1);
            for t in first..=last {
                let d = t as f64 - center;
                let g = (-d * d / (2.0 * self.sigma * self.sigma)).exp();
                for &(base, fraction) in &fractions {
                    channels[base.channel()][t as usize] += amplitude * fraction * g;
                }
            }

            let called = fractions
                .iter()
                .fold(None, |best: Option<(Base, f64)>, &(b, f)| match best {
                    Some((_, bf)) if bf >= f => best,
                    _ => Some((b, f)),
                })
                .map(|(b, _)| b)
                .unwrap_or(self.sequence[position]);
            calls.push(called.as_char() as u8);

            let offset = if jitter > 0 { rng.gen_range(-jitter..=jitter) } else { 0 };
            peak_locations.push((center.round() as isize + offset) as usize);
        }

        Chromatogram::new(name, channels, &calls, peak_locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pure_trace() {
        let mut rng = StdRng::seed_from_u64(1);
        let chrom = SyntheticTrace::new("ACGT").unwrap().build("s", &mut rng).unwrap();
        assert_eq!(chrom.called_sequence(), b"ACGT");
        assert_eq!(chrom.peak_locations(), &[15, 25, 35, 45]);
        assert_eq!(chrom.len(), 60);
        let at_c = chrom.sample(25);
        assert!(at_c[Base::C.channel()] > 700.0);
        assert!(at_c[Base::A.channel()] < 50.0);
    }

    #[test]
    fn test_codon_mixture_calls_dominant_base() {
        let mut rng = StdRng::seed_from_u64(2);
        let aaa: Codon = "AAA".parse().unwrap();
        let aca: Codon = "ACA".parse().unwrap();
        let chrom = SyntheticTrace::new("AAAAAA")
            .unwrap()
            .with_codon_mixture(3, &[(aaa, 0.3), (aca, 0.7)])
            .build("s", &mut rng)
            .unwrap();
        assert_eq!(chrom.called_sequence(), b"AAAACA");
        let mixed = chrom.sample(chrom.peak_locations()[4]);
        assert!(mixed[Base::A.channel()] > 150.0);
        assert!(mixed[Base::C.channel()] > mixed[Base::A.channel()]);
    }

    #[test]
    fn test_rejects_non_nucleotides() {
        assert!(SyntheticTrace::new("ACXT").is_err());
    }
}
