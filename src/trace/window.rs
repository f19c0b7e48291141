//! Extraction of the multichannel trace window spanning one codon.

use log::{debug, trace};

use crate::error::{CodonMixError, Result};
use crate::scan::MatchWindow;
use crate::sequence::{Base, Strand};
use crate::trace::Chromatogram;

/// Observed signal for one codon: `3 * samples_per_base` rows by 4 channels,
/// each nucleotide period resampled onto `samples_per_base` rows and scaled
/// so that its strongest row sums to 1 across channels. Rows read 5'->3'
/// along the coding strand.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceWindow {
    samples_per_base: usize,
    rows: Vec<[f64; 4]>,
    /// Source sample indices of the three snapped peaks, in reading order.
    peak_samples: [usize; 3],
    strand: Strand,
}

impl TraceWindow {
    pub fn new(
        samples_per_base: usize,
        rows: Vec<[f64; 4]>,
        peak_samples: [usize; 3],
        strand: Strand,
    ) -> Result<Self> {
        if samples_per_base == 0 || rows.len() != 3 * samples_per_base {
            return Err(CodonMixError::InvalidParameter {
                name: "rows",
                reason: format!(
                    "trace window needs exactly {} rows, got {}",
                    3 * samples_per_base,
                    rows.len()
                ),
            });
        }
        Ok(TraceWindow {
            samples_per_base,
            rows,
            peak_samples,
            strand,
        })
    }

    pub fn samples_per_base(&self) -> usize {
        self.samples_per_base
    }

    pub fn rows(&self) -> &[[f64; 4]] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn peak_samples(&self) -> [usize; 3] {
        self.peak_samples
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// Sum of squared intensities.
    pub fn energy(&self) -> f64 {
        self.rows.iter().flat_map(|r| r.iter()).map(|v| v * v).sum()
    }

    /// Nominal row of the peak for codon position `position` (0..3).
    pub fn nominal_center(&self, position: usize) -> f64 {
        nominal_center(self.samples_per_base, position)
    }

    /// Per-position channel fractions at the nominal peak rows; a crude,
    /// model-free estimate of the base composition of each position.
    pub fn base_fractions(&self) -> [[f64; 4]; 3] {
        let mut fractions = [[0.25; 4]; 3];
        for (position, slot) in fractions.iter_mut().enumerate() {
            let center = self.nominal_center(position);
            let lo = center.floor() as usize;
            let hi = center.ceil() as usize;
            let mut row = [0.0; 4];
            for (c, v) in row.iter_mut().enumerate() {
                *v = 0.5 * (self.rows[lo][c] + self.rows[hi][c]).max(0.0);
            }
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                for (s, v) in slot.iter_mut().zip(row) {
                    *s = v / total;
                }
            }
        }
        fractions
    }
}

pub fn nominal_center(samples_per_base: usize, position: usize) -> f64 {
    (position * samples_per_base) as f64 + (samples_per_base as f64 - 1.0) / 2.0
}

/// Why no trace window could be produced for an otherwise valid match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The codon's peak periods run past either end of the trace.
    OutOfRange,
    /// Peak anchors collapse, cross, or are implausibly spaced after snapping.
    AmbiguousAnchors,
    /// No signal at one of the codon's peaks.
    NoSignal,
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::OutOfRange => "codon window outside trace range",
            Self::AmbiguousAnchors => "ambiguous peak anchors",
            Self::NoSignal => "no signal at codon peaks",
        };
        write!(f, "{str}")
    }
}

/// Largest allowed ratio between the longest and shortest nucleotide period.
const MAX_PERIOD_RATIO: f64 = 3.0;

pub struct CodonWindowExtractor {
    samples_per_base: usize,
    snap_fraction: f64,
}

impl CodonWindowExtractor {
    pub fn new(samples_per_base: usize, snap_fraction: f64) -> Self {
        CodonWindowExtractor {
            samples_per_base,
            snap_fraction,
        }
    }

    pub fn extract(
        &self,
        chromatogram: &Chromatogram,
        window: &MatchWindow,
    ) -> std::result::Result<TraceWindow, ExtractionFailure> {
        let peaks = chromatogram.peak_locations();
        let n = peaks.len();
        let mut codon = window.codon_bases;
        codon.sort_unstable();
        let first = codon[0];
        if codon[1] != first + 1 || codon[2] != first + 2 || codon[2] >= n {
            return Err(ExtractionFailure::AmbiguousAnchors);
        }

        let spacing = (peaks[first + 2] as f64 - peaks[first] as f64) / 2.0;
        if spacing < 2.0 {
            return Err(ExtractionFailure::AmbiguousAnchors);
        }
        let radius = ((self.snap_fraction * spacing).round() as usize).max(1);

        let mut centers = [0.0f64; 3];
        for (slot, index) in centers.iter_mut().zip(first..first + 3) {
            let snapped = self.snap(chromatogram, peaks[index], radius);
            if chromatogram.peak_height(snapped) <= 0.0 {
                return Err(ExtractionFailure::NoSignal);
            }
            *slot = snapped as f64;
        }
        let left = match first.checked_sub(1) {
            Some(index) => self.snap(chromatogram, peaks[index], radius) as f64,
            None => centers[0] - spacing,
        };
        let right = if first + 3 < n {
            self.snap(chromatogram, peaks[first + 3], radius) as f64
        } else {
            centers[2] + spacing
        };

        let anchors = [left, centers[0], centers[1], centers[2], right];
        if anchors.windows(2).any(|w| w[0] >= w[1]) {
            trace!("{}: anchors {anchors:?} are not increasing", chromatogram.name());
            return Err(ExtractionFailure::AmbiguousAnchors);
        }
        let bounds: Vec<f64> = anchors.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        if bounds[0] < 0.0 || bounds[3] > (chromatogram.len() - 1) as f64 {
            return Err(ExtractionFailure::OutOfRange);
        }
        let periods: Vec<f64> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
        let shortest = periods.iter().copied().fold(f64::INFINITY, f64::min);
        let longest = periods.iter().copied().fold(0.0, f64::max);
        if shortest < 1.0 || longest / shortest > MAX_PERIOD_RATIO {
            return Err(ExtractionFailure::AmbiguousAnchors);
        }

        let s = self.samples_per_base;
        let mut rows = Vec::with_capacity(3 * s);
        for (period, width) in periods.iter().enumerate() {
            let start = rows.len();
            for k in 0..s {
                let t = bounds[period] + (k as f64 + 0.5) * width / s as f64;
                rows.push(chromatogram.interpolate(t));
            }
            let scale = rows[start..]
                .iter()
                .map(|r| r.iter().sum::<f64>())
                .fold(0.0, f64::max);
            if scale <= 0.0 {
                return Err(ExtractionFailure::NoSignal);
            }
            for row in rows[start..].iter_mut() {
                for v in row.iter_mut() {
                    *v /= scale;
                }
            }
        }

        let mut peak_samples = [centers[0] as usize, centers[1] as usize, centers[2] as usize];
        let strand = window.strand();
        if strand == Strand::Reverse {
            rows.reverse();
            for row in rows.iter_mut() {
                let forward = *row;
                for base in Base::ALL {
                    row[base.channel()] = forward[base.complement().channel()];
                }
            }
            peak_samples.reverse();
        }

        debug!(
            "{}: extracted codon window at samples {:?} ({:?} strand)",
            chromatogram.name(),
            peak_samples,
            strand
        );
        TraceWindow::new(s, rows, peak_samples, strand)
            .map_err(|_| ExtractionFailure::AmbiguousAnchors)
    }

    /// Move an anchor to the strongest sample within `radius`.
    fn snap(&self, chromatogram: &Chromatogram, anchor: usize, radius: usize) -> usize {
        let lo = anchor.saturating_sub(radius);
        let hi = (anchor + radius).min(chromatogram.len() - 1);
        let mut best = anchor.min(hi);
        let mut best_height = chromatogram.peak_height(best);
        for index in lo..=hi {
            let height = chromatogram.peak_height(index);
            if height > best_height {
                best = index;
                best_height = height;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Codon, ReadingFrame};
    use crate::trace::SyntheticTrace;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn match_at(frame: ReadingFrame, codon_bases: [usize; 3]) -> MatchWindow {
        MatchWindow {
            frame,
            score: 1.0,
            reference_agreement: None,
            peptide: String::new(),
            aa_start: 0,
            base_start: 0,
            base_end: 0,
            sample_start: 0,
            sample_end: 0,
            codon_bases,
            reference_codon: None,
        }
    }

    fn extractor() -> CodonWindowExtractor {
        CodonWindowExtractor::new(10, 0.35)
    }

    #[test]
    fn test_window_shape_and_content() {
        let mut rng = StdRng::seed_from_u64(3);
        let chrom = SyntheticTrace::new("GGACTGG").unwrap().build("w", &mut rng).unwrap();
        let window = extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [2, 3, 4])).unwrap();
        assert_eq!(window.len(), 30);
        assert_eq!(window.peak_samples(), [35, 45, 55]);
        let fractions = window.base_fractions();
        assert!(fractions[0][Base::A.channel()] > 0.95);
        assert!(fractions[1][Base::C.channel()] > 0.95);
        assert!(fractions[2][Base::T.channel()] > 0.95);
        for period in 0..3 {
            let max_sum = window.rows()[period * 10..(period + 1) * 10]
                .iter()
                .map(|r| r.iter().sum::<f64>())
                .fold(0.0, f64::max);
            assert!((max_sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_snaps_to_true_peaks() {
        let mut rng = StdRng::seed_from_u64(4);
        let chrom = SyntheticTrace::new("GGACTGG")
            .unwrap()
            .with_noise(0.0)
            .with_anchor_jitter(3)
            .build("w", &mut rng)
            .unwrap();
        let window = extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [2, 3, 4])).unwrap();
        assert_eq!(window.peak_samples(), [35, 45, 55]);
    }

    #[test]
    fn test_reverse_strand_window_matches_forward() {
        let mut rng = StdRng::seed_from_u64(5);
        let chrom = SyntheticTrace::new("GGACTGG").unwrap().build("w", &mut rng).unwrap();
        let fwd = extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [2, 3, 4])).unwrap();

        let rc = chrom.reverse_complement();
        let rev = extractor().extract(&rc, &match_at(ReadingFrame::Rev0, [4, 3, 2])).unwrap();
        assert_eq!(rev.strand(), Strand::Reverse);
        for (a, b) in fwd.rows().iter().zip(rev.rows()) {
            for c in 0..4 {
                assert!((a[c] - b[c]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_mixed_position_fractions() {
        let mut rng = StdRng::seed_from_u64(6);
        let aaa: Codon = "AAA".parse().unwrap();
        let aca: Codon = "ACA".parse().unwrap();
        let chrom = SyntheticTrace::new("GGAAAGG")
            .unwrap()
            .with_codon_mixture(2, &[(aaa, 0.5), (aca, 0.5)])
            .build("w", &mut rng)
            .unwrap();
        let window = extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [2, 3, 4])).unwrap();
        let middle = window.base_fractions()[1];
        assert!((middle[Base::A.channel()] - 0.5).abs() < 0.05);
        assert!((middle[Base::C.channel()] - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_edge_codons() {
        let mut rng = StdRng::seed_from_u64(8);
        let chrom = SyntheticTrace::new("ACTGG").unwrap().build("w", &mut rng).unwrap();
        // First codon: left boundary extrapolated half a period before the first peak.
        assert!(extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [0, 1, 2])).is_ok());
        // Codon running past the last call.
        assert_eq!(
            extractor().extract(&chrom, &match_at(ReadingFrame::Fwd0, [3, 4, 5])),
            Err(ExtractionFailure::AmbiguousAnchors)
        );
    }

    #[test]
    fn test_truncated_trace_is_out_of_range() {
        // The first peak sits on sample 0, so its period starts before the trace does.
        let channels = [
            vec![9.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0; 6],
            vec![0.0, 0.0, 9.0, 0.0, 9.0, 0.0],
            vec![0.0; 6],
        ];
        let chrom = Chromatogram::new("edge", channels, b"AGG", vec![0, 2, 4]).unwrap();
        assert_eq!(
            CodonWindowExtractor::new(4, 0.0)
                .extract(&chrom, &match_at(ReadingFrame::Fwd0, [0, 1, 2])),
            Err(ExtractionFailure::OutOfRange)
        );
    }
}
