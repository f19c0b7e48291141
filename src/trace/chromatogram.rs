use crate::error::{CodonMixError, Result};
use crate::sequence::{get_reverse_complement, normalize_calls, Base};

/// Read-only view of one Sanger read: four intensity channels sampled at
/// fine time resolution, and the called bases with their peak sample indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Chromatogram {
    name: String,
    /// Indexed by [`Base::channel`].
    channels: [Vec<f64>; 4],
    calls: Vec<u8>,
    peak_locations: Vec<usize>,
}

impl Chromatogram {
    pub fn new(
        name: &str,
        channels: [Vec<f64>; 4],
        calls: &[u8],
        peak_locations: Vec<usize>,
    ) -> Result<Self> {
        let invalid = |reason: String| CodonMixError::InvalidChromatogram {
            name: name.to_string(),
            reason,
        };

        let len = channels[0].len();
        if len == 0 {
            return Err(invalid("trace channels are empty".to_string()));
        }
        for (base, channel) in Base::ALL.iter().zip(&channels) {
            if channel.len() != len {
                return Err(invalid(format!(
                    "channel {base} has {} samples, expected {len}",
                    channel.len()
                )));
            }
            if channel.iter().any(|v| !v.is_finite()) {
                return Err(invalid(format!("channel {base} contains non-finite intensities")));
            }
        }
        if calls.len() != peak_locations.len() {
            return Err(invalid(format!(
                "{} base calls but {} peak locations",
                calls.len(),
                peak_locations.len()
            )));
        }
        if let Some(&last) = peak_locations.last() {
            if last >= len {
                return Err(invalid(format!("peak location {last} beyond trace length {len}")));
            }
        }
        if peak_locations.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("peak locations are not strictly increasing".to_string()));
        }

        Ok(Chromatogram {
            name: name.to_string(),
            channels,
            calls: normalize_calls(calls),
            peak_locations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of trace samples per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    pub fn channel(&self, base: Base) -> &[f64] {
        &self.channels[base.channel()]
    }

    /// Intensity of all four channels at one sample.
    pub fn sample(&self, index: usize) -> [f64; 4] {
        [
            self.channels[0][index],
            self.channels[1][index],
            self.channels[2][index],
            self.channels[3][index],
        ]
    }

    /// Linear interpolation at a fractional sample position, clamped to the trace.
    pub fn interpolate(&self, position: f64) -> [f64; 4] {
        let last = (self.len() - 1) as f64;
        let position = position.clamp(0.0, last);
        let lo = position.floor() as usize;
        let hi = (lo + 1).min(self.len() - 1);
        let frac = position - lo as f64;
        let mut out = [0.0; 4];
        for (slot, channel) in out.iter_mut().zip(&self.channels) {
            *slot = channel[lo] * (1.0 - frac) + channel[hi] * frac;
        }
        out
    }

    /// Strongest single-channel intensity at one sample.
    pub fn peak_height(&self, index: usize) -> f64 {
        self.sample(index).into_iter().fold(0.0, f64::max)
    }

    pub fn called_sequence(&self) -> &[u8] {
        &self.calls
    }

    pub fn peak_locations(&self) -> &[usize] {
        &self.peak_locations
    }

    /// The same read as seen from the opposite strand.
    pub fn reverse_complement(&self) -> Chromatogram {
        let last = self.len() - 1;
        let mut channels: [Vec<f64>; 4] = Default::default();
        for base in Base::ALL {
            channels[base.complement().channel()] =
                self.channels[base.channel()].iter().rev().copied().collect();
        }
        Chromatogram {
            name: self.name.clone(),
            channels,
            calls: get_reverse_complement(&self.calls),
            peak_locations: self.peak_locations.iter().rev().map(|&p| last - p).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Chromatogram {
        let channels = [
            vec![0.0, 5.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 4.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 3.0],
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ];
        Chromatogram::new("tiny", channels, b"acg", vec![1, 3, 5]).unwrap()
    }

    #[test]
    fn test_accessors() {
        let chrom = tiny();
        assert_eq!(chrom.len(), 6);
        assert_eq!(chrom.called_sequence(), b"ACG");
        assert_eq!(chrom.peak_height(3), 4.0);
        let mid = chrom.interpolate(0.5);
        assert_eq!(mid[Base::A.channel()], 2.5);
        assert_eq!(mid[Base::T.channel()], 0.5);
    }

    #[test]
    fn test_reverse_complement() {
        let chrom = tiny();
        let rc = chrom.reverse_complement();
        assert_eq!(rc.called_sequence(), b"CGT");
        assert_eq!(rc.peak_locations(), &[0, 2, 4]);
        // The G peak at sample 5 becomes a C peak at sample 0.
        assert_eq!(rc.channel(Base::C)[0], 3.0);
        assert_eq!(rc.reverse_complement(), chrom);
    }

    #[test]
    fn test_malformed_input() {
        let ragged = [vec![0.0; 4], vec![0.0; 4], vec![0.0; 3], vec![0.0; 4]];
        assert!(Chromatogram::new("x", ragged, b"A", vec![1]).is_err());

        let channels = [vec![0.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]];
        assert!(Chromatogram::new("x", channels.clone(), b"AC", vec![1]).is_err());
        assert!(Chromatogram::new("x", channels.clone(), b"AC", vec![2, 1]).is_err());
        assert!(Chromatogram::new("x", channels.clone(), b"A", vec![4]).is_err());
        assert!(Chromatogram::new("x", channels, b"", vec![]).is_ok());
    }
}
