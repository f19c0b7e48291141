use std::fmt::Display;

use crate::sequence::codon::translate_called_codon;
use crate::sequence::conversion::get_reverse_complement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

/// Of the 6 possible reading frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingFrame {
    /// Forward, with 0 offset (This pattern applies for all variants)
    Fwd0,
    Fwd1,
    Fwd2,
    Rev0,
    Rev1,
    Rev2,
}

impl ReadingFrame {
    /// Scan order; ties between frames resolve to the earlier entry.
    pub const ALL: [ReadingFrame; 6] = [
        Self::Fwd0,
        Self::Fwd1,
        Self::Fwd2,
        Self::Rev0,
        Self::Rev1,
        Self::Rev2,
    ];

    pub fn offset(&self) -> usize {
        match self {
            Self::Fwd0 | Self::Rev0 => 0,
            Self::Fwd1 | Self::Rev1 => 1,
            Self::Fwd2 | Self::Rev2 => 2,
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, Self::Rev0 | Self::Rev1 | Self::Rev2)
    }

    pub fn strand(&self) -> Strand {
        if self.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    /// The called sequence in this frame's direction, trimmed to start in frame.
    pub fn arrange_seq(&self, seq: &[u8]) -> Vec<u8> {
        let offset = self.offset().min(seq.len());
        if self.is_reverse() {
            get_reverse_complement(seq)[offset..].to_vec()
        } else {
            seq[offset..].to_vec()
        }
    }

    /// Map a nucleotide index of `arrange_seq` back to the forward sequence.
    pub fn to_forward_index(&self, arranged_index: usize, seq_len: usize) -> usize {
        let oriented = arranged_index + self.offset();
        if self.is_reverse() {
            seq_len - 1 - oriented
        } else {
            oriented
        }
    }
}

impl Display for ReadingFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Fwd0 => "Fwd 1",
            Self::Fwd1 => "Fwd 2",
            Self::Fwd2 => "Fwd 3",
            Self::Rev0 => "Rev 1",
            Self::Rev1 => "Rev 2",
            Self::Rev2 => "Rev 3",
        };
        write!(f, "{str}")
    }
}

/// Translate complete codons from the start of `seq`. Codons with ambiguous
/// calls translate to `X`; a trailing partial codon is dropped.
pub fn translate_calls(seq: &[u8]) -> String {
    seq.chunks_exact(3).map(translate_called_codon).collect()
}

/// Translate a called sequence in one reading frame.
pub fn translate_frame(seq: &[u8], frame: ReadingFrame) -> String {
    translate_calls(&frame.arrange_seq(seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_six_frames() {
        // ATG AAA TAA / revcomp TTA TTT CAT
        let seq = b"ATGAAATAA";
        assert_eq!(translate_frame(seq, ReadingFrame::Fwd0), "MK*");
        assert_eq!(translate_frame(seq, ReadingFrame::Fwd1), "*N");
        assert_eq!(translate_frame(seq, ReadingFrame::Rev0), "LFH");
    }

    #[test]
    fn test_forward_index_mapping() {
        let seq = b"ACGTACGTAC";
        let n = seq.len();
        for frame in ReadingFrame::ALL {
            let arranged = frame.arrange_seq(seq);
            for (i, &b) in arranged.iter().enumerate() {
                let fwd = frame.to_forward_index(i, n);
                if frame.is_reverse() {
                    assert_eq!(crate::sequence::get_complementary_base(seq[fwd]), b);
                } else {
                    assert_eq!(seq[fwd], b);
                }
            }
        }
    }

    #[test]
    fn test_short_sequence_does_not_panic() {
        assert_eq!(translate_frame(b"A", ReadingFrame::Rev2), "");
        assert_eq!(translate_frame(b"", ReadingFrame::Fwd1), "");
    }
}
