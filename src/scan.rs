//! Fuzzy localization of an amino-acid motif in a chromatogram's called
//! sequence, across all six reading frames.

use log::{debug, trace};
use rayon::prelude::*;

use crate::config::{MotifDescriptor, ReferenceSequence};
use crate::protein::MotifScorer;
use crate::sequence::{translate_calls, translate_frame, Codon, ReadingFrame, Strand};
use crate::trace::Chromatogram;

const SCORE_EPSILON: f64 = 1e-9;

/// Best approximate occurrence of a motif.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchWindow {
    pub frame: ReadingFrame,
    pub score: f64,
    /// In-frame nucleotide identity against the reference, when one was supplied.
    pub reference_agreement: Option<f64>,
    /// Translation of the matched window.
    pub peptide: String,
    /// First residue of the window within the frame's translation.
    pub aa_start: usize,
    /// Forward-strand call indices spanned by the window (inclusive).
    pub base_start: usize,
    pub base_end: usize,
    /// Sample indices of the first and last called peaks in the window.
    pub sample_start: usize,
    pub sample_end: usize,
    /// Forward-strand call indices of the central codon, in reading order.
    pub codon_bases: [usize; 3],
    /// Reference codon aligned with the central codon.
    pub reference_codon: Option<Codon>,
}

impl MatchWindow {
    pub fn strand(&self) -> Strand {
        self.frame.strand()
    }
}

/// The motif could not be placed above the score threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unlocalized {
    pub best_score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    frame: ReadingFrame,
    aa_start: usize,
    score: f64,
}

pub struct MotifScanner<'a, S: MotifScorer> {
    scorer: S,
    min_score: f64,
    reference: Option<&'a ReferenceSequence>,
}

impl<'a, S: MotifScorer> MotifScanner<'a, S> {
    pub fn new(scorer: S, min_score: f64) -> Self {
        MotifScanner {
            scorer,
            min_score,
            reference: None,
        }
    }

    /// Break score ties in favour of windows that agree with this reference frame.
    pub fn with_reference(mut self, reference: Option<&'a ReferenceSequence>) -> Self {
        self.reference = reference;
        self
    }

    pub fn scan(
        &self,
        chromatogram: &Chromatogram,
        motif: &MotifDescriptor,
    ) -> Result<MatchWindow, Unlocalized> {
        let calls = chromatogram.called_sequence();
        let motif_aa = motif.motif().as_bytes();

        let per_frame: Vec<Vec<Candidate>> = ReadingFrame::ALL
            .par_iter()
            .map(|&frame| self.best_in_frame(calls, frame, motif_aa))
            .collect();
        let candidates: Vec<Candidate> = per_frame.into_iter().flatten().collect();

        let best_score = candidates.iter().map(|c| c.score).fold(0.0, f64::max);
        // The best score has to exceed the threshold, not merely reach it.
        if candidates.is_empty() || best_score <= self.min_score + SCORE_EPSILON {
            debug!(
                "{}: motif {} unlocalized (best score {:.3} <= {:.3})",
                chromatogram.name(),
                motif.name(),
                best_score,
                self.min_score
            );
            return Err(Unlocalized { best_score });
        }

        let tied: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.score + SCORE_EPSILON >= best_score)
            .collect();
        let (chosen, agreement, reference_start) = match self.reference {
            Some(reference) => {
                let mut chosen: Option<(Candidate, f64, Option<usize>)> = None;
                for candidate in tied {
                    let nts = window_nts(calls, &candidate, motif_aa.len());
                    let located = reference.locate(&nts);
                    let agreement = located.map_or(0.0, |(_, identity)| identity);
                    trace!(
                        "{} window {} agrees {:.3} with reference",
                        candidate.frame,
                        candidate.aa_start,
                        agreement
                    );
                    if chosen.map_or(true, |(_, a, _)| agreement > a + SCORE_EPSILON) {
                        chosen = Some((candidate, agreement, located.map(|(start, _)| start)));
                    }
                }
                match chosen {
                    Some((c, a, start)) => (c, Some(a), start),
                    None => return Err(Unlocalized { best_score }),
                }
            }
            None => match tied.first() {
                Some(c) => (*c, None, None),
                None => return Err(Unlocalized { best_score }),
            },
        };

        let mut window = self.to_match_window(chromatogram, chosen, motif, agreement);
        if let (Some(reference), Some(start)) = (self.reference, reference_start) {
            window.reference_codon = reference.codon_at(start + motif.center_index() * 3);
        }
        debug!(
            "{}: motif {} matched {} ({}) at calls {}..={} with score {:.3}",
            chromatogram.name(),
            motif.name(),
            window.peptide,
            window.frame,
            window.base_start,
            window.base_end,
            window.score
        );
        Ok(window)
    }

    /// All windows sharing the top score in one frame, in scan order.
    fn best_in_frame(&self, calls: &[u8], frame: ReadingFrame, motif: &[u8]) -> Vec<Candidate> {
        let peptide = translate_frame(calls, frame);
        let peptide = peptide.as_bytes();
        if peptide.len() < motif.len() {
            return Vec::new();
        }

        let mut best: Vec<Candidate> = Vec::new();
        for (aa_start, window) in peptide.windows(motif.len()).enumerate() {
            let score = self.scorer.score(window, motif);
            let top = best.first().map_or(f64::NEG_INFINITY, |c| c.score);
            if score > top + SCORE_EPSILON {
                best.clear();
                best.push(Candidate { frame, aa_start, score });
            } else if score + SCORE_EPSILON >= top {
                best.push(Candidate { frame, aa_start, score });
            }
        }
        best
    }

    fn to_match_window(
        &self,
        chromatogram: &Chromatogram,
        candidate: Candidate,
        motif: &MotifDescriptor,
        reference_agreement: Option<f64>,
    ) -> MatchWindow {
        let calls = chromatogram.called_sequence();
        let n = calls.len();
        let frame = candidate.frame;
        let first_nt = candidate.aa_start * 3;
        let last_nt = (candidate.aa_start + motif.len()) * 3 - 1;
        let a = frame.to_forward_index(first_nt, n);
        let b = frame.to_forward_index(last_nt, n);
        let (base_start, base_end) = (a.min(b), a.max(b));

        let codon_nt = (candidate.aa_start + motif.center_index()) * 3;
        let codon_bases = [
            frame.to_forward_index(codon_nt, n),
            frame.to_forward_index(codon_nt + 1, n),
            frame.to_forward_index(codon_nt + 2, n),
        ];

        let peptide = translate_calls(&window_nts(calls, &candidate, motif.len()));
        let peaks = chromatogram.peak_locations();

        MatchWindow {
            frame,
            score: candidate.score,
            reference_agreement,
            peptide,
            aa_start: candidate.aa_start,
            base_start,
            base_end,
            sample_start: peaks[base_start],
            sample_end: peaks[base_end],
            codon_bases,
            reference_codon: None,
        }
    }
}

/// Nucleotides of a candidate window, in the candidate's reading direction.
fn window_nts(calls: &[u8], candidate: &Candidate, motif_len: usize) -> Vec<u8> {
    let arranged = candidate.frame.arrange_seq(calls);
    let start = candidate.aa_start * 3;
    arranged[start..start + motif_len * 3].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protein::IdentityScorer;
    use crate::sequence::get_reverse_complement;
    use crate::trace::SyntheticTrace;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // V C V M N K I F A K R
    const K76_DNA: &str = "GTTTGTGTAATGAATAAAATTTTTGCTAAAAGA";
    const LEFT: &str = "CCTAGCGGTTACGGAGCCTTAGCGCGGTCAGC";
    const RIGHT: &str = "GGCCTCGACGCGTCCGGATCCGCGCCGAATGG";

    fn k76t() -> MotifDescriptor {
        "K76T:VCVMNKIFAKR:K:T".parse().unwrap()
    }

    fn chromatogram(seq: &str) -> Chromatogram {
        let mut rng = StdRng::seed_from_u64(7);
        SyntheticTrace::new(seq).unwrap().build("scan", &mut rng).unwrap()
    }

    fn scanner() -> MotifScanner<'static, IdentityScorer> {
        MotifScanner::new(IdentityScorer, 0.7)
    }

    #[test]
    fn test_exact_match_forward() {
        let seq = format!("{LEFT}AA{K76_DNA}{RIGHT}");
        let chrom = chromatogram(&seq);
        let window = scanner().scan(&chrom, &k76t()).unwrap();
        assert_eq!(window.frame, ReadingFrame::Fwd1);
        assert_eq!(window.score, 1.0);
        assert_eq!(window.peptide, "VCVMNKIFAKR");
        let start = LEFT.len() + 2;
        assert_eq!(window.base_start, start);
        assert_eq!(window.base_end, start + 32);
        assert_eq!(window.codon_bases, [start + 15, start + 16, start + 17]);
        assert_eq!(window.sample_start, chrom.peak_locations()[start]);
    }

    #[test]
    fn test_tolerates_single_mismatch() {
        // Central K mutated to T (AAA -> ACA).
        let mutant = K76_DNA.replacen("AATAAAATT", "AATACAATT", 1);
        let chrom = chromatogram(&format!("{LEFT}{mutant}{RIGHT}"));
        let window = scanner().scan(&chrom, &k76t()).unwrap();
        assert_eq!(window.peptide, "VCVMNTIFAKR");
        assert!((window.score - 10.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_strand_invariance() {
        let seq = format!("{LEFT}{K76_DNA}{RIGHT}");
        let chrom = chromatogram(&seq);
        let fwd = scanner().scan(&chrom, &k76t()).unwrap();
        let rc = chrom.reverse_complement();
        let rev = scanner().scan(&rc, &k76t()).unwrap();

        assert!(!fwd.frame.is_reverse());
        assert!(rev.frame.is_reverse());
        assert_eq!(fwd.score, rev.score);
        assert_eq!(fwd.peptide, rev.peptide);
        let n = chrom.called_sequence().len();
        for (f, r) in fwd.codon_bases.iter().zip(rev.codon_bases.iter()) {
            assert_eq!(*f, n - 1 - r);
        }
    }

    #[test]
    fn test_motif_at_read_boundaries() {
        let at_start = chromatogram(&format!("{K76_DNA}{RIGHT}"));
        let window = scanner().scan(&at_start, &k76t()).unwrap();
        assert_eq!(window.base_start, 0);
        assert_eq!(window.score, 1.0);

        let at_end = chromatogram(&format!("{LEFT}{K76_DNA}"));
        let window = scanner().scan(&at_end, &k76t()).unwrap();
        assert_eq!(window.base_end, at_end.called_sequence().len() - 1);
        assert_eq!(window.score, 1.0);

        let exact = chromatogram(K76_DNA);
        assert_eq!(scanner().scan(&exact, &k76t()).unwrap().score, 1.0);
        let rc_dna = get_reverse_complement(K76_DNA.as_bytes());
        let rc = chromatogram(std::str::from_utf8(&rc_dna).unwrap());
        assert_eq!(scanner().scan(&rc, &k76t()).unwrap().frame, ReadingFrame::Rev0);
    }

    #[test]
    fn test_unrelated_sequence_fails() {
        let chrom = chromatogram(&format!("{LEFT}{RIGHT}{LEFT}"));
        let failure = scanner().scan(&chrom, &k76t()).unwrap_err();
        assert!(failure.best_score < 0.7);

        let short = chromatogram("ATGAAA");
        assert_eq!(scanner().scan(&short, &k76t()).unwrap_err().best_score, 0.0);
    }

    #[test]
    fn test_reference_breaks_ties() {
        // Two exact peptide matches in different frames; only the second carries
        // the reference codons (the first has a synonymous GTT -> GTC change).
        let synonymous = format!("GTC{}", &K76_DNA[3..]);
        let seq = format!("{synonymous}CC{K76_DNA}");
        let chrom = chromatogram(&seq);
        let plain = scanner().scan(&chrom, &k76t()).unwrap();
        assert_eq!(plain.frame, ReadingFrame::Fwd0);
        assert_eq!(plain.score, 1.0);

        let reference = ReferenceSequence::new(&format!("ATG{K76_DNA}")).unwrap();
        let oriented = scanner()
            .with_reference(Some(&reference))
            .scan(&chrom, &k76t())
            .unwrap();
        assert_eq!(oriented.frame, ReadingFrame::Fwd2);
        assert_eq!(oriented.reference_agreement, Some(1.0));
        assert_eq!(oriented.reference_codon, Some("AAA".parse().unwrap()));
        assert_eq!(plain.reference_codon, None);
    }

    #[test]
    fn test_score_must_exceed_threshold() {
        // One substituted residue out of eleven scores exactly 10/11.
        let mutant = K76_DNA.replacen("AATAAAATT", "AATACAATT", 1);
        let chrom = chromatogram(&format!("{LEFT}{mutant}{RIGHT}"));

        let at_threshold = MotifScanner::new(IdentityScorer, 10.0 / 11.0)
            .scan(&chrom, &k76t())
            .unwrap_err();
        assert!((at_threshold.best_score - 10.0 / 11.0).abs() < 1e-9);

        let below = MotifScanner::new(IdentityScorer, 0.9).scan(&chrom, &k76t()).unwrap();
        assert!((below.score - 10.0 / 11.0).abs() < 1e-9);
    }
}
