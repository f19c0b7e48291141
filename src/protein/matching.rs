//! Similarity scoring between a translated window and a target motif.

/// Scores an equal-length translated window against a motif, in `[0, 1]`.
pub trait MotifScorer: Sync {
    fn score(&self, window: &[u8], motif: &[u8]) -> f64;
}

/// Fraction of positions with identical residues. `X` (untranslatable) never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityScorer;

impl MotifScorer for IdentityScorer {
    fn score(&self, window: &[u8], motif: &[u8]) -> f64 {
        let len = window.len().min(motif.len());
        if len == 0 {
            return 0.0;
        }
        let matches = identify_matching_positions(window, motif)
            .iter()
            .filter(|&&m| m)
            .count();
        matches as f64 / len as f64
    }
}

/// Identity over the flanks only; the central residue is the polymorphic site
/// and may legitimately differ from the motif.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlankIdentityScorer;

impl MotifScorer for FlankIdentityScorer {
    fn score(&self, window: &[u8], motif: &[u8]) -> f64 {
        let len = window.len().min(motif.len());
        if len < 2 {
            return IdentityScorer.score(window, motif);
        }
        let center = motif.len() / 2;
        let matches = identify_matching_positions(window, motif)
            .iter()
            .enumerate()
            .filter(|&(i, &m)| i != center && m)
            .count();
        matches as f64 / (len - 1) as f64
    }
}

pub fn identify_matching_positions(seq1: &[u8], seq2: &[u8]) -> Vec<bool> {
    seq1.iter()
        .zip(seq2)
        .map(|(a, b)| {
            let a = a.to_ascii_uppercase();
            a != b'X' && a == b.to_ascii_uppercase()
        })
        .collect()
}
