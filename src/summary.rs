//! Collapse fitted codon weights into the per-motif call record.

use std::fmt;

use log::{debug, info};

use crate::config::MotifDescriptor;
use crate::fit::{amino_acid_distribution, FitResult};
use crate::sequence::Codon;
use crate::trace::ExtractionFailure;

/// Confidence ceiling for fits whose residual stayed above the acceptable level.
const UNCONVERGED_CONFIDENCE_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Pass,
    Fail,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Pass => write!(f, "Pass"),
            CallStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Why a (sample, motif) unit ended in FAIL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureReason {
    Unlocalized { best_score: f64 },
    Extraction(ExtractionFailure),
    NoCallAboveThreshold,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unlocalized { best_score } => {
                write!(f, "motif not found (best score {best_score:.2})")
            }
            FailureReason::Extraction(failure) => write!(f, "{failure}"),
            FailureReason::NoCallAboveThreshold => write!(f, "no amino acid above threshold"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotifCallResult {
    pub sample: String,
    pub motif: String,
    pub status: CallStatus,
    pub best_aa_call: Option<char>,
    pub best_codon: Option<Codon>,
    pub best_percent: Option<f64>,
    pub ref_name: Option<char>,
    pub ref_percent: Option<f64>,
    pub mutant_name: Option<char>,
    pub mutant_percent: Option<f64>,
    pub confidence: f64,
    /// Reported amino acids and their percentages, largest first.
    pub proportions: Vec<(char, f64)>,
    pub converged: bool,
    pub failure: Option<FailureReason>,
}

impl MotifCallResult {
    pub const TSV_HEADER: &'static str = concat!(
        "Sample\tMotif\tStatus\tBest_AA_Call\tBest_Codon\tBest_Percent\t",
        "Ref_Name\tRef_Percent\tMutant_Name\tMutant_Percent\t",
        "Confidence\tProportions\tFailure"
    );

    pub fn is_pass(&self) -> bool {
        self.status == CallStatus::Pass
    }

    pub fn percent_of(&self, amino_acid: char) -> Option<f64> {
        lookup(&self.proportions, amino_acid)
    }
}

fn char_field(value: Option<char>) -> String {
    value.map(String::from).unwrap_or_default()
}

fn percent_field(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |p| format!("{p:.1}"))
}

impl fmt::Display for MotifCallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proportions = self
            .proportions
            .iter()
            .map(|(aa, p)| format!("{aa}:{p:.1}"))
            .collect::<Vec<_>>()
            .join(";");
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.3}\t{}\t{}",
            self.sample,
            self.motif,
            self.status,
            char_field(self.best_aa_call),
            self.best_codon.map(|c| c.to_string()).unwrap_or_default(),
            percent_field(self.best_percent),
            char_field(self.ref_name),
            percent_field(self.ref_percent),
            char_field(self.mutant_name),
            percent_field(self.mutant_percent),
            self.confidence,
            proportions,
            self.failure.map(|r| r.to_string()).unwrap_or_default(),
        )
    }
}

pub struct ResultSummarizer {
    min_percent: f64,
}

impl ResultSummarizer {
    pub fn new(min_percent: f64) -> Self {
        ResultSummarizer { min_percent }
    }

    pub fn summarize(
        &self,
        sample: &str,
        motif: &MotifDescriptor,
        fit: &FitResult,
    ) -> MotifCallResult {
        let proportions: Vec<(char, f64)> = fit
            .amino_acid_proportions()
            .into_iter()
            .map(|(aa, w)| (aa, 100.0 * w))
            .filter(|&(_, percent)| percent > 0.0 && percent >= self.min_percent)
            .collect();

        let Some(&(best_aa, best_percent)) = proportions.first() else {
            debug!("{sample}/{}: nothing above {:.1}%", motif.name(), self.min_percent);
            return self.failure(sample, motif, FailureReason::NoCallAboveThreshold);
        };
        let best_codon = fit
            .codon_weights()
            .filter(|(codon, _)| codon.amino_acid() == best_aa)
            .fold(None, |best: Option<(Codon, f64)>, (codon, w)| match best {
                Some((_, bw)) if bw >= w => best,
                _ => Some((codon, w)),
            })
            .map(|(codon, _)| codon);
        let confidence = confidence(fit);

        let result = MotifCallResult {
            sample: sample.to_string(),
            motif: motif.name().to_string(),
            status: CallStatus::Pass,
            best_aa_call: Some(best_aa),
            best_codon,
            best_percent: Some(best_percent),
            ref_name: Some(motif.reference_aa()),
            ref_percent: lookup(&proportions, motif.reference_aa()),
            mutant_name: Some(motif.alternate_aa()),
            mutant_percent: lookup(&proportions, motif.alternate_aa()),
            confidence,
            proportions,
            converged: fit.converged,
            failure: None,
        };
        info!(
            "{sample}/{}: {} ({}) at {:.1}% (confidence {:.3})",
            result.motif,
            best_aa,
            best_codon.map(|c| c.to_string()).unwrap_or_default(),
            best_percent,
            confidence
        );
        result
    }

    pub fn failure(
        &self,
        sample: &str,
        motif: &MotifDescriptor,
        reason: FailureReason,
    ) -> MotifCallResult {
        MotifCallResult {
            sample: sample.to_string(),
            motif: motif.name().to_string(),
            status: CallStatus::Fail,
            best_aa_call: None,
            best_codon: None,
            best_percent: None,
            ref_name: None,
            ref_percent: None,
            mutant_name: None,
            mutant_percent: None,
            confidence: 0.0,
            proportions: Vec::new(),
            converged: false,
            failure: Some(reason),
        }
    }
}

fn lookup(proportions: &[(char, f64)], amino_acid: char) -> Option<f64> {
    proportions
        .iter()
        .find(|(aa, _)| *aa == amino_acid)
        .map(|&(_, p)| p)
}

/// Fit quality times agreement of the restarts with the best solution.
pub fn confidence(fit: &FitResult) -> f64 {
    let quality = (1.0 - fit.relative_residual).clamp(0.0, 1.0);
    let best = fit.amino_acid_proportions();
    let agreement = if fit.restart_weights.is_empty() {
        1.0
    } else {
        let total: f64 = fit
            .restart_weights
            .iter()
            .map(|weights| total_variation(&best, &amino_acid_distribution(&fit.codons, weights)))
            .sum();
        1.0 - total / fit.restart_weights.len() as f64
    };
    let confidence = (quality * agreement).clamp(0.0, 1.0);
    if fit.converged {
        confidence
    } else {
        confidence.min(UNCONVERGED_CONFIDENCE_CAP)
    }
}

fn total_variation(p: &[(char, f64)], q: &[(char, f64)]) -> f64 {
    let mut distance: f64 = p
        .iter()
        .map(|&(aa, w)| (w - lookup(q, aa).unwrap_or(0.0)).abs())
        .sum();
    distance += q
        .iter()
        .filter(|(aa, _)| lookup(p, *aa).is_none())
        .map(|&(_, w)| w.abs())
        .sum::<f64>();
    0.5 * distance
}
