//! Per-(sample, motif) state machine and the parallel batch driver.
//!
//! `Scanning -> Extracting -> Fitting -> Summarizing -> {Pass, FAIL}`; a
//! failing stage ends the unit with a FAIL record and later stages never run.

use std::fmt;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{AnalysisParams, GeneConfig, MotifDescriptor, ScoringStrategy};
use crate::error::{CodonMixError, Result};
use crate::fit::{FitSettings, MixtureFitter};
use crate::model::CodonModelLibrary;
use crate::protein::{FlankIdentityScorer, IdentityScorer, MotifScorer};
use crate::scan::{MatchWindow, MotifScanner, Unlocalized};
use crate::sequence::{get_complementary_base, Codon, Strand};
use crate::summary::{FailureReason, MotifCallResult, ResultSummarizer};
use crate::trace::{Chromatogram, CodonWindowExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scanning,
    Extracting,
    Fitting,
    Summarizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            Stage::Scanning => "scanning",
            Stage::Extracting => "extracting",
            Stage::Fitting => "fitting",
            Stage::Summarizing => "summarizing",
        };
        write!(f, "{str}")
    }
}

fn enter(stage: Stage, sample: &str, motif: &MotifDescriptor) {
    debug!("{sample}/{}: {stage}", motif.name());
}

fn scan_with<S: MotifScorer>(
    scorer: S,
    chromatogram: &Chromatogram,
    gene: &GeneConfig,
    motif: &MotifDescriptor,
    params: &AnalysisParams,
) -> std::result::Result<MatchWindow, Unlocalized> {
    MotifScanner::new(scorer, params.min_motif_score)
        .with_reference(gene.reference.as_ref())
        .scan(chromatogram, motif)
}

/// The basecaller's codon at the match, read on the match strand.
fn called_codon(chromatogram: &Chromatogram, matched: &MatchWindow) -> Option<Codon> {
    let calls = chromatogram.called_sequence();
    let mut triplet = [0u8; 3];
    for (slot, &index) in triplet.iter_mut().zip(&matched.codon_bases) {
        let call = *calls.get(index)?;
        *slot = match matched.strand() {
            Strand::Forward => call,
            Strand::Reverse => get_complementary_base(call),
        };
    }
    std::str::from_utf8(&triplet).ok()?.parse().ok()
}

/// The codon the site should carry without a mutation: the aligned reference
/// codon, else the reference residue's codon closest to the call.
fn wild_type_codon(
    chromatogram: &Chromatogram,
    matched: &MatchWindow,
    motif: &MotifDescriptor,
) -> Option<Codon> {
    if matched.reference_codon.is_some() {
        return matched.reference_codon;
    }
    let called = called_codon(chromatogram, matched)?;
    Codon::encoding(motif.reference_aa())
        .into_iter()
        .min_by_key(|codon| codon.distance(&called))
}

/// Run one unit of work to completion. Parameters are validated before any
/// stage runs; after that, expected failures come back as FAIL records.
pub fn analyze<R: Rng + ?Sized>(
    chromatogram: &Chromatogram,
    gene: &GeneConfig,
    motif: &MotifDescriptor,
    params: &AnalysisParams,
    rng: &mut R,
) -> Result<MotifCallResult> {
    params.validate()?;
    Ok(run_unit(chromatogram, gene, motif, params, rng))
}

fn run_unit<R: Rng + ?Sized>(
    chromatogram: &Chromatogram,
    gene: &GeneConfig,
    motif: &MotifDescriptor,
    params: &AnalysisParams,
    rng: &mut R,
) -> MotifCallResult {
    let sample = chromatogram.name();
    let summarizer = ResultSummarizer::new(params.min_percent);

    enter(Stage::Scanning, sample, motif);
    let scanned = match params.scoring {
        ScoringStrategy::Identity => scan_with(IdentityScorer, chromatogram, gene, motif, params),
        ScoringStrategy::FlankIdentity => {
            scan_with(FlankIdentityScorer, chromatogram, gene, motif, params)
        }
    };
    let matched = match scanned {
        Ok(matched) => matched,
        Err(Unlocalized { best_score }) => {
            warn!("{sample}/{}: motif not found (best score {best_score:.3})", motif.name());
            return summarizer.failure(sample, motif, FailureReason::Unlocalized { best_score });
        }
    };

    enter(Stage::Extracting, sample, motif);
    let extractor = CodonWindowExtractor::new(params.samples_per_base, params.snap_fraction);
    let window = match extractor.extract(chromatogram, &matched) {
        Ok(window) => window,
        Err(failure) => {
            warn!("{sample}/{}: {failure}", motif.name());
            return summarizer.failure(sample, motif, FailureReason::Extraction(failure));
        }
    };

    enter(Stage::Fitting, sample, motif);
    let library = CodonModelLibrary::new(params.samples_per_base, &params.candidates);
    let wild_type = wild_type_codon(chromatogram, &matched, motif);
    debug!(
        "{sample}/{}: expecting wild type {}",
        motif.name(),
        wild_type.map_or_else(|| "unknown".to_string(), |c| c.to_string())
    );
    let fit = MixtureFitter::new(&library, FitSettings::from(params))
        .with_expected(wild_type, &[motif.reference_aa(), motif.alternate_aa()])
        .fit(&window, rng);
    if !fit.converged {
        warn!(
            "{sample}/{}: fit did not converge (relative residual {:.3})",
            motif.name(),
            fit.relative_residual
        );
    }

    enter(Stage::Summarizing, sample, motif);
    summarizer.summarize(sample, motif, &fit)
}

/// Stable FNV-1a over (seed, sample, motif), so a unit's random stream does
/// not depend on scheduling.
fn unit_seed(seed: u64, sample: &str, motif: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    seed.to_le_bytes()
        .iter()
        .chain(sample.as_bytes())
        .chain(&[0u8])
        .chain(motif.as_bytes())
        .fold(OFFSET, |hash, &byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

fn unit_rng(seed: Option<u64>, sample: &str, motif: &str) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(unit_seed(seed, sample, motif)),
        None => StdRng::from_entropy(),
    }
}

/// Analyze every (chromatogram, motif) pair in parallel; results are sorted
/// by sample then motif.
pub fn run_batch(
    chromatograms: &[Chromatogram],
    gene: &GeneConfig,
    params: &AnalysisParams,
) -> Result<Vec<MotifCallResult>> {
    params.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()
        .map_err(|e| CodonMixError::InvalidParameter {
            name: "threads",
            reason: e.to_string(),
        })?;

    let units: Vec<(&Chromatogram, &MotifDescriptor)> = chromatograms
        .iter()
        .flat_map(|c| gene.motifs.iter().map(move |m| (c, m)))
        .collect();
    info!(
        "Analyzing {} samples x {} motifs for {} on {} threads",
        chromatograms.len(),
        gene.motifs.len(),
        gene.name,
        params.threads
    );

    let mut results: Vec<MotifCallResult> = pool.install(|| {
        units
            .par_iter()
            .map(|&(chromatogram, motif)| {
                let mut rng = unit_rng(params.seed, chromatogram.name(), motif.name());
                run_unit(chromatogram, gene, motif, params, &mut rng)
            })
            .collect()
    });
    results.sort_by(|a, b| a.sample.cmp(&b.sample).then_with(|| a.motif.cmp(&b.motif)));

    let passed = results.iter().filter(|r| r.is_pass()).count();
    info!("{passed}/{} calls passed", results.len());
    Ok(results)
}
