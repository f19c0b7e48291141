use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use codonmix::logging::{
    init_logging, log_critical_error, log_shutdown, log_system_info, set_log_level, LogTarget,
};
use codonmix::{
    read_ab1, run_batch, AnalysisParams, CandidateSet, GeneConfig, MotifCallResult, MotifDescriptor,
    ReferenceSequence, ScoringStrategy,
};

/// Quantify amino-acid mixtures at motif-anchored codons in Sanger chromatograms.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// AB1 chromatograms (optionally .gz compressed)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Motif as NAME:MOTIF:REF:ALT, e.g. K76T:VCVMNKIFAKR:K:T (repeatable)
    #[arg(short, long = "motif", required = true)]
    motifs: Vec<MotifDescriptor>,

    /// Target gene name
    #[arg(short, long, default_value = "gene")]
    gene: String,

    /// In-frame reference coding sequence (plain or FASTA)
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Random seed for reproducible fits
    #[arg(long, env = "CODONMIX_SEED")]
    seed: Option<u64>,

    /// Minimum percentage for an amino acid to be reported
    #[arg(long)]
    min_percent: Option<f64>,

    /// Minimum motif identity (0-1) for a match
    #[arg(long)]
    min_score: Option<f64>,

    /// Annealing iterations per restart
    #[arg(long)]
    iterations: Option<usize>,

    #[arg(long)]
    restarts: Option<usize>,

    /// Wall-clock cap per fit, in milliseconds
    #[arg(long)]
    time_budget_ms: Option<u64>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Candidate amino acids, e.g. "K,T", or "all"
    #[arg(long, default_value = "all")]
    candidates: CandidateSet,

    /// Motif scoring: identity or flank
    #[arg(long, default_value = "identity")]
    scoring: ScoringStrategy,

    /// Log to stderr instead of ~/.codonmix/logs
    #[arg(long)]
    log_stderr: bool,
}

impl Args {
    fn params(&self) -> AnalysisParams {
        let mut params = AnalysisParams::from_env();
        params.seed = self.seed.or(params.seed);
        if let Some(min_percent) = self.min_percent {
            params.min_percent = min_percent;
        }
        if let Some(min_score) = self.min_score {
            params.min_motif_score = min_score;
        }
        if let Some(iterations) = self.iterations {
            params.iterations = iterations;
        }
        if let Some(restarts) = self.restarts {
            params.restarts = restarts;
        }
        if let Some(ms) = self.time_budget_ms {
            params.time_budget = Some(std::time::Duration::from_millis(ms));
        }
        if let Some(threads) = self.threads {
            params.threads = threads;
        }
        params.candidates = self.candidates.clone();
        params.scoring = self.scoring;
        params
    }
}

/// Sequence lines of a plain or FASTA file; header lines are skipped.
fn read_reference(path: &Path) -> Result<ReferenceSequence, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let dna: String = text
        .lines()
        .filter(|line| !line.starts_with('>'))
        .collect();
    Ok(ReferenceSequence::new(&dna)?)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let params = args.params();
    let reference = args.reference.as_deref().map(read_reference).transpose()?;
    let gene = GeneConfig::new(&args.gene, reference, args.motifs.clone())?;

    let chromatograms = args
        .files
        .iter()
        .map(|path| read_ab1(path))
        .collect::<Result<Vec<_>, _>>()?;
    info!("Loaded {} chromatograms", chromatograms.len());

    let results = run_batch(&chromatograms, &gene, &params)?;
    println!("{}", MotifCallResult::TSV_HEADER);
    for result in &results {
        println!("{result}");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    human_panic::setup_panic!();
    let args = Args::parse();

    set_log_level();
    let target = if args.log_stderr { LogTarget::Stderr } else { LogTarget::File };
    if let Err(e) = init_logging(target) {
        eprintln!("Failed to initialize logging: {e}");
    }
    log_system_info();

    let result = run(args);
    if let Err(e) = &result {
        log_critical_error(&e.to_string(), Some("run"));
    }
    log_shutdown();
    result
}
