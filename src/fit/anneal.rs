//! Simulated-annealing deconvolution of a codon trace window into a mixture
//! of pure-codon templates.
//!
//! The state is a point on the weight simplex over candidate codons plus the
//! shared peak shape. Weight moves transfer mass between codons, so the
//! weights stay non-negative and sum to one by construction; shape moves nudge
//! one position's offset, width or amplitude inside its bounds. Crossover
//! moves swap one base between two supported codons, which leaves the
//! per-position composition (and so the residual) unchanged and lets the
//! penalty choose between mixtures the trace cannot tell apart.
//!
//! Each restart anneals on a geometric temperature schedule. A greedy polish
//! then moves leftover mass onto better codons, and a final consolidation
//! folds minor codons into heavier ones while the residual barely moves.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, trace};
use rand::Rng;

use crate::config::AnalysisParams;
use crate::model::{CodonModelLibrary, PeakParams, PeakShape, ShapeBounds};
use crate::sequence::Codon;
use crate::trace::TraceWindow;

/// Final temperature relative to the starting one.
const COOLING_RANGE: f64 = 1e-4;
/// How often the wall-clock budget is checked, in iterations.
const CLOCK_CHECK_INTERVAL: usize = 256;
const POLISH_PASSES: usize = 3;
/// Share of proposals that transfer weight; crossovers take the next share,
/// shape steps the rest.
const TRANSFER_SHARE: f64 = 0.45;
const CROSSOVER_SHARE: f64 = 0.1;
/// Cap on the per-channel baseline the objective subtracts, in normalized
/// intensity.
const MAX_BASELINE: f64 = 0.05;
/// Penalty multipliers for the expected wild-type codon and for codons of
/// the motif's reference and alternate residues.
const WILD_TYPE_PENALTY: f64 = 0.25;
const MOTIF_RESIDUE_PENALTY: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct FitSettings {
    pub iterations: usize,
    pub restarts: usize,
    pub time_budget: Option<std::time::Duration>,
    pub sparsity_penalty: f64,
    pub merge_tolerance: f64,
    pub max_relative_residual: f64,
    pub initial_temperature: f64,
}

impl From<&AnalysisParams> for FitSettings {
    fn from(params: &AnalysisParams) -> Self {
        FitSettings {
            iterations: params.iterations,
            restarts: params.restarts,
            time_budget: params.time_budget,
            sparsity_penalty: params.sparsity_penalty,
            merge_tolerance: params.merge_tolerance,
            max_relative_residual: params.max_relative_residual,
            initial_temperature: params.initial_temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub codons: Vec<Codon>,
    /// Non-negative, summing to 1; aligned with `codons`.
    pub weights: Vec<f64>,
    pub shape: PeakShape,
    /// Sum of squared differences between observed and fitted window, after
    /// the per-channel baseline.
    pub residual: f64,
    /// `residual` divided by the observed window energy.
    pub relative_residual: f64,
    pub converged: bool,
    /// Best weights of every restart that ran, in restart order.
    pub restart_weights: Vec<Vec<f64>>,
    pub restart_residuals: Vec<f64>,
    pub evaluations: usize,
}

impl FitResult {
    pub fn codon_weights(&self) -> impl Iterator<Item = (Codon, f64)> + '_ {
        self.codons.iter().copied().zip(self.weights.iter().copied())
    }

    /// Weight summed by translated amino acid, largest first.
    pub fn amino_acid_proportions(&self) -> Vec<(char, f64)> {
        amino_acid_distribution(&self.codons, &self.weights)
    }
}

/// Collapse codon weights onto amino acids, sorted by descending weight
/// (ties by letter, so the order is deterministic).
pub fn amino_acid_distribution(codons: &[Codon], weights: &[f64]) -> Vec<(char, f64)> {
    let mut totals: Vec<(char, f64)> = Vec::new();
    for (codon, &w) in codons.iter().zip(weights) {
        let aa = codon.amino_acid();
        match totals.iter_mut().find(|(a, _)| *a == aa) {
            Some((_, total)) => *total += w,
            None => totals.push((aa, w)),
        }
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    totals
}

#[derive(Debug, Clone)]
struct State {
    weights: Vec<f64>,
    marginals: [[f64; 4]; 3],
    shape: PeakShape,
    profiles: [Vec<f64>; 3],
    residual: f64,
    objective: f64,
}

/// `(from, to, amount)`
type Transfer = (usize, usize, f64);

enum Move {
    Transfer(Transfer),
    Crossover([Transfer; 2]),
    Shape { position: usize, previous: PeakParams, previous_profile: Vec<f64> },
}

pub struct MixtureFitter<'a> {
    library: &'a CodonModelLibrary,
    settings: FitSettings,
    bounds: ShapeBounds,
    index_of: HashMap<Codon, usize>,
    /// Candidate indices one substitution away from each candidate.
    neighbors: Vec<Vec<usize>>,
    /// Per-candidate multiplier on the sparsity penalty.
    penalty_weights: Vec<f64>,
}

impl<'a> MixtureFitter<'a> {
    pub fn new(library: &'a CodonModelLibrary, settings: FitSettings) -> Self {
        let index_of: HashMap<Codon, usize> = library
            .candidates()
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
        let neighbors = library
            .candidates()
            .iter()
            .map(|c| c.neighbors().filter_map(|n| index_of.get(&n).copied()).collect())
            .collect();
        MixtureFitter {
            library,
            settings,
            bounds: library.bounds(),
            index_of,
            neighbors,
            penalty_weights: vec![1.0; library.candidates().len()],
        }
    }

    /// Make the codons a site is expected to carry cheaper to include: the
    /// wild-type codon most, then every codon of `amino_acids`. This only
    /// decides between mixtures that reproduce the trace equally well.
    pub fn with_expected(mut self, wild_type: Option<Codon>, amino_acids: &[char]) -> Self {
        let library = self.library;
        for (codon, multiplier) in library.candidates().iter().zip(&mut self.penalty_weights) {
            *multiplier = if Some(*codon) == wild_type {
                WILD_TYPE_PENALTY
            } else if amino_acids.contains(&codon.amino_acid()) {
                MOTIF_RESIDUE_PENALTY
            } else {
                1.0
            };
        }
        self
    }

    pub fn fit<R: Rng + ?Sized>(&self, window: &TraceWindow, rng: &mut R) -> FitResult {
        let started = Instant::now();
        let energy = window.energy().max(f64::EPSILON);
        let mut scratch = vec![[0.0; 4]; window.len()];
        let mut evaluations = 0;

        let mut best: Option<State> = None;
        let mut restart_weights = Vec::with_capacity(self.settings.restarts);
        let mut restart_residuals = Vec::with_capacity(self.settings.restarts);

        for restart in 0..self.settings.restarts {
            if restart > 0 && self.out_of_time(started) {
                debug!("Fit time budget exhausted after {restart} restarts");
                break;
            }
            let weights = if restart == 0 {
                self.informed_weights(window)
            } else {
                self.random_weights(rng)
            };
            let shape = if restart == 0 {
                PeakShape::nominal(self.library.samples_per_base())
            } else {
                self.random_shape(rng)
            };
            let state = self.new_state(window, weights, shape, &mut scratch);
            evaluations += 1;

            let mut state =
                self.anneal(window, state, energy, started, rng, &mut scratch, &mut evaluations);
            self.polish(window, &mut state, &mut scratch, &mut evaluations);
            self.consolidate(window, &mut state, energy, &mut scratch, &mut evaluations);
            normalize(&mut state.weights);

            trace!(
                "Restart {restart}: residual {:.5}, objective {:.5}",
                state.residual,
                state.objective
            );
            restart_weights.push(state.weights.clone());
            restart_residuals.push(state.residual);
            if best.as_ref().map_or(true, |b| state.objective < b.objective) {
                best = Some(state);
            }
        }

        // At least one restart always runs.
        let best = match best {
            Some(best) => best,
            None => {
                let weights = self.informed_weights(window);
                let shape = PeakShape::nominal(self.library.samples_per_base());
                self.new_state(window, weights, shape, &mut scratch)
            }
        };
        let relative_residual = best.residual / energy;
        let converged = relative_residual <= self.settings.max_relative_residual;
        debug!(
            "Fit finished: relative residual {:.4} ({}converged) after {} evaluations",
            relative_residual,
            if converged { "" } else { "not " },
            evaluations
        );

        FitResult {
            codons: self.library.candidates().to_vec(),
            weights: best.weights,
            shape: best.shape,
            residual: best.residual,
            relative_residual,
            converged,
            restart_weights,
            restart_residuals,
            evaluations,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn anneal<R: Rng + ?Sized>(
        &self,
        window: &TraceWindow,
        mut current: State,
        energy: f64,
        started: Instant,
        rng: &mut R,
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) -> State {
        let iterations = self.settings.iterations;
        let t0 = self.settings.initial_temperature * energy;
        let cooling = COOLING_RANGE.powf(1.0 / iterations as f64);
        let mut temperature = t0;
        let mut best = current.clone();

        for iteration in 0..iterations {
            if iteration % CLOCK_CHECK_INTERVAL == 0 && self.out_of_time(started) {
                debug!("Fit time budget exhausted at iteration {iteration}");
                break;
            }
            let progress = iteration as f64 / iterations as f64;
            let (previous_residual, previous_objective) = (current.residual, current.objective);

            let Some(mv) = self.propose(&mut current, progress, rng) else {
                temperature *= cooling;
                continue;
            };
            self.evaluate(window, &mut current, scratch);
            *evaluations += 1;

            let delta = current.objective - previous_objective;
            let accept = delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
            if accept {
                if current.objective < best.objective {
                    best = current.clone();
                }
            } else {
                self.undo(&mut current, mv);
                current.residual = previous_residual;
                current.objective = previous_objective;
            }
            temperature *= cooling;
        }
        best
    }

    /// Apply a random move in place; returns what is needed to undo it.
    fn propose<R: Rng + ?Sized>(
        &self,
        state: &mut State,
        progress: f64,
        rng: &mut R,
    ) -> Option<Move> {
        let roll = rng.gen::<f64>();
        if roll < TRANSFER_SHARE {
            self.propose_transfer(state, rng)
        } else if roll < TRANSFER_SHARE + CROSSOVER_SHARE {
            self.propose_crossover(state, rng)
        } else {
            Some(self.propose_shape(state, progress, rng))
        }
    }

    fn propose_transfer<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) -> Option<Move> {
        let support = support(&state.weights);
        if support.is_empty() || state.weights.len() < 2 {
            return None;
        }
        let from = support[rng.gen_range(0..support.len())];
        let to = if rng.gen_bool(0.5) && !self.neighbors[from].is_empty() {
            self.neighbors[from][rng.gen_range(0..self.neighbors[from].len())]
        } else {
            let j = rng.gen_range(0..state.weights.len() - 1);
            if j >= from {
                j + 1
            } else {
                j
            }
        };
        let amount = if rng.gen_bool(0.2) {
            state.weights[from]
        } else {
            state.weights[from] * rng.gen::<f64>()
        };
        self.transfer(state, from, to, amount);
        Some(Move::Transfer((from, to, amount)))
    }

    fn propose_crossover<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) -> Option<Move> {
        let support = support(&state.weights);
        if support.len() < 2 {
            return None;
        }
        let i = rng.gen_range(0..support.len());
        let mut j = rng.gen_range(0..support.len() - 1);
        if j >= i {
            j += 1;
        }
        let (a, b) = (support[i], support[j]);
        let (a_swapped, b_swapped) = self.recombinants(a, b, rng.gen_range(0..3))?;
        let limit = state.weights[a].min(state.weights[b]);
        let amount = if rng.gen_bool(0.5) {
            limit
        } else {
            limit * rng.gen::<f64>()
        };
        let transfers = [(a, a_swapped, amount), (b, b_swapped, amount)];
        for &(from, to, amount) in &transfers {
            self.transfer(state, from, to, amount);
        }
        Some(Move::Crossover(transfers))
    }

    fn propose_shape<R: Rng + ?Sized>(
        &self,
        state: &mut State,
        progress: f64,
        rng: &mut R,
    ) -> Move {
        let position = rng.gen_range(0..3);
        let previous = state.shape.positions[position];
        let step = (1.0 - progress).max(0.1);
        let s = self.library.samples_per_base() as f64;
        let mut params = previous;
        match rng.gen_range(0..3) {
            0 => params.offset += rng.gen_range(-1.0..=1.0) * 0.15 * s * step,
            1 => params.width += rng.gen_range(-1.0..=1.0) * 0.08 * s * step,
            _ => params.amplitude += rng.gen_range(-1.0..=1.0) * 0.1 * step,
        }
        state.shape.positions[position] = self.bounds.clamp(params);
        let previous_profile = std::mem::take(&mut state.profiles[position]);
        state.profiles[position] = self.library.peak_profiles(&state.shape)[position].clone();
        Move::Shape {
            position,
            previous,
            previous_profile,
        }
    }

    /// Candidates `a` and `b` with their bases at `position` exchanged. None
    /// when the swap is a no-op or leaves the candidate set.
    fn recombinants(&self, a: usize, b: usize, position: usize) -> Option<(usize, usize)> {
        let candidates = self.library.candidates();
        let (mut x, mut y) = (candidates[a].bases(), candidates[b].bases());
        if x[position] == y[position] {
            return None;
        }
        std::mem::swap(&mut x[position], &mut y[position]);
        // Codons differing only at `position` would just trade places.
        if Codon(x) == candidates[b] {
            return None;
        }
        Some((*self.index_of.get(&Codon(x))?, *self.index_of.get(&Codon(y))?))
    }

    fn undo(&self, state: &mut State, mv: Move) {
        match mv {
            Move::Transfer((from, to, amount)) => self.transfer(state, to, from, amount),
            Move::Crossover(transfers) => {
                for &(from, to, amount) in transfers.iter().rev() {
                    self.transfer(state, to, from, amount);
                }
            }
            Move::Shape {
                position,
                previous,
                previous_profile,
            } => {
                state.shape.positions[position] = previous;
                state.profiles[position] = previous_profile;
            }
        }
    }

    fn transfer(&self, state: &mut State, from: usize, to: usize, amount: f64) {
        state.weights[from] = (state.weights[from] - amount).max(0.0);
        state.weights[to] += amount;
        let (a, b) = (self.library.candidates()[from], self.library.candidates()[to]);
        for position in 0..3 {
            state.marginals[position][a.bases()[position].channel()] -= amount;
            state.marginals[position][b.bases()[position].channel()] += amount;
        }
    }

    /// Residual and objective after `transfers`; the state is left as it was.
    fn trial(
        &self,
        window: &TraceWindow,
        state: &mut State,
        transfers: &[Transfer],
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) -> (f64, f64) {
        let before = (state.residual, state.objective);
        for &(from, to, amount) in transfers {
            self.transfer(state, from, to, amount);
        }
        self.evaluate(window, state, scratch);
        *evaluations += 1;
        let after = (state.residual, state.objective);
        for &(from, to, amount) in transfers.iter().rev() {
            self.transfer(state, to, from, amount);
        }
        (state.residual, state.objective) = before;
        after
    }

    fn commit(&self, state: &mut State, transfers: &[Transfer], outcome: (f64, f64)) {
        for &(from, to, amount) in transfers {
            self.transfer(state, from, to, amount);
        }
        (state.residual, state.objective) = outcome;
    }

    /// Greedy zero-temperature passes of weight transfers and crossovers.
    fn polish(
        &self,
        window: &TraceWindow,
        state: &mut State,
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) {
        for _ in 0..POLISH_PASSES {
            let moved = self.polish_transfers(window, state, scratch, evaluations);
            let recombined = self.polish_crossovers(window, state, scratch, evaluations);
            if !moved && !recombined {
                break;
            }
        }
        // Undo/redo arithmetic can leave marginal drift; resync.
        state.marginals = self.library.marginals(&state.weights);
        self.evaluate(window, state, scratch);
    }

    /// Try moving all or half of each minor weight onto the heaviest codon or
    /// one of its own neighbors.
    fn polish_transfers(
        &self,
        window: &TraceWindow,
        state: &mut State,
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) -> bool {
        let mut improved = false;
        let mut order = support(&state.weights);
        order.reverse();
        for from in order {
            let heaviest = argmax(&state.weights);
            let mut targets = vec![heaviest];
            targets.extend(self.neighbors[from].iter().copied());

            let mut best_move: Option<(Transfer, (f64, f64))> = None;
            for &to in targets.iter().filter(|&&to| to != from) {
                for fraction in [1.0, 0.5] {
                    let amount = state.weights[from] * fraction;
                    if amount <= 0.0 {
                        continue;
                    }
                    let transfer = (from, to, amount);
                    let outcome = self.trial(window, state, &[transfer], scratch, evaluations);
                    if outcome.1 < best_move.map_or(state.objective, |(_, o)| o.1) {
                        best_move = Some((transfer, outcome));
                    }
                }
            }
            if let Some((transfer, outcome)) = best_move {
                self.commit(state, &[transfer], outcome);
                improved = true;
            }
        }
        improved
    }

    /// Try every full crossover between supported codons, heaviest pairs first.
    fn polish_crossovers(
        &self,
        window: &TraceWindow,
        state: &mut State,
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) -> bool {
        let mut improved = false;
        let order = support(&state.weights);
        for (k, &a) in order.iter().enumerate() {
            for &b in &order[k + 1..] {
                for position in 0..3 {
                    let amount = state.weights[a].min(state.weights[b]);
                    if amount <= 0.0 {
                        break;
                    }
                    let Some((a_swapped, b_swapped)) = self.recombinants(a, b, position) else {
                        continue;
                    };
                    let transfers = [(a, a_swapped, amount), (b, b_swapped, amount)];
                    let outcome = self.trial(window, state, &transfers, scratch, evaluations);
                    if outcome.1 < state.objective {
                        self.commit(state, &transfers, outcome);
                        improved = true;
                    }
                }
            }
        }
        improved
    }

    /// Fold each minor codon, smallest first, into the heavier codon that
    /// fits best, as long as the residual stays within `merge_tolerance` of
    /// window energy above where it started.
    fn consolidate(
        &self,
        window: &TraceWindow,
        state: &mut State,
        energy: f64,
        scratch: &mut [[f64; 4]],
        evaluations: &mut usize,
    ) {
        let ceiling = state.residual + self.settings.merge_tolerance * energy;
        let mut order = support(&state.weights);
        order.reverse();
        for (rank, &from) in order.iter().enumerate() {
            let amount = state.weights[from];
            if amount <= 0.0 {
                continue;
            }
            let mut best_merge: Option<(Transfer, (f64, f64))> = None;
            for &to in &order[rank + 1..] {
                if state.weights[to] <= 0.0 {
                    continue;
                }
                let transfer = (from, to, amount);
                let outcome = self.trial(window, state, &[transfer], scratch, evaluations);
                if outcome.0 <= ceiling && best_merge.map_or(true, |(_, o)| outcome.0 < o.0) {
                    best_merge = Some((transfer, outcome));
                }
            }
            if let Some((transfer, outcome)) = best_merge {
                let candidates = self.library.candidates();
                trace!(
                    "Folded {amount:.4} of {} into {}",
                    candidates[transfer.0],
                    candidates[transfer.1]
                );
                self.commit(state, &[transfer], outcome);
            }
        }
        state.marginals = self.library.marginals(&state.weights);
        self.evaluate(window, state, scratch);
    }

    fn new_state(
        &self,
        window: &TraceWindow,
        weights: Vec<f64>,
        shape: PeakShape,
        scratch: &mut [[f64; 4]],
    ) -> State {
        let mut state = State {
            marginals: self.library.marginals(&weights),
            profiles: self.library.peak_profiles(&shape),
            weights,
            shape,
            residual: 0.0,
            objective: 0.0,
        };
        self.evaluate(window, &mut state, scratch);
        state
    }

    /// Squared residual after subtracting the best flat, non-negative,
    /// capped baseline per channel, plus the weighted sparsity penalty.
    fn evaluate(&self, window: &TraceWindow, state: &mut State, scratch: &mut [[f64; 4]]) {
        self.library.render_mixture(&state.marginals, &state.profiles, scratch);
        let mut squared = 0.0;
        let mut excess = [0.0; 4];
        for (observed, model) in window.rows().iter().zip(scratch.iter()) {
            for channel in 0..4 {
                let diff = observed[channel] - model[channel];
                squared += diff * diff;
                excess[channel] += diff;
            }
        }
        let n = window.len().max(1) as f64;
        let residual = excess.iter().fold(squared, |acc, &total| {
            let baseline = (total / n).clamp(0.0, MAX_BASELINE);
            acc - baseline * (2.0 * total - n * baseline)
        });
        let penalty: f64 = state
            .weights
            .iter()
            .zip(&self.penalty_weights)
            .map(|(w, multiplier)| multiplier * w.max(0.0).sqrt())
            .sum();
        state.residual = residual.max(0.0);
        state.objective = state.residual + self.settings.sparsity_penalty * penalty;
    }

    /// Start from the product of per-position base fractions read off the window.
    fn informed_weights(&self, window: &TraceWindow) -> Vec<f64> {
        let fractions = window.base_fractions();
        let mut weights: Vec<f64> = self
            .library
            .candidates()
            .iter()
            .map(|codon| {
                codon
                    .bases()
                    .iter()
                    .enumerate()
                    .map(|(position, base)| fractions[position][base.channel()].max(1e-3))
                    .product::<f64>()
            })
            .collect();
        normalize(&mut weights);
        weights
    }

    /// Uniform draw from the simplex.
    fn random_weights<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let mut weights: Vec<f64> = (0..self.library.candidates().len())
            .map(|_| -(1.0 - rng.gen::<f64>()).ln())
            .collect();
        normalize(&mut weights);
        weights
    }

    fn random_shape<R: Rng + ?Sized>(&self, rng: &mut R) -> PeakShape {
        let mut shape = PeakShape::nominal(self.library.samples_per_base());
        let s = self.library.samples_per_base() as f64;
        for params in shape.positions.iter_mut() {
            params.offset += rng.gen_range(-0.1..=0.1) * s;
            params.width += rng.gen_range(-0.05..=0.05) * s;
            *params = self.bounds.clamp(*params);
        }
        shape
    }

    fn out_of_time(&self, started: Instant) -> bool {
        self.settings
            .time_budget
            .is_some_and(|budget| started.elapsed() >= budget)
    }
}

/// Indices with positive weight, heaviest first (ties by index).
fn support(weights: &[f64]) -> Vec<usize> {
    let mut support: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    support.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));
    support
}

fn normalize(weights: &mut [f64]) {
    for w in weights.iter_mut() {
        *w = w.max(0.0);
    }
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    } else if !weights.is_empty() {
        let uniform = 1.0 / weights.len() as f64;
        weights.fill(uniform);
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CandidateSet;
    use crate::sequence::Strand;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings() -> FitSettings {
        FitSettings::from(&AnalysisParams::default())
    }

    fn codon(s: &str) -> Codon {
        s.parse().unwrap()
    }

    fn off_nominal_shape(library: &CodonModelLibrary) -> PeakShape {
        let mut shape = PeakShape::nominal(library.samples_per_base());
        shape.positions[0].offset = 0.6;
        shape.positions[2].width = 2.2;
        shape
    }

    fn weights_for(library: &CodonModelLibrary, mix: &[(&str, f64)]) -> Vec<f64> {
        let mut weights = vec![0.0; library.candidates().len()];
        for &(c, w) in mix {
            let index = library.candidates().iter().position(|&x| x == codon(c)).unwrap();
            weights[index] = w;
        }
        weights
    }

    /// A window rendered straight from the model, plus a flat floor in every channel.
    fn floored_window(library: &CodonModelLibrary, mix: &[(&str, f64)], floor: f64) -> TraceWindow {
        let weights = weights_for(library, mix);
        let mut rows = library.mixture(&weights, &off_nominal_shape(library));
        for row in rows.iter_mut() {
            for v in row.iter_mut() {
                *v += floor;
            }
        }
        TraceWindow::new(library.samples_per_base(), rows, [0, 10, 20], Strand::Forward).unwrap()
    }

    /// A window rendered straight from the model, with a slightly off-nominal shape.
    fn model_window(library: &CodonModelLibrary, mix: &[(&str, f64)]) -> TraceWindow {
        floored_window(library, mix, 0.0)
    }

    fn amino_acid_share(result: &FitResult, aa: char) -> f64 {
        result
            .amino_acid_proportions()
            .iter()
            .find(|(a, _)| *a == aa)
            .map_or(0.0, |p| p.1)
    }

    fn weight_of(result: &FitResult, c: &str) -> f64 {
        result.codon_weights().find(|(x, _)| *x == codon(c)).map_or(0.0, |(_, w)| w)
    }

    #[test]
    fn test_pure_codon_recovered() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let window = model_window(&library, &[("AAA", 1.0)]);
        let fitter = MixtureFitter::new(&library, settings());
        let result = fitter.fit(&window, &mut StdRng::seed_from_u64(11));

        assert!(weight_of(&result, "AAA") > 0.95);
        assert!(result.converged);
        assert!(result.relative_residual < 0.01);
        let total: f64 = result.weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(result.weights.iter().all(|&w| w >= 0.0));
        assert_eq!(result.restart_weights.len(), 4);
    }

    #[test]
    fn test_two_codon_mixture_recovered() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let window = model_window(&library, &[("AAA", 0.5), ("ACA", 0.5)]);
        let fitter = MixtureFitter::new(&library, settings());
        let result = fitter.fit(&window, &mut StdRng::seed_from_u64(12));

        let k = amino_acid_share(&result, 'K');
        let t = amino_acid_share(&result, 'T');
        assert!((k - 0.5).abs() < 0.1, "K = {k}");
        assert!((t - 0.5).abs() < 0.1, "T = {t}");
    }

    #[test]
    fn test_restricted_candidates() {
        let library = CodonModelLibrary::new(10, &CandidateSet::for_amino_acids(&['K', 'T']));
        let window = model_window(&library, &[("AAG", 0.7), ("ACG", 0.3)]);
        let fitter = MixtureFitter::new(&library, settings());
        let result = fitter.fit(&window, &mut StdRng::seed_from_u64(13));
        assert_eq!(result.codons.len(), 6);
        assert!((weight_of(&result, "AAG") - 0.7).abs() < 0.1);
        assert!((weight_of(&result, "ACG") - 0.3).abs() < 0.1);
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let window = model_window(&library, &[("GAT", 0.6), ("GTT", 0.4)]);
        let fitter = MixtureFitter::new(&library, settings());
        let a = fitter.fit(&window, &mut StdRng::seed_from_u64(99));
        let b = fitter.fit(&window, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_unfittable_window_is_flagged() {
        // Every channel lit everywhere: no codon mixture reproduces it.
        let rows = vec![[1.0; 4]; 30];
        let window = TraceWindow::new(10, rows, [0, 10, 20], Strand::Forward).unwrap();
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let settings = FitSettings {
            iterations: 500,
            restarts: 1,
            ..settings()
        };
        let fitter = MixtureFitter::new(&library, settings);
        let result = fitter.fit(&window, &mut StdRng::seed_from_u64(1));
        assert!(!result.converged);
        let total: f64 = result.weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_amino_acid_distribution_order() {
        let codons = vec![codon("AAA"), codon("AAG"), codon("ACA"), codon("GGG")];
        let dist = amino_acid_distribution(&codons, &[0.2, 0.3, 0.4, 0.1]);
        assert_eq!(dist[0].0, 'K');
        assert!((dist[0].1 - 0.5).abs() < 1e-12);
        assert_eq!(dist[1], ('T', 0.4));
        assert_eq!(dist[2], ('G', 0.1));
    }

    #[test]
    fn test_noise_floor_does_not_leak_weight() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        for (i, c) in ["GTC", "CGT", "ACA", "GTT"].iter().enumerate() {
            let window = floored_window(&library, &[(c, 1.0)], 0.01);
            let fitter = MixtureFitter::new(&library, settings());
            let result = fitter.fit(&window, &mut StdRng::seed_from_u64(20 + i as u64));
            let aa = codon(c).amino_acid();
            let share = amino_acid_share(&result, aa);
            assert!(share >= 0.97, "{c}: {:?}", result.amino_acid_proportions());
            assert!(result.relative_residual < 0.005);
        }
    }

    #[test]
    fn test_recombinants() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let fitter = MixtureFitter::new(&library, settings());
        let index = |c: &str| codon(c).index();

        assert_eq!(
            fitter.recombinants(index("AAA"), index("CCC"), 1),
            Some((index("ACA"), index("CAC")))
        );
        // Same base at the position, or a single-position pair that would just swap.
        assert_eq!(fitter.recombinants(index("AAA"), index("ACC"), 0), None);
        assert_eq!(fitter.recombinants(index("AAA"), index("ACA"), 1), None);

        let restricted = CodonModelLibrary::new(10, &CandidateSet::for_amino_acids(&['K', 'T']));
        let fitter = MixtureFitter::new(&restricted, settings());
        let index = |c: &str| restricted.candidates().iter().position(|&x| x == codon(c)).unwrap();
        // AAA x ACG at the last position gives AAG and ACA, both candidates.
        assert!(fitter.recombinants(index("AAA"), index("ACG"), 2).is_some());
        // AAG x ACA at the middle position gives ACG and AAA; at the first, nothing changes.
        assert!(fitter.recombinants(index("AAG"), index("ACA"), 1).is_some());
        assert_eq!(fitter.recombinants(index("AAG"), index("ACA"), 0), None);
    }

    #[test]
    fn test_crossover_keeps_residual() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let window = model_window(&library, &[("AAA", 0.5), ("CCC", 0.5)]);
        let fitter = MixtureFitter::new(&library, settings());
        let mut scratch = vec![[0.0; 4]; window.len()];
        let weights = weights_for(&library, &[("ACA", 0.5), ("CAC", 0.5)]);
        let mut state =
            fitter.new_state(&window, weights, off_nominal_shape(&library), &mut scratch);
        let residual = state.residual;
        assert!(residual < 1e-12);

        let (a, b) = (codon("ACA").index(), codon("CAC").index());
        let (a_swapped, b_swapped) = fitter.recombinants(a, b, 1).unwrap();
        let transfers = [(a, a_swapped, 0.5), (b, b_swapped, 0.5)];
        let mut evaluations = 0;
        let outcome = fitter.trial(&window, &mut state, &transfers, &mut scratch, &mut evaluations);
        assert!((outcome.0 - residual).abs() < 1e-12);
        assert_eq!(state.residual, residual);

        fitter.commit(&mut state, &transfers, outcome);
        assert!((state.weights[codon("AAA").index()] - 0.5).abs() < 1e-12);
        assert!((state.weights[codon("CCC").index()] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_expected_codons_resolve_ambiguous_mixtures() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        for (i, partner) in ["ATG", "GCG", "CCC", "ACA"].iter().enumerate() {
            let window = model_window(&library, &[("AAA", 0.5), (partner, 0.5)]);
            let fitter = MixtureFitter::new(&library, settings())
                .with_expected(Some(codon("AAA")), &['K', 'T']);
            let result = fitter.fit(&window, &mut StdRng::seed_from_u64(30 + i as u64));
            let k = amino_acid_share(&result, 'K');
            let other = amino_acid_share(&result, codon(partner).amino_acid());
            let proportions = result.amino_acid_proportions();
            assert!((k - 0.5).abs() < 0.1, "AAA/{partner}: {proportions:?}");
            assert!((other - 0.5).abs() < 0.1, "AAA/{partner}: {proportions:?}");
        }
    }

    #[test]
    fn test_consolidation_folds_only_trace_minor_codons() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let fitter = MixtureFitter::new(&library, settings());
        let mut scratch = vec![[0.0; 4]; 30];
        let mut evaluations = 0;

        // A 1% ACA shoulder costs almost nothing to drop.
        let mix = [("AAA", 0.99), ("ACA", 0.01)];
        let window = model_window(&library, &mix);
        let weights = weights_for(&library, &mix);
        let mut state =
            fitter.new_state(&window, weights, off_nominal_shape(&library), &mut scratch);
        fitter.consolidate(&window, &mut state, window.energy(), &mut scratch, &mut evaluations);
        assert_eq!(state.weights[codon("ACA").index()], 0.0);
        assert!((state.weights[codon("AAA").index()] - 1.0).abs() < 1e-12);

        // A real 10% minor population stays.
        let mix = [("AAA", 0.9), ("ACA", 0.1)];
        let window = model_window(&library, &mix);
        let weights = weights_for(&library, &mix);
        let mut state =
            fitter.new_state(&window, weights, off_nominal_shape(&library), &mut scratch);
        fitter.consolidate(&window, &mut state, window.energy(), &mut scratch, &mut evaluations);
        assert!((state.weights[codon("ACA").index()] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_expected_codons_get_cheaper_penalty() {
        let library = CodonModelLibrary::new(10, &CandidateSet::All);
        let fitter = MixtureFitter::new(&library, settings())
            .with_expected(Some(codon("AAA")), &['K', 'T']);
        assert_eq!(fitter.penalty_weights[codon("AAA").index()], WILD_TYPE_PENALTY);
        assert_eq!(fitter.penalty_weights[codon("AAG").index()], MOTIF_RESIDUE_PENALTY);
        assert_eq!(fitter.penalty_weights[codon("ACT").index()], MOTIF_RESIDUE_PENALTY);
        assert_eq!(fitter.penalty_weights[codon("CCC").index()], 1.0);
    }
}
