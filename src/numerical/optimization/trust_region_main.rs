use crate::numerical::optimization::objective_model::{
    ObjectiveError, ObjectiveFunction, ObjectiveModel,
};
use crate::numerical::optimization::trust_region_config::{ConfigError, TrustRegionConfig};
use crate::numerical::optimization::trust_region_subproblem::{
    SolveFailure, StepOrigin, StepTermination, Subproblem, TrustRegionSubproblem,
};
use crate::numerical::optimization::utils::{is_finite_vector, scaled_steepest_descent};
use log::{debug, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use std::fmt;
use strum_macros::Display;
use tabled::{builder::Builder, settings::Style};
/*
Trust region iteration for min f(x):
    1) solve the subproblem  min m(s) = f + g^T s + 0.5 s^T B s,  ||s|| <= delta
    2) rho = (f(x) - f(x + s)) / (m(0) - m(s))
    3) rho <  low                   -> reject, delta *= shrink
       rho >  high and ||s|| = delta -> accept, delta = min(grow*delta, max_radius)
       otherwise                    -> accept, delta unchanged
    4) on acceptance re-evaluate the model at x + s
*/

/// Why the minimizer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TerminationReason {
    /// ||g||_inf <= gradient tolerance
    ConvergedByGradient,
    /// accepted step is negligible relative to ||x||
    ConvergedByStep,
    /// accepted step changed the value by less than the function tolerance
    ConvergedByValue,
    /// iteration cap reached
    MaxIterationsExceeded,
    /// trust region radius shrank below the minimum radius
    RadiusBelowMinimum,
}

impl TerminationReason {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            TerminationReason::ConvergedByGradient
                | TerminationReason::ConvergedByStep
                | TerminationReason::ConvergedByValue
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoopStatus {
    Initializing,
    Iterating,
    Converged,
    Failed,
}

/// Fatal errors of a run. Numerical trouble inside the subproblem is never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum TrustRegionError {
    Config(ConfigError),
    Evaluation(ObjectiveError),
}

impl fmt::Display for TrustRegionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrustRegionError::Config(e) => write!(f, "invalid configuration: {}", e),
            TrustRegionError::Evaluation(e) => write!(f, "objective evaluation failed: {}", e),
        }
    }
}

impl std::error::Error for TrustRegionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrustRegionError::Config(e) => Some(e),
            TrustRegionError::Evaluation(e) => Some(e),
        }
    }
}

impl From<ConfigError> for TrustRegionError {
    fn from(e: ConfigError) -> Self {
        TrustRegionError::Config(e)
    }
}

impl From<ObjectiveError> for TrustRegionError {
    fn from(e: ObjectiveError) -> Self {
        TrustRegionError::Evaluation(e)
    }
}

/// One row of the iteration history
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    /// radius the subproblem was solved with
    pub radius: f64,
    pub step_norm: f64,
    pub predicted_reduction: f64,
    pub actual_reduction: f64,
    pub ratio: f64,
    pub accepted: bool,
    pub hit_boundary: bool,
    pub step_termination: StepTermination,
    pub fallback: Option<SolveFailure>,
    /// objective value after the iteration
    pub value: f64,
    /// ||g||_inf after the iteration, the norm of the gradient test
    pub gradient_norm: f64,
}

/// Objective evaluation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationCounters {
    /// value-only evaluations at trial points
    pub value_evaluations: usize,
    /// full model evaluations (value, gradient, curvature)
    pub model_evaluations: usize,
}

/// Mutable state of one run. Owned by the loop, the radius is changed only
/// by the acceptance rule.
#[derive(Debug, Clone)]
pub struct TrustRegionState {
    pub radius: f64,
    pub model: ObjectiveModel,
    pub iteration: usize,
    /// length of the last accepted step
    pub last_step_norm: f64,
    pub last_value_change: Option<f64>,
    pub status: LoopStatus,
    pub termination: Option<TerminationReason>,
    pub counters: EvaluationCounters,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub fallback_steps: usize,
    pub history: Vec<IterationRecord>,
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct TrustRegionResult {
    pub point: DVector<f64>,
    pub value: f64,
    pub gradient: DVector<f64>,
    /// ||g||_inf, compared against the gradient tolerance
    pub gradient_norm: f64,
    pub iterations: usize,
    pub termination: TerminationReason,
    pub final_radius: f64,
    pub counters: EvaluationCounters,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub fallback_steps: usize,
    pub subproblem: &'static str,
    pub history: Vec<IterationRecord>,
}

impl TrustRegionResult {
    pub fn is_converged(&self) -> bool {
        self.termination.is_converged()
    }

    /// Pretty table of run statistics
    pub fn statistics_table(&self) -> String {
        let rows: Vec<Vec<String>> = vec![
            vec!["subproblem".to_string(), self.subproblem.to_string()],
            vec!["termination".to_string(), self.termination.to_string()],
            vec!["iterations".to_string(), self.iterations.to_string()],
            vec!["accepted steps".to_string(), self.accepted_steps.to_string()],
            vec!["rejected steps".to_string(), self.rejected_steps.to_string()],
            vec!["fallback steps".to_string(), self.fallback_steps.to_string()],
            vec![
                "value evaluations".to_string(),
                self.counters.value_evaluations.to_string(),
            ],
            vec![
                "model evaluations".to_string(),
                self.counters.model_evaluations.to_string(),
            ],
            vec!["final value".to_string(), format!("{:.6e}", self.value)],
            vec!["gradient inf-norm".to_string(), format!("{:.6e}", self.gradient_norm)],
            vec!["final radius".to_string(), format!("{:.6e}", self.final_radius)],
        ];
        let mut table = Builder::from(rows).build();
        table.with(Style::modern_rounded());
        table.to_string()
    }
}

/// Results of a multi-start run
#[derive(Debug)]
pub struct MultiStartResult {
    /// one entry per start point, in input order
    pub results: Vec<Result<TrustRegionResult, TrustRegionError>>,
    /// index of the converged result with the lowest value
    pub best: Option<usize>,
}

impl MultiStartResult {
    pub fn best_result(&self) -> Option<&TrustRegionResult> {
        self.best.and_then(|i| self.results[i].as_ref().ok())
    }
}

/// Trust region minimizer: configuration plus the selected subproblem solver.
#[derive(Debug, Clone)]
pub struct TrustRegionMinimizer {
    config: TrustRegionConfig,
    subproblem: Subproblem,
}

impl TrustRegionMinimizer {
    pub fn new(config: TrustRegionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let subproblem = Subproblem::from_kind(
            config.subproblem,
            config.max_cg_iterations,
            config.cg_relative_tolerance,
        );
        Ok(TrustRegionMinimizer { config, subproblem })
    }

    /// Minimizer with a custom subproblem solver (e.g. a tuned `DogLeg`)
    pub fn with_subproblem(
        config: TrustRegionConfig,
        subproblem: Subproblem,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(TrustRegionMinimizer { config, subproblem })
    }

    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }

    pub fn subproblem(&self) -> &Subproblem {
        &self.subproblem
    }

    /// Evaluate the start point and set up the loop state. A start point that
    /// already satisfies the gradient test gives a converged state.
    pub fn initialize<F: ObjectiveFunction + ?Sized>(
        &self,
        function: &F,
        start: DVector<f64>,
    ) -> Result<TrustRegionState, TrustRegionError> {
        let model = ObjectiveModel::evaluate_at(function, &start)?;
        let mut state = TrustRegionState {
            radius: self.config.initial_radius,
            model,
            iteration: 0,
            last_step_norm: 0.0,
            last_value_change: None,
            status: LoopStatus::Initializing,
            termination: None,
            counters: EvaluationCounters {
                value_evaluations: 0,
                model_evaluations: 1,
            },
            accepted_steps: 0,
            rejected_steps: 0,
            fallback_steps: 0,
            history: Vec::new(),
        };
        if state.model.gradient_max_norm() <= self.config.gradient_tolerance {
            self.finish(&mut state, TerminationReason::ConvergedByGradient);
        } else {
            state.status = LoopStatus::Iterating;
        }
        Ok(state)
    }

    /// One iteration: solve the subproblem, test the step, update the radius
    /// and check termination. Returns the termination reason once the run is over.
    pub fn step<F: ObjectiveFunction + ?Sized>(
        &self,
        function: &F,
        state: &mut TrustRegionState,
    ) -> Result<Option<TerminationReason>, TrustRegionError> {
        if state.status != LoopStatus::Iterating {
            return Ok(state.termination);
        }
        let config = &self.config;
        state.iteration += 1;
        let radius = state.radius;

        let mut solution = self.subproblem.solve(&state.model, radius);
        if !is_finite_vector(&solution.step) {
            warn!(
                "iteration {}: {} returned a non-finite step, using scaled gradient",
                state.iteration,
                self.subproblem.name()
            );
            solution.step = scaled_steepest_descent(state.model.gradient(), radius);
            solution.hit_boundary = true;
            solution.origin = StepOrigin::Fallback(SolveFailure::NonFiniteStep);
        }
        let fallback = match solution.origin {
            StepOrigin::Fallback(failure) => {
                state.fallback_steps += 1;
                Some(failure)
            }
            StepOrigin::Solved => None,
        };

        let step_norm = solution.norm();
        let current_value = state.model.value();
        let predicted = state.model.predicted_reduction(&solution.step);
        let trial_point = state.model.point() + &solution.step;
        let trial_value = function.value(&trial_point)?;
        state.counters.value_evaluations += 1;
        if !trial_value.is_finite() {
            return Err(ObjectiveError::NonFiniteValue { value: trial_value }.into());
        }
        let actual = current_value - trial_value;
        // NaN predicted reduction also rejects the step
        let ratio = if !(predicted > f64::EPSILON * current_value.abs()) {
            f64::NEG_INFINITY
        } else {
            actual / predicted
        };

        let accepted = ratio >= config.low_ratio;
        if !accepted {
            state.radius = radius * config.shrink_factor;
            state.rejected_steps += 1;
            debug!(
                "iteration {}: step rejected, rho = {:.4e}, radius {:.4e} -> {:.4e}",
                state.iteration, ratio, radius, state.radius
            );
        } else {
            if ratio > config.high_ratio && solution.hit_boundary {
                state.radius = (radius * config.grow_factor).min(config.max_radius);
                debug!(
                    "iteration {}: very successful step, radius {:.4e} -> {:.4e}",
                    state.iteration, radius, state.radius
                );
            }
            state.model = ObjectiveModel::evaluate_at(function, &trial_point)?;
            state.counters.model_evaluations += 1;
            state.accepted_steps += 1;
            state.last_step_norm = step_norm;
            state.last_value_change = Some(current_value - state.model.value());
        }

        state.history.push(IterationRecord {
            iteration: state.iteration,
            radius,
            step_norm,
            predicted_reduction: predicted,
            actual_reduction: actual,
            ratio,
            accepted,
            hit_boundary: solution.hit_boundary,
            step_termination: solution.termination,
            fallback,
            value: state.model.value(),
            gradient_norm: state.model.gradient_max_norm(),
        });

        if let Some(reason) = self.check_termination(state, accepted) {
            self.finish(state, reason);
        }
        Ok(state.termination)
    }

    fn check_termination(
        &self,
        state: &TrustRegionState,
        accepted: bool,
    ) -> Option<TerminationReason> {
        let config = &self.config;
        if accepted {
            if state.model.gradient_max_norm() <= config.gradient_tolerance {
                return Some(TerminationReason::ConvergedByGradient);
            }
            let x_norm = state.model.point().norm();
            if state.last_step_norm <= config.step_tolerance * (config.step_tolerance + x_norm) {
                return Some(TerminationReason::ConvergedByStep);
            }
            if let Some(change) = state.last_value_change {
                if change.abs() <= config.function_tolerance {
                    return Some(TerminationReason::ConvergedByValue);
                }
            }
        }
        if state.radius < config.min_radius {
            return Some(TerminationReason::RadiusBelowMinimum);
        }
        if state.iteration >= config.max_iterations {
            return Some(TerminationReason::MaxIterationsExceeded);
        }
        None
    }

    fn finish(&self, state: &mut TrustRegionState, reason: TerminationReason) {
        state.termination = Some(reason);
        if reason.is_converged() {
            state.status = LoopStatus::Converged;
            info!(
                "{} after {} iterations, f = {:.6e}",
                reason, state.iteration, state.model.value()
            );
        } else {
            state.status = LoopStatus::Failed;
            warn!(
                "no convergence: {} after {} iterations, radius = {:.4e}, ||g||_inf = {:.4e}",
                reason,
                state.iteration,
                state.radius,
                state.model.gradient_max_norm()
            );
        }
    }

    fn into_result(&self, state: TrustRegionState) -> TrustRegionResult {
        // the state is always finished when this is called
        let termination = state
            .termination
            .unwrap_or(TerminationReason::MaxIterationsExceeded);
        TrustRegionResult {
            point: state.model.point().clone(),
            value: state.model.value(),
            gradient: state.model.gradient().clone(),
            gradient_norm: state.model.gradient_max_norm(),
            iterations: state.iteration,
            termination,
            final_radius: state.radius,
            counters: state.counters,
            accepted_steps: state.accepted_steps,
            rejected_steps: state.rejected_steps,
            fallback_steps: state.fallback_steps,
            subproblem: self.subproblem.name(),
            history: state.history,
        }
    }

    /// Run the trust region iteration from `start` until a termination test fires.
    pub fn minimize<F: ObjectiveFunction + ?Sized>(
        &self,
        function: &F,
        start: DVector<f64>,
    ) -> Result<TrustRegionResult, TrustRegionError> {
        info!(
            "trust region minimization started: n = {}, subproblem = {}, radius = {:.4e}",
            start.len(),
            self.subproblem.name(),
            self.config.initial_radius
        );
        let mut state = self.initialize(function, start)?;
        while state.status == LoopStatus::Iterating {
            self.step(function, &mut state)?;
        }
        let result = self.into_result(state);
        info!("\n \n TRUST REGION STATISTICS \n \n {}", result.statistics_table());
        Ok(result)
    }

    /// Independent runs from several start points on the rayon thread pool.
    pub fn minimize_multistart<F: ObjectiveFunction + Sync + ?Sized>(
        &self,
        function: &F,
        starts: &[DVector<f64>],
    ) -> MultiStartResult {
        let results: Vec<Result<TrustRegionResult, TrustRegionError>> = starts
            .par_iter()
            .map(|start| self.minimize(function, start.clone()))
            .collect();
        let best = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                Ok(res) if res.is_converged() => Some((i, res.value)),
                _ => None,
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        MultiStartResult { results, best }
    }
}
