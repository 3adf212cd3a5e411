//! Investment option with operational flexibility after investment.
//!
//! Once online, a project may be suspended (paying a one-off cost and a
//! per-step maintenance cost), resumed, or abandoned. Abandonment is
//! absorbing. Valuation runs in two stages:
//!
//! 1. [`solve_policy`]: a backward pass that, at every date, treats each path
//!    as hypothetically being in each post-investment state, regresses the
//!    discounted realised value of every reachable successor state on the
//!    basis, and records the best transition in a [`PolicyTable`]. The
//!    resulting value of entering the operating state then drives the shared
//!    investment-timing pass.
//! 2. [`replay_policy`]: a forward pass that applies the table from the
//!    valuation date to produce realised states and undiscounted cash flows.
//!
//! With no flexibility terms the backward pass reduces exactly to the plain
//! investment engine.
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::investment::RealOptionInput;
use super::{
    operating_value_without_flexibility, resolve_investment, summary_warnings, validate_project,
    InvestmentSummary,
};
use crate::error::LsmError;
use crate::regression::{intercept_only, CrossSection, DegenerateTally, RegressionFit};
use crate::stats::{mean_and_stderr, step_discount};
use crate::types::{with_metadata, CapexSchedule, ComputationOutput, LsmParams, PathEnsemble, PathMatrix};
use crate::LsmResult;

// ---------------------------------------------------------------------------
// States and transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    Uninvested,
    Operating,
    Suspended,
    Abandoned,
}

impl PathState {
    pub const ALL: [PathState; 4] = [
        PathState::Uninvested,
        PathState::Operating,
        PathState::Suspended,
        PathState::Abandoned,
    ];

    /// States reachable in one step, staying put first.
    pub fn successors(self) -> &'static [PathState] {
        use PathState::*;
        match self {
            Uninvested => &[Uninvested, Operating],
            Operating => &[Operating, Suspended, Abandoned],
            Suspended => &[Suspended, Operating, Abandoned],
            Abandoned => &[Abandoned],
        }
    }

    pub fn is_absorbing(self) -> bool {
        matches!(self, PathState::Abandoned)
    }

    /// Row of the policy table holding this state's decisions.
    fn decision_row(self) -> Option<usize> {
        match self {
            PathState::Uninvested => Some(0),
            PathState::Operating => Some(1),
            PathState::Suspended => Some(2),
            PathState::Abandoned => None,
        }
    }
}

/// Costs of switching between post-investment states. A `None` cost makes
/// the corresponding transition unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationalFlexibility {
    /// One-off cost of moving from operating to suspended.
    #[serde(default)]
    pub suspend_capex: Option<f64>,
    /// Cost of every step spent suspended, including the step of suspension.
    #[serde(default)]
    pub suspend_opex: f64,
    /// One-off cost of moving from suspended back to operating.
    #[serde(default)]
    pub resume_capex: Option<f64>,
    /// One-off cost of abandoning; negative for a salvage value.
    #[serde(default)]
    pub abandon_capex: Option<f64>,
}

impl OperationalFlexibility {
    /// No switching available: the project runs to the horizon once built.
    pub fn rigid() -> Self {
        Self::default()
    }

    pub fn is_rigid(&self) -> bool {
        self.suspend_capex.is_none() && self.abandon_capex.is_none()
    }

    /// Immediate cash flow of moving `from -> to` at a date whose operating
    /// net cash flow is `ncf`. `None` if the transition is unavailable.
    /// Investment itself is priced by the timing pass, so transitions out of
    /// `Uninvested` return `None`.
    pub fn transition_cash_flow(
        &self,
        from: PathState,
        to: PathState,
        ncf: f64,
    ) -> Option<f64> {
        use PathState::*;
        match (from, to) {
            (Operating, Operating) => Some(ncf),
            (Operating, Suspended) => self.suspend_capex.map(|c| -c - self.suspend_opex),
            (Suspended, Suspended) => self.suspend_capex.map(|_| -self.suspend_opex),
            (Suspended, Operating) => self.resume_capex.map(|c| -c + ncf),
            (Operating, Abandoned) | (Suspended, Abandoned) => self.abandon_capex.map(|c| -c),
            (Abandoned, Abandoned) => Some(0.0),
            _ => None,
        }
    }

    fn validate(&self) -> LsmResult<()> {
        let costs = [
            ("suspend_capex", self.suspend_capex),
            ("suspend_opex", Some(self.suspend_opex)),
            ("resume_capex", self.resume_capex),
        ];
        for (field, cost) in costs {
            if let Some(c) = cost {
                if !c.is_finite() || c < 0.0 {
                    return Err(LsmError::NumericalInstability(format!(
                        "{field} must be finite and non-negative, got {c}"
                    )));
                }
            }
        }
        if let Some(c) = self.abandon_capex {
            if !c.is_finite() {
                return Err(LsmError::NumericalInstability(format!(
                    "abandon_capex must be finite, got {c}"
                )));
            }
        }
        Ok(())
    }
}

/// Everything the two stages need to know about the project.
#[derive(Debug, Clone, Copy)]
pub struct FlexibleProject<'a> {
    pub net_cash_flows: &'a PathMatrix,
    pub capex: &'a CapexSchedule,
    pub construction_lag: usize,
    pub flexibility: &'a OperationalFlexibility,
}

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// Next state chosen for every (time, current state, path).
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    steps: usize,
    paths: usize,
    /// Layout `(t * 3 + row) * paths + path`, rows Uninvested/Operating/Suspended.
    next: Vec<PathState>,
}

impl PolicyTable {
    /// Table in which every state stays put.
    pub fn new(steps: usize, paths: usize) -> Self {
        let mut next = Vec::with_capacity(steps * 3 * paths);
        for _ in 0..steps {
            for state in &PathState::ALL[..3] {
                next.extend(std::iter::repeat(*state).take(paths));
            }
        }
        Self { steps, paths, next }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn paths(&self) -> usize {
        self.paths
    }

    #[inline]
    pub fn next_state(&self, t: usize, state: PathState, path: usize) -> PathState {
        match state.decision_row() {
            Some(row) => self.next[(t * 3 + row) * self.paths + path],
            None => state,
        }
    }

    /// Records a decision; rejects transitions the state machine forbids.
    pub fn set_next_state(
        &mut self,
        t: usize,
        state: PathState,
        path: usize,
        next: PathState,
    ) -> LsmResult<()> {
        if t >= self.steps || path >= self.paths {
            return Err(LsmError::config(
                "policy",
                format!("cell ({t}, {path}) outside a {}x{} table", self.steps, self.paths),
            ));
        }
        let row = match state.decision_row() {
            Some(row) if state.successors().contains(&next) => row,
            _ => {
                return Err(LsmError::config(
                    "policy",
                    format!("{state:?} cannot move to {next:?}"),
                ))
            }
        };
        self.next[(t * 3 + row) * self.paths + path] = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backward pass
// ---------------------------------------------------------------------------

/// Output of the backward stage.
#[derive(Debug, Clone)]
pub struct PolicySolution {
    pub policy: PolicyTable,
    pub summary: InvestmentSummary,
    /// Realised value at `t` of being in the operating state at `t`.
    pub operating_value: PathMatrix,
}

struct OperatingPass {
    operating_value: PathMatrix,
    degenerate: DegenerateTally,
}

fn best_transition(
    flex: &OperationalFlexibility,
    from: PathState,
    ncf: f64,
    estimate: impl Fn(PathState) -> f64,
) -> Option<(PathState, f64)> {
    let mut best: Option<(PathState, f64, f64)> = None;
    for &to in from.successors() {
        let Some(cf) = flex.transition_cash_flow(from, to, ncf) else {
            continue;
        };
        let score = cf + estimate(to);
        if best.map_or(true, |(_, s, _)| score > s) {
            best = Some((to, score, cf));
        }
    }
    best.map(|(to, _, cf)| (to, cf))
}

fn operating_pass(
    ensemble: &PathEnsemble,
    project: &FlexibleProject<'_>,
    params: &LsmParams,
    policy: &mut PolicyTable,
) -> LsmResult<OperatingPass> {
    let steps = ensemble.steps();
    let n = ensemble.paths();
    let flex = project.flexibility;
    let can_suspend = flex.suspend_capex.is_some();
    let disc = step_discount(params.risk_free_rate, params.dt);
    let all_paths = vec![true; n];

    let mut operating_value = PathMatrix::zeros(steps, n);
    let mut w_operating = vec![0.0_f64; n];
    let mut w_suspended = vec![0.0_f64; n];
    let mut cont_operating = vec![0.0_f64; n];
    let mut cont_suspended = vec![0.0_f64; n];
    let mut degenerate = DegenerateTally::default();

    for t in (0..steps).rev() {
        for p in 0..n {
            cont_operating[p] = disc * w_operating[p];
            cont_suspended[p] = disc * w_suspended[p];
        }

        // Regression estimates of the continuation in each state.
        let estimates: Option<(RegressionFit, Option<RegressionFit>)> =
            if flex.is_rigid() || t + 1 == steps {
                None
            } else if t == 0 {
                Some((
                    intercept_only(&cont_operating, &all_paths),
                    can_suspend.then(|| intercept_only(&cont_suspended, &all_paths)),
                ))
            } else {
                let basis = params.basis.build_at(ensemble, t)?;
                let section = CrossSection::fit(&basis, &all_paths);
                Some((
                    section.regress(&cont_operating),
                    can_suspend.then(|| section.regress(&cont_suspended)),
                ))
            };
        if let Some((fit_o, fit_s)) = &estimates {
            degenerate.record(fit_o);
            if let Some(fit) = fit_s {
                degenerate.record(fit);
            }
        }

        for p in 0..n {
            let estimate = |state: PathState| -> f64 {
                let Some((fit_o, fit_s)) = &estimates else {
                    return 0.0;
                };
                match state {
                    PathState::Operating => fit_o.continuation(p),
                    PathState::Suspended => {
                        fit_s.as_ref().map_or(0.0, |f| f.continuation(p))
                    }
                    _ => 0.0,
                }
            };
            let realised = |state: PathState| -> f64 {
                match state {
                    PathState::Operating => cont_operating[p],
                    PathState::Suspended => cont_suspended[p],
                    _ => 0.0,
                }
            };
            let ncf = project.net_cash_flows.get(t, p);

            if let Some((to, cf)) = best_transition(flex, PathState::Operating, ncf, estimate) {
                policy.set_next_state(t, PathState::Operating, p, to)?;
                w_operating[p] = cf + realised(to);
                operating_value.set(t, p, w_operating[p]);
            }
            if can_suspend {
                if let Some((to, cf)) =
                    best_transition(flex, PathState::Suspended, ncf, estimate)
                {
                    policy.set_next_state(t, PathState::Suspended, p, to)?;
                    w_suspended[p] = cf + realised(to);
                }
            }
        }
    }

    Ok(OperatingPass {
        operating_value,
        degenerate,
    })
}

fn validate_flexible(
    ensemble: &PathEnsemble,
    project: &FlexibleProject<'_>,
    params: &LsmParams,
) -> LsmResult<()> {
    validate_project(
        ensemble,
        project.net_cash_flows,
        project.capex,
        project.construction_lag,
        params,
    )?;
    project.flexibility.validate()
}

/// Backward stage: estimates the switching and investment policy.
pub fn solve_policy(
    ensemble: &PathEnsemble,
    project: &FlexibleProject<'_>,
    params: &LsmParams,
) -> LsmResult<PolicySolution> {
    validate_flexible(ensemble, project, params)?;
    let steps = ensemble.steps();
    let n = ensemble.paths();

    let mut policy = PolicyTable::new(steps, n);
    let pass = operating_pass(ensemble, project, params, &mut policy)?;
    let mut investment = resolve_investment(
        ensemble,
        params,
        project.capex,
        project.construction_lag,
        &pass.operating_value,
    )?;
    investment.degenerate.merge(pass.degenerate);
    for t in 0..steps {
        for p in 0..n {
            if investment.invest_rule[t * n + p] {
                policy.set_next_state(t, PathState::Uninvested, p, PathState::Operating)?;
            }
        }
    }

    let summary = investment.summary(steps, params.dt);
    Ok(PolicySolution {
        policy,
        summary,
        operating_value: pass.operating_value,
    })
}

// ---------------------------------------------------------------------------
// Forward replay
// ---------------------------------------------------------------------------

/// Share of paths in each state per time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProportions {
    pub uninvested: Vec<f64>,
    pub operating: Vec<f64>,
    pub suspended: Vec<f64>,
    pub abandoned: Vec<f64>,
}

/// Realised path of every simulation under a policy table.
#[derive(Debug, Clone)]
pub struct Replay {
    steps: usize,
    paths: usize,
    states: Vec<PathState>,
    /// Undiscounted cash flow per (time, path).
    pub cash_flows: PathMatrix,
}

impl Replay {
    /// State occupied during step `t`, after that step's decision. A path is
    /// reported `Operating` from its investment date, construction included.
    #[inline]
    pub fn state(&self, t: usize, path: usize) -> PathState {
        self.states[t * self.paths + path]
    }

    pub fn state_rows(&self) -> Vec<Vec<PathState>> {
        self.states.chunks(self.paths.max(1)).map(<[_]>::to_vec).collect()
    }

    pub fn state_proportions(&self) -> StateProportions {
        let n = self.paths.max(1) as f64;
        let mut out = StateProportions {
            uninvested: vec![0.0; self.steps],
            operating: vec![0.0; self.steps],
            suspended: vec![0.0; self.steps],
            abandoned: vec![0.0; self.steps],
        };
        for t in 0..self.steps {
            for p in 0..self.paths {
                let bucket = match self.state(t, p) {
                    PathState::Uninvested => &mut out.uninvested,
                    PathState::Operating => &mut out.operating,
                    PathState::Suspended => &mut out.suspended,
                    PathState::Abandoned => &mut out.abandoned,
                };
                bucket[t] += 1.0;
            }
        }
        for series in [
            &mut out.uninvested,
            &mut out.operating,
            &mut out.suspended,
            &mut out.abandoned,
        ] {
            series.iter_mut().for_each(|v| *v /= n);
        }
        out
    }

    /// Mean and standard error of the discounted replayed cash flows.
    pub fn present_value(&self, params: &LsmParams) -> (f64, f64) {
        let disc = params.discount_powers(self.steps);
        let values: Vec<f64> = (0..self.paths)
            .map(|p| {
                (0..self.steps)
                    .map(|t| self.cash_flows.get(t, p) * disc[t])
                    .sum()
            })
            .collect();
        mean_and_stderr(&values)
    }
}

/// Forward stage: applies `policy` from the valuation date.
pub fn replay_policy(policy: &PolicyTable, project: &FlexibleProject<'_>) -> LsmResult<Replay> {
    let steps = policy.steps();
    let n = policy.paths();
    project.net_cash_flows.ensure_shape("net_cash_flows", steps, n)?;
    project.capex.validate(steps)?;

    let mut states = vec![PathState::Uninvested; steps * n];
    let mut cash_flows = PathMatrix::zeros(steps, n);
    for p in 0..n {
        let mut state = PathState::Uninvested;
        let mut online_from: Option<usize> = None;
        for t in 0..steps {
            let mut cf = 0.0;
            if state == PathState::Uninvested
                && policy.next_state(t, state, p) == PathState::Operating
            {
                cf -= project.capex.at(t);
                state = PathState::Operating;
                online_from = Some(t + project.construction_lag);
            }
            if online_from.is_some_and(|start| t >= start) {
                let next = policy.next_state(t, state, p);
                let ncf = project.net_cash_flows.get(t, p);
                cf += project
                    .flexibility
                    .transition_cash_flow(state, next, ncf)
                    .ok_or_else(|| {
                        LsmError::config(
                            "policy",
                            format!("{state:?} -> {next:?} is unavailable at index {t}, path {p}"),
                        )
                    })?;
                state = next;
            }
            states[t * n + p] = state;
            cash_flows.set(t, p, cf);
        }
    }

    Ok(Replay {
        steps,
        paths: n,
        states,
        cash_flows,
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexibleRealOptionInput {
    #[serde(flatten)]
    pub project: RealOptionInput,
    #[serde(default)]
    pub flexibility: OperationalFlexibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexibilityTraces {
    /// `states[t][p]` as reported by the forward replay.
    pub states: Vec<Vec<PathState>>,
    pub cash_flows: PathMatrix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexibleRealOptionOutput {
    #[serde(flatten)]
    pub summary: InvestmentSummary,
    /// Real option value of the same project without operational flexibility.
    pub rigid_rov: f64,
    /// `rov - rigid_rov`. Both are estimates, so small negative values are
    /// sampling noise.
    pub flexibility_value: f64,
    pub state_proportions: StateProportions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<FlexibilityTraces>,
}

/// Values the project with operational flexibility without the envelope.
pub fn run_flexible_real_option(
    ensemble: &PathEnsemble,
    project: &FlexibleProject<'_>,
    params: &LsmParams,
    record_paths: bool,
) -> LsmResult<FlexibleRealOptionOutput> {
    let solution = solve_policy(ensemble, project, params)?;
    let replay = replay_policy(&solution.policy, project)?;

    let rigid_rov = if project.flexibility.is_rigid() {
        solution.summary.rov
    } else {
        let operating = operating_value_without_flexibility(project.net_cash_flows, params);
        resolve_investment(
            ensemble,
            params,
            project.capex,
            project.construction_lag,
            &operating,
        )?
        .rov
    };

    let traces = record_paths.then(|| FlexibilityTraces {
        states: replay.state_rows(),
        cash_flows: replay.cash_flows.clone(),
    });

    Ok(FlexibleRealOptionOutput {
        flexibility_value: solution.summary.rov - rigid_rov,
        rigid_rov,
        state_proportions: replay.state_proportions(),
        summary: solution.summary,
        traces,
    })
}

/// Real option value with suspension, resumption and abandonment.
pub fn value_flexible_real_option(
    input: &FlexibleRealOptionInput,
) -> LsmResult<ComputationOutput<FlexibleRealOptionOutput>> {
    let start = Instant::now();
    let base = &input.project;
    let params = LsmParams::new(base.risk_free_rate, base.dt, base.basis);
    let project = FlexibleProject {
        net_cash_flows: &base.net_cash_flows,
        capex: &base.capex,
        construction_lag: base.construction_lag,
        flexibility: &input.flexibility,
    };
    let output = run_flexible_real_option(&base.state_variables, &project, &params, base.record_paths)?;

    let coefficients = base.basis.columns(base.state_variables.factors()) + 1;
    let mut warnings = summary_warnings(&output.summary, coefficients);
    if input.flexibility.resume_capex.is_some() && input.flexibility.suspend_capex.is_none() {
        warnings.push("resume_capex has no effect without suspend_capex".into());
    }
    if input.flexibility.is_rigid() {
        warnings.push("No switching terms supplied; result equals the plain investment option".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Least-Squares Monte Carlo real option with operational flexibility (suspend, resume, abandon)",
        &serde_json::json!({
            "risk_free_rate": base.risk_free_rate,
            "dt": base.dt,
            "steps": base.state_variables.steps(),
            "paths": base.state_variables.paths(),
            "construction_lag": base.construction_lag,
            "basis": base.basis,
            "flexibility": input.flexibility,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisConfig;
    use crate::real_options::investment::run_real_option;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::Normal;
    use PathState::*;

    const DT: f64 = 0.25;

    fn prices(steps: usize, paths: usize) -> PathMatrix {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut m = PathMatrix::zeros(steps, paths);
        for p in 0..paths {
            let mut s = 40.0;
            m.set(0, p, s);
            for t in 1..steps {
                let z: f64 = rng.sample(normal);
                s *= ((0.05 - 0.5 * 0.16) * DT + 0.4 * DT.sqrt() * z).exp();
                m.set(t, p, s);
            }
        }
        m
    }

    fn setup(steps: usize, paths: usize) -> (PathEnsemble, PathMatrix, LsmParams) {
        let s = prices(steps, paths);
        let ncf = PathMatrix::from_fn(steps, paths, |t, p| (s.get(t, p) - 40.0) * DT);
        (
            PathEnsemble::from_factor_matrices(&[s]).unwrap(),
            ncf,
            LsmParams::new(0.05, DT, BasisConfig::default()),
        )
    }

    fn full_flexibility() -> OperationalFlexibility {
        OperationalFlexibility {
            suspend_capex: Some(1.0),
            suspend_opex: 0.2,
            resume_capex: Some(1.0),
            abandon_capex: Some(2.0),
        }
    }

    #[test]
    fn test_successors() {
        assert_eq!(Abandoned.successors(), &[Abandoned]);
        assert!(Abandoned.is_absorbing());
        assert!(!Operating.successors().contains(&Uninvested));
        assert_eq!(Uninvested.successors()[0], Uninvested);
    }

    #[test]
    fn test_transition_cash_flows() {
        let f = full_flexibility();
        assert_eq!(f.transition_cash_flow(Operating, Operating, 3.0), Some(3.0));
        assert_eq!(f.transition_cash_flow(Operating, Suspended, 3.0), Some(-1.2));
        assert_eq!(f.transition_cash_flow(Suspended, Suspended, 3.0), Some(-0.2));
        assert_eq!(f.transition_cash_flow(Suspended, Operating, 3.0), Some(2.0));
        assert_eq!(f.transition_cash_flow(Suspended, Abandoned, 3.0), Some(-2.0));
        assert_eq!(f.transition_cash_flow(Abandoned, Abandoned, 3.0), Some(0.0));
        assert_eq!(f.transition_cash_flow(Abandoned, Operating, 3.0), None);

        let rigid = OperationalFlexibility::rigid();
        assert!(rigid.is_rigid());
        assert_eq!(rigid.transition_cash_flow(Operating, Abandoned, 3.0), None);
        assert_eq!(rigid.transition_cash_flow(Operating, Suspended, 3.0), None);
    }

    #[test]
    fn test_policy_table_rejects_forbidden_moves() {
        let mut table = PolicyTable::new(3, 2);
        assert_eq!(table.next_state(1, Suspended, 1), Suspended);
        assert!(table.set_next_state(0, Abandoned, 0, Operating).is_err());
        assert!(table.set_next_state(0, Uninvested, 0, Suspended).is_err());
        assert!(table.set_next_state(3, Operating, 0, Operating).is_err());
        table.set_next_state(2, Operating, 1, Abandoned).unwrap();
        assert_eq!(table.next_state(2, Operating, 1), Abandoned);
        assert_eq!(table.next_state(2, Operating, 0), Operating);
    }

    #[test]
    fn test_replay_hand_built_policy() {
        // invest at 0, online at 1, suspend at 2, abandon at 3
        let ncf = PathMatrix::from_rows(vec![vec![5.0], vec![4.0], vec![-3.0], vec![-6.0], vec![1.0]])
            .unwrap();
        let capex = CapexSchedule::Constant(10.0);
        let flex = full_flexibility();
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 1,
            flexibility: &flex,
        };
        let mut table = PolicyTable::new(5, 1);
        table.set_next_state(0, Uninvested, 0, Operating).unwrap();
        table.set_next_state(2, Operating, 0, Suspended).unwrap();
        table.set_next_state(3, Suspended, 0, Abandoned).unwrap();

        let replay = replay_policy(&table, &project).unwrap();
        let states: Vec<_> = (0..5).map(|t| replay.state(t, 0)).collect();
        assert_eq!(states, vec![Operating, Operating, Suspended, Abandoned, Abandoned]);
        let cfs: Vec<_> = (0..5).map(|t| replay.cash_flows.get(t, 0)).collect();
        assert_eq!(cfs, vec![-10.0, 4.0, -1.2, -2.0, 0.0]);

        let props = replay.state_proportions();
        assert_eq!(props.abandoned, vec![0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(props.operating[0], 1.0);
    }

    #[test]
    fn test_replay_rejects_unavailable_transition() {
        let ncf = PathMatrix::zeros(2, 1);
        let capex = CapexSchedule::Constant(1.0);
        let rigid = OperationalFlexibility::rigid();
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 0,
            flexibility: &rigid,
        };
        let mut table = PolicyTable::new(2, 1);
        table.set_next_state(0, Uninvested, 0, Operating).unwrap();
        table.set_next_state(1, Operating, 0, Abandoned).unwrap();
        assert!(replay_policy(&table, &project).is_err());
    }

    #[test]
    fn test_replay_rejects_short_capex_schedule() {
        let ncf = PathMatrix::zeros(3, 1);
        let capex = CapexSchedule::PerStep(vec![1.0]);
        let rigid = OperationalFlexibility::rigid();
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 0,
            flexibility: &rigid,
        };
        let mut table = PolicyTable::new(3, 1);
        table.set_next_state(2, Uninvested, 0, Operating).unwrap();
        match replay_policy(&table, &project) {
            Err(LsmError::Configuration { field, .. }) => assert_eq!(field, "capex"),
            other => panic!("expected a capex configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_rigid_matches_plain_engine_exactly() {
        let (ens, ncf, params) = setup(20, 300);
        let capex = CapexSchedule::Constant(12.0);
        let rigid = OperationalFlexibility::rigid();
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 2,
            flexibility: &rigid,
        };
        let flexible = run_flexible_real_option(&ens, &project, &params, false).unwrap();
        let plain = run_real_option(&ens, &ncf, &capex, 2, &params, false).unwrap();
        assert_eq!(flexible.summary, plain.summary);
        assert_eq!(flexible.flexibility_value, 0.0);
        assert!(flexible.state_proportions.suspended.iter().all(|v| *v == 0.0));
        assert!(flexible.state_proportions.abandoned.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_replay_present_value_equals_rov() {
        let (ens, ncf, params) = setup(20, 300);
        let capex = CapexSchedule::Constant(8.0);
        let flex = full_flexibility();
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 1,
            flexibility: &flex,
        };
        let solution = solve_policy(&ens, &project, &params).unwrap();
        let replay = replay_policy(&solution.policy, &project).unwrap();
        let (pv, _) = replay.present_value(&params);
        assert!(
            (pv - solution.summary.rov).abs() < 1e-8 * solution.summary.rov.abs().max(1.0),
            "{pv} vs {}",
            solution.summary.rov
        );
    }

    #[test]
    fn test_abandonment_is_absorbing() {
        let (ens, ncf, params) = setup(20, 300);
        let capex = CapexSchedule::Constant(5.0);
        let flex = OperationalFlexibility {
            abandon_capex: Some(0.0),
            ..OperationalFlexibility::rigid()
        };
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 0,
            flexibility: &flex,
        };
        let solution = solve_policy(&ens, &project, &params).unwrap();
        let replay = replay_policy(&solution.policy, &project).unwrap();
        let mut abandoned_any = false;
        for p in 0..300 {
            if let Some(t0) = (0..20).find(|t| replay.state(*t, p) == Abandoned) {
                abandoned_any = true;
                for t in (t0 + 1)..20 {
                    assert_eq!(replay.state(t, p), Abandoned);
                    assert_eq!(replay.cash_flows.get(t, p), 0.0);
                }
            }
        }
        assert!(abandoned_any, "free abandonment of a loss-making project should be used");
        let props = replay.state_proportions();
        for t in 0..20 {
            let total = props.uninvested[t] + props.operating[t] + props.suspended[t] + props.abandoned[t];
            assert!((total - 1.0).abs() < 1e-12);
        }
        assert!(props.abandoned.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_negative_switching_cost_rejected() {
        let (ens, ncf, params) = setup(4, 10);
        let capex = CapexSchedule::Constant(1.0);
        let flex = OperationalFlexibility {
            suspend_capex: Some(-1.0),
            ..OperationalFlexibility::rigid()
        };
        let project = FlexibleProject {
            net_cash_flows: &ncf,
            capex: &capex,
            construction_lag: 0,
            flexibility: &flex,
        };
        assert!(matches!(
            solve_policy(&ens, &project, &params),
            Err(LsmError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_flattened_input_json() {
        let json = r#"{
            "state_variables": [[1.0, 1.0, 1.0], [1.2, 0.8, 1.0], [1.3, 0.6, 1.1]],
            "net_cash_flows": [[0.0, 0.0, 0.0], [2.0, -1.0, 0.5], [3.0, -2.0, 0.4]],
            "capex": [1.0, 1.0, 1.0],
            "risk_free_rate": 0.05,
            "dt": 1.0,
            "flexibility": { "abandon_capex": 0.5 }
        }"#;
        let input: FlexibleRealOptionInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.flexibility.abandon_capex, Some(0.5));
        assert_eq!(input.flexibility.suspend_capex, None);
        let out = value_flexible_real_option(&input).unwrap();
        assert!(out.result.summary.rov >= out.result.summary.npv);
        let v = serde_json::to_value(&out.result).unwrap();
        assert!(v.get("state_proportions").is_some());
    }
}
