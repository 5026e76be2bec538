//! Levenberg-Marquardt driver shared by calibration and pose refinement.
//!
//! Problems implement [`levenberg_marquardt::LeastSquaresProblem`] over
//! dynamically sized nalgebra vectors and own their current parameters.
//! The Jacobian layout is left to the problem, so block structure
//! (intrinsics shared by all views, one pose block per view) is exploited
//! when it is assembled.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Budget in outer iterations; the solver stops after about
    /// `max_iterations * (num_params + 1)` residual evaluations.
    pub max_iterations: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns below which the
    /// solve stops.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-10,
            xtol: 1e-12,
            gtol: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmReport {
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// `false` when the solver ran out of budget or hit a numerical failure.
    pub converged: bool,
}

/// Dense least-squares problems with owned dynamic storage.
pub trait DynProblem:
    LeastSquaresProblem<
    f64,
    Dyn,
    Dyn,
    ResidualStorage = Owned<f64, Dyn>,
    JacobianStorage = Owned<f64, Dyn, Dyn>,
    ParameterStorage = Owned<f64, Dyn>,
>
{
}

impl<P> DynProblem for P where
    P: LeastSquaresProblem<
        f64,
        Dyn,
        Dyn,
        ResidualStorage = Owned<f64, Dyn>,
        JacobianStorage = Owned<f64, Dyn, Dyn>,
        ParameterStorage = Owned<f64, Dyn>,
    >
{
}

// The solver asserts on negative or NaN tolerances.
fn tolerance(x: f64) -> f64 {
    if x.is_finite() {
        x.max(0.0)
    } else {
        0.0
    }
}

fn cost<P: DynProblem>(problem: &P) -> Option<f64> {
    let c = 0.5 * problem.residuals()?.norm_squared();
    c.is_finite().then_some(c)
}

/// Minimise `problem` from its current parameters.
///
/// Returns the problem holding the final parameters, or `None` when the
/// residuals cannot be evaluated at the start or the end of the solve.
pub fn minimize<P: DynProblem>(problem: P, opts: &LmOptions) -> Option<(P, LmReport)> {
    let initial_cost = cost(&problem)?;
    let lm = LevenbergMarquardt::new()
        .with_ftol(tolerance(opts.ftol))
        .with_xtol(tolerance(opts.xtol))
        .with_gtol(tolerance(opts.gtol))
        .with_patience(opts.max_iterations.max(1));
    let (problem, report) = lm.minimize(problem);
    trace!(
        "lm: {:?} after {} evaluations",
        report.termination,
        report.number_of_evaluations
    );

    let final_cost = cost(&problem)?;
    Some((
        problem,
        LmReport {
            iterations: report.number_of_evaluations,
            initial_cost,
            final_cost,
            converged: report.termination.was_successful(),
        },
    ))
}

/// Relative step for central differences.
pub(crate) fn diff_step(x: f64) -> f64 {
    1e-6 * x.abs().max(1.0)
}

/// Dense Jacobian of `f` by central differences.
pub fn numeric_jacobian<F>(f: F, params: &DVector<f64>, m: usize) -> Option<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    let n = params.len();
    let mut j = DMatrix::zeros(m, n);
    let mut p = params.clone();
    for c in 0..n {
        let h = diff_step(params[c]);
        p[c] = params[c] + h;
        let plus = f(&p)?;
        p[c] = params[c] - h;
        let minus = f(&p)?;
        p[c] = params[c];
        j.set_column(c, &((plus - minus) / (2.0 * h)));
    }
    Some(j)
}
