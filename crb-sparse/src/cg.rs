//! Preconditioned Conjugate-Gradient for the symmetric positive definite systems of truth
//! models.
//!
//! ```ignore
//! let output = ConjugateGradient::new(&matrix)
//!     .with_preconditioner(DiagonalOperator::jacobi(&matrix))
//!     .with_stopping_criterion(RelativeResidualCriterion::new(1e-12))
//!     .with_max_iter(1000)
//!     .solve_with_guess(&rhs, &mut x)?;
//! ```
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::fmt;

/// A square linear operator `x -> A x`.
pub trait LinearOperator {
    /// Computes `y = A x`. `y` has the same length as `x`.
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind>;
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), SolveErrorKind> {
    if expected == actual {
        Ok(())
    } else {
        Err(SolveErrorKind::DimensionMismatch { expected, actual })
    }
}

impl<A: LinearOperator + ?Sized> LinearOperator for &A {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        (**self).apply(x, y)
    }
}

impl LinearOperator for CsrMatrix<f64> {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        check_dimension(self.ncols(), x.len())?;
        spmm_csr_dense(0.0, y, 1.0, Op::NoOp(self), Op::NoOp(x));
        Ok(())
    }
}

impl LinearOperator for DMatrix<f64> {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        check_dimension(self.ncols(), x.len())?;
        y.gemv(1.0, self, x, 0.0);
        Ok(())
    }
}

/// `x -> A^T x` for a CSR matrix `A`, without forming the transpose.
#[derive(Debug, Clone, Copy)]
pub struct TransposedOperator<'a> {
    matrix: &'a CsrMatrix<f64>,
}

impl<'a> TransposedOperator<'a> {
    pub fn new(matrix: &'a CsrMatrix<f64>) -> Self {
        Self { matrix }
    }
}

impl LinearOperator for TransposedOperator<'_> {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        check_dimension(self.matrix.nrows(), x.len())?;
        spmm_csr_dense(0.0, y, 1.0, Op::Transpose(self.matrix), Op::NoOp(x));
        Ok(())
    }
}

/// The trivial preconditioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        y.copy_from(x);
        Ok(())
    }
}

/// `x -> D x` for a diagonal matrix `D`.
#[derive(Debug, Clone)]
pub struct DiagonalOperator {
    diagonal: DVector<f64>,
}

impl DiagonalOperator {
    pub fn new(diagonal: DVector<f64>) -> Self {
        Self { diagonal }
    }

    /// The Jacobi preconditioner `diag(A)^{-1}`. Zero diagonal entries are replaced by one.
    pub fn jacobi(matrix: &CsrMatrix<f64>) -> Self {
        let diagonal = crate::csr_diagonal(matrix).map(|d| if d != 0.0 { 1.0 / d } else { 1.0 });
        Self { diagonal }
    }

    pub fn diagonal(&self) -> &DVector<f64> {
        &self.diagonal
    }
}

impl LinearOperator for DiagonalOperator {
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), SolveErrorKind> {
        check_dimension(self.diagonal.len(), x.len())?;
        y.zip_zip_apply(x, &self.diagonal, |y_i, x_i, d_i| *y_i = d_i * x_i);
        Ok(())
    }
}

/// Snapshot of a CG iteration, handed to the stopping criterion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgIterate {
    /// Number of updates made to the solution so far.
    pub iteration: usize,
    /// Norm of the recursively updated residual.
    pub residual_norm: f64,
    pub rhs_norm: f64,
}

pub trait StoppingCriterion {
    fn has_converged(&self, iterate: &CgIterate) -> bool;
}

/// Stops once `||r|| <= tol * ||b||`.
///
/// The residual is the one updated by the CG recursion, which can drift from the true residual
/// `b - A x` for badly conditioned systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeResidualCriterion {
    tolerance: f64,
}

impl RelativeResidualCriterion {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for RelativeResidualCriterion {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl StoppingCriterion for RelativeResidualCriterion {
    fn has_converged(&self, iterate: &CgIterate) -> bool {
        iterate.residual_norm <= self.tolerance * iterate.rhs_norm
    }
}

/// Stops once `||r|| <= tol`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteResidualCriterion {
    tolerance: f64,
}

impl AbsoluteResidualCriterion {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl StoppingCriterion for AbsoluteResidualCriterion {
    fn has_converged(&self, iterate: &CgIterate) -> bool {
        iterate.residual_norm <= self.tolerance
    }
}

/// Scratch vectors of a CG solve. Reusing a workspace across solves of the same size avoids
/// reallocation.
#[derive(Debug, Clone)]
pub struct CgWorkspace {
    r: DVector<f64>,
    z: DVector<f64>,
    p: DVector<f64>,
    a_p: DVector<f64>,
}

impl Default for CgWorkspace {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            a_p: DVector::zeros(0),
        }
    }
}

impl CgWorkspace {
    fn resize(&mut self, n: usize) {
        for buffer in [&mut self.r, &mut self.z, &mut self.p, &mut self.a_p] {
            if buffer.len() != n {
                *buffer = DVector::zeros(n);
            }
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    DimensionMismatch { expected: usize, actual: usize },
    IndefiniteOperator,
    IndefinitePreconditioner,
    NonFiniteResidual,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::NonFiniteResidual => write!(f, "Residual is not finite"),
            Self::MaxIterationsReached { max_iter } => write!(f, "Max iterations ({}) reached.", max_iter),
        }
    }
}

impl Error for SolveErrorKind {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgOutput {
    /// Number of updates made to the initial guess.
    pub num_iterations: usize,
    /// Norm of the final recursively updated residual.
    pub residual_norm: f64,
}

#[derive(Debug)]
pub struct SolveError {
    /// State of the solver when it failed.
    pub output: CgOutput,
    pub kind: SolveErrorKind,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CG solve failed after {} iterations (residual norm {:e}): {}",
            self.output.num_iterations, self.output.residual_norm, self.kind
        )
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.kind)
    }
}

/// Preconditioned Conjugate-Gradient solver for `A x = b`.
pub struct ConjugateGradient<'a, A, P, C> {
    operator: A,
    preconditioner: P,
    criterion: C,
    max_iter: Option<usize>,
    owned_workspace: CgWorkspace,
    workspace: Option<&'a mut CgWorkspace>,
}

impl<'a, A: LinearOperator> ConjugateGradient<'a, A, IdentityOperator, RelativeResidualCriterion> {
    /// A solver without preconditioning that stops at a relative residual of `1e-8`.
    pub fn new(operator: A) -> Self {
        Self {
            operator,
            preconditioner: IdentityOperator,
            criterion: RelativeResidualCriterion::default(),
            max_iter: None,
            owned_workspace: CgWorkspace::default(),
            workspace: None,
        }
    }
}

impl<'a, A, P, C> ConjugateGradient<'a, A, P, C>
where
    A: LinearOperator,
    P: LinearOperator,
    C: StoppingCriterion,
{
    pub fn with_preconditioner<P2: LinearOperator>(self, preconditioner: P2) -> ConjugateGradient<'a, A, P2, C> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            criterion: self.criterion,
            max_iter: self.max_iter,
            owned_workspace: self.owned_workspace,
            workspace: self.workspace,
        }
    }

    pub fn with_stopping_criterion<C2: StoppingCriterion>(self, criterion: C2) -> ConjugateGradient<'a, A, P, C2> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner: self.preconditioner,
            criterion,
            max_iter: self.max_iter,
            owned_workspace: self.owned_workspace,
            workspace: self.workspace,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }

    /// Uses the scratch vectors of `workspace` instead of allocating new ones.
    pub fn with_workspace(self, workspace: &'a mut CgWorkspace) -> Self {
        Self {
            workspace: Some(workspace),
            ..self
        }
    }

    /// Solves `A x = b` starting from a zero initial guess.
    pub fn solve(&mut self, b: &DVector<f64>) -> Result<(DVector<f64>, CgOutput), SolveError> {
        let mut x = DVector::zeros(b.len());
        let output = self.solve_with_guess(b, &mut x)?;
        Ok((x, output))
    }

    /// Solves `A x = b`, using the contents of `x` as the initial guess.
    pub fn solve_with_guess(&mut self, b: &DVector<f64>, x: &mut DVector<f64>) -> Result<CgOutput, SolveError> {
        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: f64::NAN,
        };
        let fail = |output: CgOutput, kind| Err(SolveError { output, kind });

        if b.len() != x.len() {
            return fail(
                output,
                SolveErrorKind::DimensionMismatch {
                    expected: b.len(),
                    actual: x.len(),
                },
            );
        }

        let rhs_norm = b.norm();
        if rhs_norm == 0.0 {
            x.fill(0.0);
            output.residual_norm = 0.0;
            return Ok(output);
        }

        let workspace = match &mut self.workspace {
            Some(workspace) => &mut **workspace,
            None => &mut self.owned_workspace,
        };
        workspace.resize(b.len());
        let CgWorkspace { r, z, p, a_p } = workspace;

        // r = b - A x, z = P r, p = z
        if let Err(kind) = self.operator.apply(x, r) {
            return fail(output, kind);
        }
        r.zip_apply(b, |r_i, b_i| *r_i = b_i - *r_i);
        if let Err(kind) = self.preconditioner.apply(r, z) {
            return fail(output, kind);
        }
        p.copy_from(z);
        let mut z_dot_r = z.dot(r);

        loop {
            output.residual_norm = r.norm();
            if !output.residual_norm.is_finite() {
                return fail(output, SolveErrorKind::NonFiniteResidual);
            }
            let iterate = CgIterate {
                iteration: output.num_iterations,
                residual_norm: output.residual_norm,
                rhs_norm,
            };
            if self.criterion.has_converged(&iterate) {
                return Ok(output);
            }
            if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return fail(output, SolveErrorKind::MaxIterationsReached { max_iter });
                }
            }

            if let Err(kind) = self.operator.apply(p, a_p) {
                return fail(output, kind);
            }
            let p_dot_a_p = p.dot(a_p);
            if p_dot_a_p <= 0.0 {
                return fail(output, SolveErrorKind::IndefiniteOperator);
            }
            if z_dot_r <= 0.0 {
                return fail(output, SolveErrorKind::IndefinitePreconditioner);
            }

            let alpha = z_dot_r / p_dot_a_p;
            x.axpy(alpha, p, 1.0);
            r.axpy(-alpha, a_p, 1.0);
            output.num_iterations += 1;

            if let Err(kind) = self.preconditioner.apply(r, z) {
                return fail(output, kind);
            }
            let z_dot_r_next = z.dot(r);
            let beta = z_dot_r_next / z_dot_r;
            p.axpy(1.0, z, beta);
            z_dot_r = z_dot_r_next;
        }
    }
}
