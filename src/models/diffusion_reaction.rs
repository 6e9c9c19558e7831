use crate::model::{
    assemble_truth_system, AffineDecomposition, MinThetaCoercivityBound, ThetaCoefficients, TimeDiscretization,
    TruthModel, TruthSystem,
};
use crate::parameter::{Parameter, ParameterSpace};
use crb_sparse::cg::{ConjugateGradient, DiagonalOperator, RelativeResidualCriterion};
use crb_sparse::{csr_bilinear_form, csr_linear_combination, CooMatrix, CsrMatrix};
use eyre::eyre;
use log::debug;
use nalgebra::{DVector, Dyn, U1};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::CscMatrix;

/// Piecewise linear finite element model of
///
/// ```text
/// -(mu_0 u')' + mu_1 u = 1 in (0, 1),    u(0) = u(1) = 0,
/// ```
///
/// on a uniform mesh, optionally with a time derivative `du/dt` discretized by implicit Euler.
///
/// The affine decomposition is `A(mu) = mu_0 K + mu_1 M` with the stiffness matrix `K` and
/// the mass matrix `M`. Output 0 is the compliant output `int u`, output 1 is `int_{1/2}^1 u`.
/// The solution space is equipped with the inner product `X = K + M`, that is the energy
/// inner product at `mu = (1, 1)`.
pub struct DiffusionReaction1d {
    num_elements: usize,
    parameter_space: ParameterSpace,
    decomposition: AffineDecomposition,
    mass: CsrMatrix<f64>,
    inner_product: CsrMatrix<f64>,
    inner_product_factor: CscCholesky<f64>,
    time_discretization: Option<TimeDiscretization>,
    cg_tolerance: f64,
    cg_max_iter: usize,
}

fn theta_coefficients(mu: &Parameter, time_dependent: bool) -> ThetaCoefficients {
    ThetaCoefficients {
        mass: if time_dependent { vec![1.0] } else { Vec::new() },
        stiffness: vec![mu[0], mu[1]],
        outputs: vec![vec![1.0], vec![1.0]],
    }
}

/// Assembles `(K, M, load, right_half)` on the interior nodes of a uniform mesh of `(0, 1)`.
fn assemble(num_elements: usize) -> (CsrMatrix<f64>, CsrMatrix<f64>, DVector<f64>, DVector<f64>) {
    let n = num_elements - 1;
    let h = 1.0 / num_elements as f64;
    let dof = |node: usize| (1..num_elements).contains(&node).then(|| node - 1);

    #[rustfmt::skip]
    let local_stiffness = [[ 1.0 / h, -1.0 / h],
                           [-1.0 / h,  1.0 / h]];
    #[rustfmt::skip]
    let local_mass = [[2.0 * h / 6.0, h / 6.0],
                      [h / 6.0, 2.0 * h / 6.0]];

    let mut stiffness = CooMatrix::new(n, n);
    let mut mass = CooMatrix::new(n, n);
    let mut load = DVector::zeros(n);
    let mut right_half = DVector::zeros(n);

    for element in 0..num_elements {
        let nodes = [element, element + 1];
        let midpoint = (element as f64 + 0.5) * h;
        for (a, &node_a) in nodes.iter().enumerate() {
            let Some(i) = dof(node_a) else { continue };
            load[i] += 0.5 * h;
            if midpoint >= 0.5 {
                right_half[i] += 0.5 * h;
            }
            for (b, &node_b) in nodes.iter().enumerate() {
                if let Some(j) = dof(node_b) {
                    stiffness.push(i, j, local_stiffness[a][b]);
                    mass.push(i, j, local_mass[a][b]);
                }
            }
        }
    }

    (CsrMatrix::from(&stiffness), CsrMatrix::from(&mass), load, right_half)
}

impl DiffusionReaction1d {
    /// A steady model on a mesh with `num_elements` elements and the parameter space
    /// `[0.1, 10]^2`.
    pub fn new(num_elements: usize) -> eyre::Result<Self> {
        if num_elements < 2 {
            return Err(eyre!("at least two elements are required, got {}", num_elements));
        }
        let parameter_space =
            ParameterSpace::new(DVector::from_element(2, 0.1), DVector::from_element(2, 10.0))?;

        let (stiffness, mass, load, right_half) = assemble(num_elements);
        let inner_product = csr_linear_combination(&[stiffness.clone(), mass.clone()], &[1.0, 1.0]);
        let inner_product_factor = CscCholesky::factor(&CscMatrix::from(&inner_product))
            .map_err(|err| eyre!("failed to factor inner product matrix. Error: {}", err))?;

        Ok(Self {
            num_elements,
            parameter_space,
            decomposition: AffineDecomposition {
                mass: Vec::new(),
                stiffness: vec![stiffness, mass.clone()],
                outputs: vec![vec![load], vec![right_half]],
            },
            mass,
            inner_product,
            inner_product_factor,
            time_discretization: None,
            cg_tolerance: 1e-13,
            cg_max_iter: 10 * num_elements,
        })
    }

    pub fn with_parameter_space(self, parameter_space: ParameterSpace) -> Self {
        Self {
            parameter_space,
            ..self
        }
    }

    /// Makes the model time-dependent, adding the term `du/dt` with `theta_m = 1`.
    pub fn with_time_discretization(mut self, time_discretization: TimeDiscretization) -> Self {
        self.decomposition.mass = vec![self.mass.clone()];
        self.time_discretization = Some(time_discretization);
        self
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// Coercivity bounds `min(mu_0, mu_1) <= alpha(mu)` and `gamma(mu) <= max(mu_0, mu_1)`
    /// with respect to the inner product of the model.
    pub fn coercivity_bound(&self) -> MinThetaCoercivityBound {
        let time_dependent = self.time_discretization.is_some();
        MinThetaCoercivityBound::new(&DVector::from_element(2, 1.0), move |mu| {
            theta_coefficients(mu, time_dependent)
        })
    }
}

impl TruthModel for DiffusionReaction1d {
    fn parameter_space(&self) -> &ParameterSpace {
        &self.parameter_space
    }

    fn time_discretization(&self) -> Option<TimeDiscretization> {
        self.time_discretization
    }

    fn num_dofs(&self) -> usize {
        self.num_elements - 1
    }

    fn num_outputs(&self) -> usize {
        2
    }

    fn qa(&self) -> usize {
        2
    }

    fn qm(&self) -> usize {
        self.decomposition.mass.len()
    }

    fn ql(&self, _output_index: usize) -> usize {
        1
    }

    fn affine_decomposition(&self) -> eyre::Result<AffineDecomposition> {
        Ok(self.decomposition.clone())
    }

    fn theta(&self, mu: &Parameter, _time: f64) -> ThetaCoefficients {
        theta_coefficients(mu, self.time_discretization.is_some())
    }

    fn update(&self, mu: &Parameter) -> eyre::Result<TruthSystem> {
        Ok(assemble_truth_system(&self.decomposition, &self.theta(mu, 0.0)))
    }

    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        let mut x = DVector::zeros(rhs.len());
        let output = ConjugateGradient::new(matrix)
            .with_preconditioner(DiagonalOperator::jacobi(matrix))
            .with_stopping_criterion(RelativeResidualCriterion::new(self.cg_tolerance))
            .with_max_iter(self.cg_max_iter)
            .solve_with_guess(rhs, &mut x)
            .map_err(|err| eyre!("Truth solve failed. {}", err))?;
        debug!("Truth solve converged in {} CG iterations", output.num_iterations);
        Ok(x)
    }

    fn scalar_product(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        csr_bilinear_form(&self.inner_product, a, b)
    }

    fn l2solve(&self, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        // CscCholesky::solve only accepts dynamic matrices
        let solution = self.inner_product_factor.solve(rhs);
        Ok(solution.reshape_generic(Dyn(rhs.len()), U1))
    }

    fn variance_product(&self, a: &DVector<f64>, b: &DVector<f64>) -> Option<f64> {
        let mean = &self.decomposition.outputs[0][0];
        Some(csr_bilinear_form(&self.mass, a, b) - mean.dot(a) * mean.dot(b))
    }
}
