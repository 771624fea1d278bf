//! Implicit-linear solves `(I − dt·L) x = b` over every grid point.
//!
//! Without coupling the operator is diagonal across variables and each
//! point is one scalar division per variable. With coupling configured,
//! every grid point assembles an `N×N` matrix from the per-pair operator
//! buffers and solves it with an LU factorization.

use kairos_core::{BufferHandle, SolveError, StoreError, Tensor};
use kairos_store::BufferStore;
use nalgebra::{DMatrix, DVector};

use crate::config::CouplingConfig;
use crate::variable::Variable;

/// Operator table `L[row][col]` over the bound variables, each entry a
/// buffer of per-point coefficients.
#[derive(Clone, Debug)]
pub(crate) struct LinearCoupling {
    n: usize,
    entries: Vec<Option<BufferHandle>>,
    coupled: bool,
}

impl LinearCoupling {
    /// Diagonal from each variable's own linear buffer, off-diagonals from
    /// `coupling`.
    pub fn bind(
        variables: &[Variable],
        coupling: Option<&CouplingConfig>,
        store: &BufferStore,
    ) -> Result<Self, StoreError> {
        let n = variables.len();
        let mut entries = vec![None; n * n];
        for (i, var) in variables.iter().enumerate() {
            entries[i * n + i] = var.linear;
        }
        let mut coupled = false;
        if let Some(coupling) = coupling {
            for entry in &coupling.off_diagonal {
                let h = store.handle(&entry.buffer)?;
                entries[entry.row * n + entry.col] = Some(h);
                coupled = true;
            }
            if coupling.assume_symmetric {
                for entry in &coupling.off_diagonal {
                    let mirrored = entry.col * n + entry.row;
                    if entries[mirrored].is_none() {
                        entries[mirrored] = entries[entry.row * n + entry.col];
                    }
                }
            }
        }
        Ok(Self {
            n,
            entries,
            coupled,
        })
    }

    pub fn entry(&self, row: usize, col: usize) -> Option<BufferHandle> {
        self.entries[row * self.n + col]
    }

    /// Whether any off-diagonal entry is bound.
    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    /// Overwrite `rhs` with the solution of `(I − dt·L) x = rhs`.
    pub fn solve(&self, store: &BufferStore, dt: f64, rhs: &mut [Tensor]) -> Result<(), SolveError> {
        debug_assert_eq!(rhs.len(), self.n);
        if self.coupled {
            self.solve_dense(store, dt, rhs)
        } else {
            for (i, x) in rhs.iter_mut().enumerate() {
                if let Some(l) = self.entry(i, i) {
                    solve_diagonal(store.get(l)?, dt, x)?;
                }
            }
            Ok(())
        }
    }

    fn solve_dense(&self, store: &BufferStore, dt: f64, rhs: &mut [Tensor]) -> Result<(), SolveError> {
        let n = self.n;
        let len = rhs.first().map_or(0, Tensor::len);
        let mut operators = Vec::with_capacity(n * n);
        for &entry in &self.entries {
            let op = match entry {
                Some(h) => {
                    let t = store.get(h)?;
                    if t.len() != len {
                        return Err(StoreError::ShapeMismatch {
                            name: store.name(h)?.to_owned(),
                            expected: rhs[0].shape().to_vec(),
                            actual: t.shape().to_vec(),
                        }
                        .into());
                    }
                    Some(t.as_slice())
                }
                None => None,
            };
            operators.push(op);
        }

        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DVector::<f64>::zeros(n);
        let mut solutions = vec![0.0; n * len];
        for point in 0..len {
            a.fill_with_identity();
            for (k, op) in operators.iter().enumerate() {
                if let Some(op) = op {
                    a[(k / n, k % n)] -= dt * op[point];
                }
            }
            for (i, x) in rhs.iter().enumerate() {
                b[i] = x.as_slice()[point];
            }
            let x = a
                .clone()
                .lu()
                .solve(&b)
                .filter(|x| x.iter().all(|v| v.is_finite()))
                .ok_or(SolveError::DegenerateLinearSystem { point })?;
            for i in 0..n {
                solutions[i * len + point] = x[i];
            }
        }
        for (i, x) in rhs.iter_mut().enumerate() {
            x.as_mut_slice()
                .copy_from_slice(&solutions[i * len..(i + 1) * len]);
        }
        Ok(())
    }
}

/// `x ← x / (1 − dt·L)` pointwise.
pub(crate) fn solve_diagonal(l: &Tensor, dt: f64, x: &mut Tensor) -> Result<(), SolveError> {
    for (point, (x, l)) in x.as_mut_slice().iter_mut().zip(l.as_slice()).enumerate() {
        let denominator = 1.0 - dt * l;
        if denominator == 0.0 || !denominator.is_finite() {
            return Err(SolveError::DegenerateLinearSystem { point });
        }
        *x /= denominator;
    }
    Ok(())
}
