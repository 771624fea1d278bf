//! Mock [`Domain`] implementations.

use std::f64::consts::PI;

use kairos_core::{Domain, Tensor};

/// A domain whose transform is the identity.
///
/// Reciprocal axes equal the primary axes. Useful for testing solver
/// sequencing without spectral effects.
pub struct IdentityDomain {
    shape: Vec<usize>,
    axes: Vec<Tensor>,
}

impl IdentityDomain {
    /// Unit-spaced axes over the given shape.
    pub fn new(shape: &[usize]) -> Self {
        let axes = shape
            .iter()
            .map(|&n| {
                let coords = (0..n).map(|i| i as f64).collect();
                Tensor::from_vec(&[n], coords).unwrap_or_default()
            })
            .collect();
        Self {
            shape: shape.to_vec(),
            axes,
        }
    }
}

impl Domain for IdentityDomain {
    fn dim(&self) -> usize {
        self.shape.len()
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn transform(&self, x: &Tensor) -> Tensor {
        x.clone()
    }

    fn inverse_transform(&self, x: &Tensor) -> Tensor {
        x.clone()
    }

    fn axis(&self, dim: usize) -> Option<&Tensor> {
        self.axes.get(dim)
    }

    fn reciprocal_axis(&self, dim: usize) -> Option<&Tensor> {
        self.axes.get(dim)
    }
}

/// Periodic 1-D domain with the discrete Hartley transform.
///
/// `H[k] = Σ x[n] cas(2πnk/N)` with `cas = cos + sin`; the inverse is the
/// same sum scaled by `1/N`. Because the Hartley transform of a symmetric
/// periodic convolution is diagonal, the Laplacian acts as `-k²` per mode,
/// which makes this a real-valued stand-in for an FFT-based domain.
pub struct HartleyDomain {
    shape: [usize; 1],
    x: Tensor,
    k: Tensor,
    cas: Vec<f64>,
}

impl HartleyDomain {
    /// `n` points on `[0, length)`.
    pub fn new(n: usize, length: f64) -> Self {
        let dx = length / n as f64;
        let x = (0..n).map(|i| i as f64 * dx).collect();
        let k = (0..n)
            .map(|j| 2.0 * PI * j.min(n - j) as f64 / length)
            .collect();
        let mut cas = Vec::with_capacity(n * n);
        for a in 0..n {
            for b in 0..n {
                let theta = 2.0 * PI * ((a * b) % n) as f64 / n as f64;
                cas.push(theta.cos() + theta.sin());
            }
        }
        Self {
            shape: [n],
            x: Tensor::from_vec(&[n], x).unwrap_or_default(),
            k: Tensor::from_vec(&[n], k).unwrap_or_default(),
            cas,
        }
    }

    fn apply(&self, x: &Tensor, scale: f64) -> Tensor {
        let n = self.shape[0];
        let src = x.as_slice();
        let mut out = Tensor::zeros(&self.shape);
        for (k, o) in out.as_mut_slice().iter_mut().enumerate() {
            let row = &self.cas[k * n..(k + 1) * n];
            *o = scale * row.iter().zip(src).map(|(c, v)| c * v).sum::<f64>();
        }
        out
    }
}

impl Domain for HartleyDomain {
    fn dim(&self) -> usize {
        1
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn transform(&self, x: &Tensor) -> Tensor {
        self.apply(x, 1.0)
    }

    fn inverse_transform(&self, x: &Tensor) -> Tensor {
        self.apply(x, 1.0 / self.shape[0] as f64)
    }

    fn axis(&self, dim: usize) -> Option<&Tensor> {
        (dim == 0).then_some(&self.x)
    }

    fn reciprocal_axis(&self, dim: usize) -> Option<&Tensor> {
        (dim == 0).then_some(&self.k)
    }
}
