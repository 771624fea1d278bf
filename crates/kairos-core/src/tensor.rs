//! The [`Tensor`] value type held by every buffer.

use smallvec::SmallVec;
use std::fmt;

/// Grid shape: extent per dimension. Up to 4 dimensions inline.
pub type Shape = SmallVec<[usize; 4]>;

/// A dense, row-major `f64` tensor.
///
/// The engine treats tensors as opaque values. Shape is owned by the
/// domain; the engine only needs elementwise arithmetic, norms, and
/// per-point access for batched solves. An empty tensor (no elements)
/// stands for a buffer that has been registered but never written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor {
    /// An undefined (zero-element) tensor.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::filled(shape, 0.0)
    }

    /// A tensor of the given shape with every element set to `value`.
    pub fn filled(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self {
            shape: Shape::from_slice(shape),
            data: vec![value; len],
        }
    }

    /// Wrap existing data. Returns `None` if `data.len()` does not match
    /// the product of `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self {
            shape: Shape::from_slice(shape),
            data,
        })
    }

    /// A zero tensor with the same shape as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![0.0; self.data.len()],
        }
    }

    /// Extent per dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the tensor has been given a value (non-empty).
    pub fn is_defined(&self) -> bool {
        !self.data.is_empty()
    }

    /// Flat, row-major element view.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat element view.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the tensor, returning its flat data.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Whether `self` and `other` have identical shapes.
    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.shape == other.shape
    }

    /// Overwrite `self` with `other`, reusing the allocation when possible.
    pub fn assign(&mut self, other: &Tensor) {
        self.shape.clone_from(&other.shape);
        self.data.clone_from(&other.data);
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// `self += alpha * x`. Shapes must match.
    pub fn axpy(&mut self, alpha: f64, x: &Tensor) {
        debug_assert_eq!(self.data.len(), x.data.len());
        for (y, x) in self.data.iter_mut().zip(&x.data) {
            *y += alpha * x;
        }
    }

    /// `self *= alpha`.
    pub fn scale(&mut self, alpha: f64) {
        self.data.iter_mut().for_each(|v| *v *= alpha);
    }

    /// Apply `f` to every element in place.
    pub fn map_inplace(&mut self, mut f: impl FnMut(f64) -> f64) {
        self.data.iter_mut().for_each(|v| *v = f(*v));
    }

    /// Euclidean (L2) norm over all elements.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Largest absolute element, or 0 for an empty tensor.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    /// Whether any element is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|v| !v.is_finite())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{:?}", self.shape.as_slice())
    }
}
