//! The [`Domain`] collaborator: grid geometry and spectral transforms.

use crate::tensor::Tensor;

/// Grid geometry and the forward/inverse transform pair.
///
/// The engine never interprets grid values itself. It sizes buffers with
/// [`zeros`](Domain::zeros) / [`reciprocal_zeros`](Domain::reciprocal_zeros)
/// and moves values between the primary ("real space") and reciprocal
/// representations through [`transform`](Domain::transform) and
/// [`inverse_transform`](Domain::inverse_transform). Both transforms must be
/// pure, and `inverse_transform(transform(x))` must reproduce `x` within
/// floating-point tolerance.
///
/// Domains are shared read-only between the driver and compute nodes,
/// hence the `Send + Sync` bound.
pub trait Domain: Send + Sync + 'static {
    /// Number of spatial dimensions.
    fn dim(&self) -> usize;

    /// Primary grid shape.
    fn shape(&self) -> &[usize];

    /// Shape of the reciprocal representation.
    ///
    /// Defaults to the primary shape, which is the case for real
    /// transforms (identity, Hartley, cosine).
    fn reciprocal_shape(&self) -> &[usize] {
        self.shape()
    }

    /// Forward transform into the reciprocal representation.
    fn transform(&self, x: &Tensor) -> Tensor;

    /// Inverse transform back to the primary representation.
    fn inverse_transform(&self, x: &Tensor) -> Tensor;

    /// Coordinates along dimension `dim`, or `None` past [`dim()`](Domain::dim).
    fn axis(&self, dim: usize) -> Option<&Tensor>;

    /// Wave numbers along dimension `dim` in the reciprocal representation.
    fn reciprocal_axis(&self, dim: usize) -> Option<&Tensor>;

    /// A zeroed primary-space tensor.
    fn zeros(&self) -> Tensor {
        Tensor::zeros(self.shape())
    }

    /// A zeroed reciprocal-space tensor.
    fn reciprocal_zeros(&self) -> Tensor {
        Tensor::zeros(self.reciprocal_shape())
    }

    /// Number of points in the reciprocal grid.
    fn reciprocal_len(&self) -> usize {
        self.reciprocal_shape().iter().product()
    }
}
