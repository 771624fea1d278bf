//! Variable bindings: the buffers a time integrator advances.
//!
//! A [`VariableSpec`] names the buffers of one integrated quantity; binding
//! it against the store resolves every name to a handle once, at solver
//! construction. Solvers never look buffers up by name while stepping.

use kairos_core::{BufferHandle, StoreError, Tensor};
use kairos_store::BufferStore;

/// Buffer names for one integrated quantity.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableSpec {
    /// Real-space buffer the solver writes.
    pub buffer: String,
    /// Transformed value of `buffer`, computed by the root node.
    pub reciprocal: String,
    /// Linear operator coefficients in reciprocal space. `None` makes the
    /// variable purely explicit.
    pub linear: Option<String>,
    /// Nonlinear right-hand side in reciprocal space. Explicit integrators
    /// treat it as the time derivative.
    pub nonlinear: String,
}

impl VariableSpec {
    /// A variable without a linear operator.
    pub fn new(
        buffer: impl Into<String>,
        reciprocal: impl Into<String>,
        nonlinear: impl Into<String>,
    ) -> Self {
        Self {
            buffer: buffer.into(),
            reciprocal: reciprocal.into(),
            linear: None,
            nonlinear: nonlinear.into(),
        }
    }

    /// Attach a linear operator buffer.
    pub fn with_linear(mut self, linear: impl Into<String>) -> Self {
        self.linear = Some(linear.into());
        self
    }
}

/// A [`VariableSpec`] resolved to handles.
#[derive(Clone, Debug)]
pub(crate) struct Variable {
    pub name: String,
    pub buffer: BufferHandle,
    pub reciprocal: BufferHandle,
    pub linear: Option<BufferHandle>,
    pub nonlinear: BufferHandle,
}

impl Variable {
    /// Resolve `spec` and request `history_depth` entries of nonlinear
    /// history. Every named buffer must already be registered.
    pub fn bind(
        spec: &VariableSpec,
        store: &mut BufferStore,
        history_depth: usize,
    ) -> Result<Self, StoreError> {
        let buffer = store.handle(&spec.buffer)?;
        let reciprocal = store.handle(&spec.reciprocal)?;
        let linear = spec
            .linear
            .as_deref()
            .map(|name| store.handle(name))
            .transpose()?;
        let nonlinear = store.handle(&spec.nonlinear)?;
        if history_depth > 0 {
            store.request_history(&spec.nonlinear, history_depth);
        }
        Ok(Self {
            name: spec.buffer.clone(),
            buffer,
            reciprocal,
            linear,
            nonlinear,
        })
    }

    /// Fail unless the reciprocal, nonlinear and linear buffers hold
    /// defined values of one common shape.
    pub fn check_shapes(&self, store: &BufferStore) -> Result<(), StoreError> {
        let reference = store.get(self.reciprocal)?;
        let others = std::iter::once(self.nonlinear).chain(self.linear);
        for h in others {
            let t = store.get(h)?;
            if !t.same_shape(reference) || !t.is_defined() {
                return Err(StoreError::ShapeMismatch {
                    name: store.name(h)?.to_owned(),
                    expected: reference.shape().to_vec(),
                    actual: t.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// `N + L·ū` at the current state; `N` alone without a linear operator.
    pub fn time_derivative(&self, store: &BufferStore) -> Result<Tensor, StoreError> {
        let mut f = store.get(self.nonlinear)?.clone();
        if let Some(l) = self.linear {
            let l = store.get(l)?.as_slice();
            let u = store.get(self.reciprocal)?.as_slice();
            for ((f, l), u) in f.as_mut_slice().iter_mut().zip(l).zip(u) {
                *f += l * u;
            }
        }
        Ok(f)
    }
}

/// Bind a list of specs, requesting the same history depth for each.
pub(crate) fn bind_all(
    specs: &[VariableSpec],
    store: &mut BufferStore,
    history_depth: usize,
) -> Result<Vec<Variable>, StoreError> {
    specs
        .iter()
        .map(|spec| Variable::bind(spec, store, history_depth))
        .collect()
}

/// Fail unless every variable's reciprocal buffer has the shape of the
/// first. Solves that couple variables point by point need this.
pub(crate) fn check_common_shape(
    variables: &[Variable],
    store: &BufferStore,
) -> Result<(), StoreError> {
    let Some((first, rest)) = variables.split_first() else {
        return Ok(());
    };
    let reference = store.get(first.reciprocal)?;
    for var in rest {
        let t = store.get(var.reciprocal)?;
        if !t.same_shape(reference) {
            return Err(StoreError::ShapeMismatch {
                name: store.name(var.reciprocal)?.to_owned(),
                expected: reference.shape().to_vec(),
                actual: t.shape().to_vec(),
            });
        }
    }
    Ok(())
}

/// `(target, source)` buffer pairs copied after every root execution.
///
/// Forwarding lets a node read last iteration's value of a buffer that a
/// later node in the same group produces, which would otherwise be a
/// dependency cycle.
#[derive(Clone, Debug, Default)]
pub(crate) struct Forwarding {
    pairs: Vec<(BufferHandle, BufferHandle)>,
}

impl Forwarding {
    pub fn bind(store: &BufferStore, pairs: &[(String, String)]) -> Result<Self, StoreError> {
        let pairs = pairs
            .iter()
            .map(|(target, source)| Ok((store.handle(target)?, store.handle(source)?)))
            .collect::<Result<_, StoreError>>()?;
        Ok(Self { pairs })
    }

    pub fn apply(&self, store: &mut BufferStore) -> Result<(), StoreError> {
        for &(target, source) in &self.pairs {
            let (src, dst) = store.read_write(source, target)?;
            dst.assign(src);
        }
        Ok(())
    }
}
