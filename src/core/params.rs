use std::{iter, ptr::NonNull};

use faer::prelude::*;
use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{Activation, ColPtr, Error, MatPtr};

#[derive(Clone, Copy)]
pub(crate) struct LayerRaw {
    pub(crate) n: usize,
    pub(crate) n_previous: usize,
    pub(crate) w: MatPtr<f64>,
    pub(crate) b: ColPtr<f64>,
    pub(crate) dw: MatPtr<f64>,
    pub(crate) db: ColPtr<f64>,
    pub(crate) phi: Activation,
}

impl LayerRaw {
    /// # Safety
    ///
    /// - must satisfy aliasing rules of `&` references
    pub(crate) unsafe fn as_ref<'a>(self) -> LayerRef<'a> {
        unsafe {
            LayerRef {
                n: self.n,
                n_previous: self.n_previous,
                w: self.w.as_mat_ref(),
                b: self.b.as_col_ref(),
                dw: self.dw.as_mat_ref(),
                db: self.db.as_col_ref(),
                phi: self.phi,
            }
        }
    }

    /// # Safety
    ///
    /// - must satisfy aliasing rules of `&mut` references
    pub(crate) unsafe fn as_mut<'a>(self) -> LayerMut<'a> {
        unsafe {
            LayerMut {
                n: self.n,
                n_previous: self.n_previous,
                w: self.w.as_mat_mut(),
                b: self.b.as_col_mut(),
                dw: self.dw.as_mat_mut(),
                db: self.db.as_col_mut(),
                phi: self.phi,
            }
        }
    }
}

/// Immutable view of one layer's parameters and gradient accumulators.
#[derive(Debug, Clone, Copy)]
pub struct LayerRef<'a> {
    /// Number of neurons in this layer.
    pub n: usize,
    /// Number of neurons in the previous layer.
    pub n_previous: usize,
    pub w: MatRef<'a, f64>,
    pub b: ColRef<'a, f64>,
    pub dw: MatRef<'a, f64>,
    pub db: ColRef<'a, f64>,
    pub phi: Activation,
}

/// Mutable view of one layer's parameters and gradient accumulators.
#[derive(Debug)]
pub struct LayerMut<'a> {
    /// Number of neurons in this layer.
    pub n: usize,
    /// Number of neurons in the previous layer.
    pub n_previous: usize,
    pub w: MatMut<'a, f64>,
    pub b: ColMut<'a, f64>,
    pub dw: MatMut<'a, f64>,
    pub db: ColMut<'a, f64>,
    pub phi: Activation,
}

/// Every trainable quantity of the network, in one flat buffer.
///
/// The buffer holds two sections with identical per-layer layout:
/// `[W0, b0, W1, b1, ... | dW0, db0, dW1, db1, ...]`, matrices row-major,
/// the input layer included (its weight is the fixed identity). The params
/// section *is* the stacked vector the optimizer manipulates, so
/// [`stack`](Self::stack)/[`unstack`](Self::unstack) round-trip bit-for-bit
/// by construction.
///
/// Normalization statistics of the training data ride along so that a saved
/// parameter set is self-contained for prediction.
pub struct Parameters {
    layer_sizes: Vec<usize>,
    activations: Vec<Activation>,
    layers: Box<[LayerRaw]>,
    grads_start: usize,
    buffer: Box<[f64]>,
    mu_x: Col<f64>,
    sigma_x: Col<f64>,
    mu_y: Col<f64>,
    sigma_y: Col<f64>,
}

unsafe impl Send for Parameters {}
unsafe impl Sync for Parameters {}

impl Parameters {
    /// Records the topology and activation assignment and allocates zeroed
    /// storage (input-layer identity included). Weights stay zero until
    /// [`initialize`](Self::initialize) draws them.
    pub fn new(
        layer_sizes: &[usize],
        hidden_activation: Activation,
        output_activation: Activation,
    ) -> Result<Self, Error> {
        let n_layers = layer_sizes.len();
        if n_layers < 2 {
            return Err(Error::shape_mismatch(
                "a topology with at least 2 layers",
                format!("{n_layers} layers"),
            ));
        }
        let mut activations = Vec::with_capacity(n_layers);
        activations.push(Activation::Linear);
        for i in 1..n_layers {
            activations.push(if i == n_layers - 1 {
                output_activation
            } else {
                hidden_activation
            });
        }
        Self::from_topology(layer_sizes.to_vec(), activations)
    }

    fn from_topology(layer_sizes: Vec<usize>, activations: Vec<Activation>) -> Result<Self, Error> {
        if layer_sizes.iter().any(|&n| n == 0) {
            return Err(Error::shape_mismatch(
                "non-empty layers",
                format!("{layer_sizes:?}"),
            ));
        }
        let grads_start = {
            let mut n_floats = 0usize;
            let mut n_previous = layer_sizes[0];
            for &n in &layer_sizes {
                n_floats += n * n_previous; // w
                n_floats += n; // b
                n_previous = n;
            }
            n_floats
        };
        let buffer: Box<[f64]> = bytemuck::zeroed_slice_box(2 * grads_start);
        let buffer_ptr = NonNull::from_ref(&buffer[0]);
        let layers: Box<[LayerRaw]> = {
            let mut layers = Vec::with_capacity(layer_sizes.len());
            let mut n_previous = layer_sizes[0];
            let mut counter = 0usize;
            for (&n, &phi) in iter::zip(&layer_sizes, &activations) {
                let offset_w = counter;
                let offset_b = counter + n * n_previous;
                counter = offset_b + n;
                // Safety: both sections end within the buffer, so all offsets
                // stay in bounds.
                unsafe {
                    layers.push(LayerRaw {
                        n,
                        n_previous,
                        w: MatPtr::with_offset(buffer_ptr, offset_w, n, n_previous),
                        b: ColPtr::with_offset(buffer_ptr, offset_b, n),
                        dw: MatPtr::with_offset(buffer_ptr, grads_start + offset_w, n, n_previous),
                        db: ColPtr::with_offset(buffer_ptr, grads_start + offset_b, n),
                        phi,
                    });
                }
                n_previous = n;
            }
            layers.into_boxed_slice()
        };
        let n_x = layer_sizes[0];
        let n_y = layer_sizes[layer_sizes.len() - 1];
        let mut this = Self {
            layer_sizes,
            activations,
            layers,
            grads_start,
            buffer,
            mu_x: Col::zeros(n_x),
            sigma_x: Col::from_fn(n_x, |_| 1.0),
            mu_y: Col::zeros(n_y),
            sigma_y: Col::from_fn(n_y, |_| 1.0),
        };
        this.write_input_layer();
        Ok(this)
    }

    /// The input layer is the fixed identity: never trained, never touched by
    /// the backward pass.
    fn write_input_layer(&mut self) {
        // Safety: index 0 exists, topology has >= 2 layers.
        let mut layer = unsafe { self.layer_unchecked_mut(0) };
        layer.w.fill(0.0);
        layer.b.fill(0.0);
        for i in 0..layer.n {
            layer.w[(i, i)] = 1.0;
        }
    }

    /// Variance-scaled normal draws (`N(0, 1) * sqrt(1 / fan_in)`) for the
    /// trainable weights; biases, gradient accumulators, and normalization
    /// statistics reset. Deterministic given a seed.
    pub fn initialize(&mut self, seed: Option<u64>) {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        bytemuck::fill_zeroes(&mut self.buffer);
        self.write_input_layer();
        for u in 1..self.n_layers() {
            // Safety: `u` is in range.
            let mut layer = unsafe { self.layer_unchecked_mut(u) };
            let scale = (1.0 / layer.n_previous as f64).sqrt();
            for i in 0..layer.n {
                for g in 0..layer.n_previous {
                    let draw: f64 = rng.sample(StandardNormal);
                    layer.w[(i, g)] = draw * scale;
                }
            }
        }
        self.mu_x.as_mut().fill(0.0);
        self.sigma_x.as_mut().fill(1.0);
        self.mu_y.as_mut().fill(0.0);
        self.sigma_y.as_mut().fill(1.0);
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    /// Number of layers, input layer included.
    pub fn n_layers(&self) -> usize {
        self.layer_sizes.len()
    }

    /// Number of inputs.
    pub fn n_x(&self) -> usize {
        self.layer_sizes[0]
    }

    /// Number of outputs.
    pub fn n_y(&self) -> usize {
        self.layer_sizes[self.layer_sizes.len() - 1]
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    pub fn mu_x(&self) -> ColRef<'_, f64> {
        self.mu_x.as_ref()
    }

    pub fn sigma_x(&self) -> ColRef<'_, f64> {
        self.sigma_x.as_ref()
    }

    pub fn mu_y(&self) -> ColRef<'_, f64> {
        self.mu_y.as_ref()
    }

    pub fn sigma_y(&self) -> ColRef<'_, f64> {
        self.sigma_y.as_ref()
    }

    /// Adopt the normalization statistics of a training dataset.
    pub fn set_normalization(
        &mut self,
        mu_x: ColRef<f64>,
        sigma_x: ColRef<f64>,
        mu_y: ColRef<f64>,
        sigma_y: ColRef<f64>,
    ) -> Result<(), Error> {
        if mu_x.nrows() != self.n_x()
            || sigma_x.nrows() != self.n_x()
            || mu_y.nrows() != self.n_y()
            || sigma_y.nrows() != self.n_y()
        {
            return Err(Error::shape_mismatch(
                format!("statistics of lengths {} and {}", self.n_x(), self.n_y()),
                format!(
                    "{}, {}, {}, {}",
                    mu_x.nrows(),
                    sigma_x.nrows(),
                    mu_y.nrows(),
                    sigma_y.nrows()
                ),
            ));
        }
        self.mu_x.as_mut().copy_from(mu_x);
        self.sigma_x.as_mut().copy_from(sigma_x);
        self.mu_y.as_mut().copy_from(mu_y);
        self.sigma_y.as_mut().copy_from(sigma_y);
        Ok(())
    }

    /// # Safety
    ///
    /// - `index` must be in range.
    #[inline(always)]
    #[cfg_attr(debug_assertions, track_caller)]
    pub unsafe fn layer_unchecked(&self, index: usize) -> LayerRef<'_> {
        debug_assert!(index < self.n_layers());
        // Safety: function's safety contract.
        let layer_raw = unsafe { self.layers.get_unchecked(index) };
        // Safety: self would be & borrowed for the duration that the layer lives outside.
        unsafe { layer_raw.as_ref() }
    }

    /// # Safety
    ///
    /// - `index` must be in range.
    #[inline(always)]
    #[cfg_attr(debug_assertions, track_caller)]
    pub unsafe fn layer_unchecked_mut(&mut self, index: usize) -> LayerMut<'_> {
        debug_assert!(index < self.n_layers());
        // Safety: function's safety contract.
        let layer_raw = unsafe { self.layers.get_unchecked(index) };
        // Safety: self would be &mut borrowed for the duration that layer lives outside.
        unsafe { layer_raw.as_mut() }
    }

    /// Get an immutable view of a layer.
    /// Returns `None` if `index` is out of range.
    #[track_caller]
    pub fn layer(&self, index: usize) -> Option<LayerRef<'_>> {
        if index < self.n_layers() {
            // Safety: index is in range.
            Some(unsafe { self.layer_unchecked(index) })
        } else {
            None
        }
    }

    /// Get a mutable view of a layer.
    /// Returns `None` if `index` is out of range.
    #[track_caller]
    pub fn layer_mut(&mut self, index: usize) -> Option<LayerMut<'_>> {
        if index < self.n_layers() {
            // Safety: index is in range.
            Some(unsafe { self.layer_unchecked_mut(index) })
        } else {
            None
        }
    }

    /// Floats in one section of the buffer, i.e. the length of the stacked
    /// parameter vector.
    pub fn n_stacked(&self) -> usize {
        self.grads_start
    }

    fn layer_stack_len(&self, index: usize) -> usize {
        let raw = &self.layers[index];
        raw.n * raw.n_previous + raw.n
    }

    fn stack_section(&self, section: &[f64]) -> Col<f64> {
        ColRef::from_slice(section).to_owned()
    }

    fn stack_section_per_layer(&self, section: &[f64]) -> Vec<Col<f64>> {
        let mut stacks = Vec::with_capacity(self.n_layers());
        let mut k = 0usize;
        for index in 0..self.n_layers() {
            let len = self.layer_stack_len(index);
            stacks.push(ColRef::from_slice(&section[k..k + len]).to_owned());
            k += len;
        }
        stacks
    }

    fn check_stacked_len(&self, values: ColRef<f64>) -> Result<(), Error> {
        if values.nrows() != self.grads_start {
            return Err(Error::shape_mismatch(
                format!("{} stacked values", self.grads_start),
                format!("{}", values.nrows()),
            ));
        }
        Ok(())
    }

    /// The canonical flattened parameter vector: for each layer in order,
    /// row-major `W` then `b`. Copy semantics; the result aliases nothing.
    pub fn stack(&self) -> Col<f64> {
        self.stack_section(&self.buffer[..self.grads_start])
    }

    /// Same as [`stack`](Self::stack), one column per layer.
    pub fn stack_per_layer(&self) -> Vec<Col<f64>> {
        self.stack_section_per_layer(&self.buffer[..self.grads_start])
    }

    /// In-place write-back of a stacked parameter vector. Existing layer
    /// views stay valid; the storage is never reallocated.
    pub fn unstack(&mut self, values: ColRef<f64>) -> Result<(), Error> {
        self.check_stacked_len(values)?;
        for k in 0..self.grads_start {
            self.buffer[k] = values[k];
        }
        Ok(())
    }

    /// In-place write-back from one column per layer.
    pub fn unstack_per_layer(&mut self, values: &[Col<f64>]) -> Result<(), Error> {
        self.check_per_layer(values)?;
        let mut k = 0usize;
        for column in values {
            for i in 0..column.nrows() {
                self.buffer[k] = column[i];
                k += 1;
            }
        }
        Ok(())
    }

    fn check_per_layer(&self, values: &[Col<f64>]) -> Result<(), Error> {
        if values.len() != self.n_layers() {
            return Err(Error::shape_mismatch(
                format!("{} layer columns", self.n_layers()),
                format!("{}", values.len()),
            ));
        }
        for (index, column) in values.iter().enumerate() {
            let expected = self.layer_stack_len(index);
            if column.nrows() != expected {
                return Err(Error::shape_mismatch(
                    format!("{expected} values for layer {index}"),
                    format!("{}", column.nrows()),
                ));
            }
        }
        Ok(())
    }

    /// Flattened gradient accumulators `dW`, `db`, same layout as
    /// [`stack`](Self::stack).
    pub fn stack_partials(&self) -> Col<f64> {
        self.stack_section(&self.buffer[self.grads_start..])
    }

    /// Same as [`stack_partials`](Self::stack_partials), one column per layer.
    pub fn stack_partials_per_layer(&self) -> Vec<Col<f64>> {
        self.stack_section_per_layer(&self.buffer[self.grads_start..])
    }

    /// In-place write-back of a stacked gradient vector.
    pub fn unstack_partials(&mut self, values: ColRef<f64>) -> Result<(), Error> {
        self.check_stacked_len(values)?;
        for k in 0..self.grads_start {
            self.buffer[self.grads_start + k] = values[k];
        }
        Ok(())
    }

    /// In-place write-back of gradients from one column per layer.
    pub fn unstack_partials_per_layer(&mut self, values: &[Col<f64>]) -> Result<(), Error> {
        self.check_per_layer(values)?;
        let mut k = self.grads_start;
        for column in values {
            for i in 0..column.nrows() {
                self.buffer[k] = column[i];
                k += 1;
            }
        }
        Ok(())
    }
}

fn mat_to_rows(values: MatRef<f64>) -> Vec<Vec<f64>> {
    (0..values.nrows())
        .map(|i| (0..values.ncols()).map(|c| values[(i, c)]).collect())
        .collect()
}

fn col_to_rows(values: ColRef<f64>) -> Vec<Vec<f64>> {
    (0..values.nrows()).map(|i| vec![values[i]]).collect()
}

fn rows_to_col(rows: &[Vec<f64>], what: &str) -> Result<Col<f64>, Error> {
    for row in rows {
        if row.len() != 1 {
            return Err(Error::malformed(format!("{what} must be a column vector")));
        }
    }
    Ok(Col::from_fn(rows.len(), |i| rows[i][0]))
}

/// On-disk schema. Mirrors the in-memory store field for field, numeric
/// arrays in row-major nested form.
#[derive(Serialize, Deserialize)]
struct SavedParameters {
    #[serde(rename = "W")]
    w: Vec<Vec<Vec<f64>>>,
    b: Vec<Vec<Vec<f64>>>,
    a: Vec<String>,
    #[serde(rename = "dW")]
    dw: Vec<Vec<Vec<f64>>>,
    db: Vec<Vec<Vec<f64>>>,
    mu_x: Vec<Vec<f64>>,
    mu_y: Vec<Vec<f64>>,
    sigma_x: Vec<Vec<f64>>,
    sigma_y: Vec<Vec<f64>>,
}

impl Parameters {
    /// Self-describing JSON encoding of the full store.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut saved = SavedParameters {
            w: Vec::with_capacity(self.n_layers()),
            b: Vec::with_capacity(self.n_layers()),
            a: self.activations.iter().map(|phi| phi.name().to_owned()).collect(),
            dw: Vec::with_capacity(self.n_layers()),
            db: Vec::with_capacity(self.n_layers()),
            mu_x: col_to_rows(self.mu_x.as_ref()),
            mu_y: col_to_rows(self.mu_y.as_ref()),
            sigma_x: col_to_rows(self.sigma_x.as_ref()),
            sigma_y: col_to_rows(self.sigma_y.as_ref()),
        };
        for index in 0..self.n_layers() {
            // Safety: index is in range.
            let layer = unsafe { self.layer_unchecked(index) };
            saved.w.push(mat_to_rows(layer.w));
            saved.b.push(col_to_rows(layer.b));
            saved.dw.push(mat_to_rows(layer.dw));
            saved.db.push(col_to_rows(layer.db));
        }
        serde_json::to_vec(&saved).map_err(|e| Error::malformed(e.to_string()))
    }

    /// Rebuilds a store from [`serialize`](Self::serialize) output. The
    /// topology and activation assignment are re-derived from the saved
    /// shapes; everything is validated before any storage is filled, and a
    /// fresh store is returned so a failure never leaves a live one half
    /// mutated.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let saved: SavedParameters =
            serde_json::from_slice(bytes).map_err(|e| Error::malformed(e.to_string()))?;
        let n_layers = saved.w.len();
        if n_layers < 2 {
            return Err(Error::malformed(format!(
                "expected at least 2 layers, found {n_layers}"
            )));
        }
        if saved.b.len() != n_layers
            || saved.a.len() != n_layers
            || saved.dw.len() != n_layers
            || saved.db.len() != n_layers
        {
            return Err(Error::malformed(format!(
                "inconsistent layer counts: W: {}, b: {}, a: {}, dW: {}, db: {}",
                saved.w.len(),
                saved.b.len(),
                saved.a.len(),
                saved.dw.len(),
                saved.db.len()
            )));
        }
        let layer_sizes: Vec<usize> = saved.w.iter().map(|w| w.len()).collect();
        let mut activations = Vec::with_capacity(n_layers);
        for name in &saved.a {
            activations.push(name.parse::<Activation>()?);
        }
        // Validate every shape against the derived topology before building.
        let mut n_previous = layer_sizes[0];
        for (index, &n) in layer_sizes.iter().enumerate() {
            if n == 0 {
                return Err(Error::malformed(format!("layer {index} is empty")));
            }
            for rows in [&saved.w[index], &saved.dw[index]] {
                for row in rows.iter() {
                    if row.len() != n_previous {
                        return Err(Error::malformed(format!(
                            "layer {index} weights must be {n}x{n_previous}"
                        )));
                    }
                }
            }
            if saved.dw[index].len() != n
                || saved.b[index].len() != n
                || saved.db[index].len() != n
                || saved.b[index].iter().any(|row| row.len() != 1)
                || saved.db[index].iter().any(|row| row.len() != 1)
            {
                return Err(Error::malformed(format!(
                    "layer {index} biases and gradients must match a {n}-neuron layer"
                )));
            }
            n_previous = n;
        }
        let n_x = layer_sizes[0];
        let n_y = layer_sizes[n_layers - 1];
        let mu_x = rows_to_col(&saved.mu_x, "mu_x")?;
        let mu_y = rows_to_col(&saved.mu_y, "mu_y")?;
        let sigma_x = rows_to_col(&saved.sigma_x, "sigma_x")?;
        let sigma_y = rows_to_col(&saved.sigma_y, "sigma_y")?;
        if mu_x.nrows() != n_x || sigma_x.nrows() != n_x {
            return Err(Error::malformed(format!(
                "input statistics must have {n_x} rows"
            )));
        }
        if mu_y.nrows() != n_y || sigma_y.nrows() != n_y {
            return Err(Error::malformed(format!(
                "output statistics must have {n_y} rows"
            )));
        }
        let mut this = Self::from_topology(layer_sizes, activations)
            .map_err(|e| Error::malformed(e.to_string()))?;
        for index in 0..this.n_layers() {
            // Safety: index is in range.
            let mut layer = unsafe { this.layer_unchecked_mut(index) };
            for i in 0..layer.n {
                for g in 0..layer.n_previous {
                    layer.w[(i, g)] = saved.w[index][i][g];
                    layer.dw[(i, g)] = saved.dw[index][i][g];
                }
                layer.b[i] = saved.b[index][i][0];
                layer.db[i] = saved.db[index][i][0];
            }
        }
        this.mu_x = mu_x;
        this.mu_y = mu_y;
        this.sigma_x = sigma_x;
        this.sigma_y = sigma_y;
        Ok(this)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_col_eq(lhs: &Col<f64>, rhs: &Col<f64>) {
        assert_eq!(lhs.nrows(), rhs.nrows());
        for k in 0..lhs.nrows() {
            assert_eq!(lhs[k], rhs[k], "mismatch at index {k}");
        }
    }

    #[test]
    fn input_layer_is_identity_and_stack_is_row_major() {
        let params = Parameters::new(&[2, 2, 1], Activation::Tanh, Activation::Linear).unwrap();
        let stacked = params.stack();
        // Layer 0: 2x2 identity row-major, then zero bias.
        assert_eq!(
            (0..6).map(|k| stacked[k]).collect::<Vec<_>>(),
            [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn stack_unstack_round_trips_bit_for_bit() {
        let mut params = Parameters::new(&[3, 5, 2], Activation::Tanh, Activation::Linear).unwrap();
        params.initialize(Some(7));
        let stacked = params.stack();
        params.unstack(stacked.as_ref()).unwrap();
        assert_col_eq(&params.stack(), &stacked);

        // Same vector regardless of representation.
        let per_layer = params.stack_per_layer();
        let total: usize = per_layer.iter().map(Col::nrows).sum();
        assert_eq!(total, stacked.nrows());
        params.unstack_per_layer(&per_layer).unwrap();
        assert_col_eq(&params.stack(), &stacked);
    }

    #[test]
    fn partials_round_trip() {
        let mut params = Parameters::new(&[2, 4, 1], Activation::Relu, Activation::Linear).unwrap();
        params.initialize(Some(0));
        {
            let mut layer = params.layer_mut(1).unwrap();
            layer.dw[(0, 1)] = 0.25;
            layer.db[2] = -1.5;
        }
        let partials = params.stack_partials();
        params.unstack_partials(partials.as_ref()).unwrap();
        assert_col_eq(&params.stack_partials(), &partials);
        let per_layer = params.stack_partials_per_layer();
        params.unstack_partials_per_layer(&per_layer).unwrap();
        assert_col_eq(&params.stack_partials(), &partials);
        assert_eq!(params.layer(1).unwrap().dw[(0, 1)], 0.25);
    }

    #[test]
    fn unstack_rejects_wrong_length() {
        let mut params = Parameters::new(&[2, 3, 1], Activation::Tanh, Activation::Linear).unwrap();
        let short = Col::<f64>::zeros(params.n_stacked() - 1);
        assert!(matches!(
            params.unstack(short.as_ref()),
            Err(Error::ShapeMismatch { .. })
        ));
        let columns = vec![Col::<f64>::zeros(1)];
        assert!(matches!(
            params.unstack_per_layer(&columns),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn unstack_preserves_external_views() {
        let mut params = Parameters::new(&[2, 3, 1], Activation::Tanh, Activation::Linear).unwrap();
        params.initialize(Some(3));
        let mut stacked = params.stack();
        for k in 0..stacked.nrows() {
            stacked[k] += 1.0;
        }
        params.unstack(stacked.as_ref()).unwrap();
        // Views read the written-through storage.
        assert_eq!(params.layer(0).unwrap().w[(0, 0)], 2.0);
    }

    #[test]
    fn initialize_is_deterministic_given_a_seed() {
        let mut lhs = Parameters::new(&[4, 8, 8, 2], Activation::Relu, Activation::Linear).unwrap();
        let mut rhs = Parameters::new(&[4, 8, 8, 2], Activation::Relu, Activation::Linear).unwrap();
        lhs.initialize(Some(99));
        rhs.initialize(Some(99));
        assert_col_eq(&lhs.stack(), &rhs.stack());
        rhs.initialize(Some(100));
        let l = lhs.stack();
        let r = rhs.stack();
        assert!((0..l.nrows()).any(|k| l[k] != r[k]));
    }

    #[test]
    fn serde_round_trip() {
        let mut params = Parameters::new(&[2, 3, 1], Activation::Tanh, Activation::Linear).unwrap();
        params.initialize(Some(11));
        params
            .set_normalization(
                Col::from_fn(2, |i| i as f64).as_ref(),
                Col::from_fn(2, |i| 1.0 + i as f64).as_ref(),
                Col::from_fn(1, |_| -0.5).as_ref(),
                Col::from_fn(1, |_| 2.0).as_ref(),
            )
            .unwrap();
        params.layer_mut(1).unwrap().dw[(2, 1)] = 0.125;

        let bytes = params.serialize().unwrap();
        let restored = Parameters::deserialize(&bytes).unwrap();
        assert_eq!(restored.layer_sizes(), params.layer_sizes());
        assert_eq!(restored.activations(), params.activations());
        assert_col_eq(&restored.stack(), &params.stack());
        assert_col_eq(&restored.stack_partials(), &params.stack_partials());
        assert_eq!(restored.mu_x()[1], 1.0);
        assert_eq!(restored.sigma_y()[0], 2.0);
    }

    #[test]
    fn deserialize_rederives_topology() {
        let mut params = Parameters::new(&[2, 5, 3], Activation::Relu, Activation::Tanh).unwrap();
        params.initialize(Some(5));
        let restored = Parameters::deserialize(&params.serialize().unwrap()).unwrap();
        assert_eq!(restored.layer_sizes(), &[2, 5, 3]);
        assert_eq!(
            restored.activations(),
            &[Activation::Linear, Activation::Relu, Activation::Tanh]
        );
    }

    #[test]
    fn deserialize_rejects_malformed_input() {
        assert!(matches!(
            Parameters::deserialize(b"not json"),
            Err(Error::MalformedPersistedState { .. })
        ));

        // Layer counts disagree between W and b.
        let bad = serde_json::json!({
            "W": [[[1.0]], [[0.5]]],
            "b": [[[0.0]]],
            "a": ["linear", "linear"],
            "dW": [[[0.0]], [[0.0]]],
            "db": [[[0.0]], [[0.0]]],
            "mu_x": [[0.0]],
            "mu_y": [[0.0]],
            "sigma_x": [[1.0]],
            "sigma_y": [[1.0]],
        });
        assert!(matches!(
            Parameters::deserialize(bad.to_string().as_bytes()),
            Err(Error::MalformedPersistedState { .. })
        ));
    }

    #[test]
    fn deserialize_rejects_unknown_activation() {
        let bad = serde_json::json!({
            "W": [[[1.0]], [[0.5]]],
            "b": [[[0.0]], [[0.0]]],
            "a": ["linear", "softplus"],
            "dW": [[[0.0]], [[0.0]]],
            "db": [[[0.0]], [[0.0]]],
            "mu_x": [[0.0]],
            "mu_y": [[0.0]],
            "sigma_x": [[1.0]],
            "sigma_y": [[1.0]],
        });
        assert!(matches!(
            Parameters::deserialize(bad.to_string().as_bytes()),
            Err(Error::UnknownActivation { .. })
        ));
    }
}
