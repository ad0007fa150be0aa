use faer::prelude::*;

/// Pre-allocated intermediate tensors for one forward + backward cycle.
///
/// All tensors are sized once, from the topology and the batch size `m`, and
/// the propagation engine only ever writes into them in place. A cache is
/// valid for exactly one `(layer_sizes, m)` pair; callers construct a new one
/// when the batch size changes.
///
/// Value tensors (`z`, `a`, `g_prime`, `g_second`, `da`, `delta`) are
/// (n_l, m) per layer. Jacobian tensors (`z_prime`, `a_prime`, `da_prime`)
/// hold one (n_l, m) matrix per input coordinate j, so `a_prime[l][j]` is
/// d(a_l)/d(x_j) across the batch.
pub struct Cache {
    layer_sizes: Vec<usize>,
    m: usize,
    /// Pre-activations. `z[0]` is never written (the input layer is identity).
    pub(crate) z: Vec<Mat<f64>>,
    /// Activations. `a[0]` is the raw input.
    pub(crate) a: Vec<Mat<f64>>,
    /// First activation derivative evaluated at `z`.
    pub(crate) g_prime: Vec<Mat<f64>>,
    /// Second activation derivative evaluated at `z`.
    pub(crate) g_second: Vec<Mat<f64>>,
    /// Pre-activation Jacobian, per input coordinate.
    pub(crate) z_prime: Vec<Vec<Mat<f64>>>,
    /// Activation Jacobian, per input coordinate.
    pub(crate) a_prime: Vec<Vec<Mat<f64>>>,
    /// Backward accumulator for d(loss)/d(a).
    pub(crate) da: Vec<Mat<f64>>,
    /// Backward accumulator for the Jacobian-matching loss, per input coordinate.
    pub(crate) da_prime: Vec<Vec<Mat<f64>>>,
    /// Scratch for `g_prime ⊙ da` and the enhancement products; keeps the
    /// backward pass allocation-free.
    pub(crate) delta: Vec<Mat<f64>>,
}

impl Cache {
    pub fn new(layer_sizes: &[usize], m: usize) -> Self {
        assert!(layer_sizes.len() >= 2);
        assert!(m != 0);
        let n_x = layer_sizes[0];
        let per_layer = |n: usize| Mat::<f64>::zeros(n, m);
        let per_partial = |n: usize| (0..n_x).map(|_| Mat::<f64>::zeros(n, m)).collect::<Vec<_>>();
        Self {
            layer_sizes: layer_sizes.to_vec(),
            m,
            z: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
            a: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
            g_prime: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
            g_second: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
            z_prime: layer_sizes.iter().map(|&n| per_partial(n)).collect(),
            a_prime: layer_sizes.iter().map(|&n| per_partial(n)).collect(),
            da: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
            da_prime: layer_sizes.iter().map(|&n| per_partial(n)).collect(),
            delta: layer_sizes.iter().map(|&n| per_layer(n)).collect(),
        }
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    /// Number of layers, input layer included.
    pub fn n_layers(&self) -> usize {
        self.layer_sizes.len()
    }

    /// Batch size this cache was sized for.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Output-layer activations, valid after a forward pass.
    pub fn response(&self) -> MatRef<'_, f64> {
        self.a[self.layer_sizes.len() - 1].as_ref()
    }

    /// Output-layer Jacobian, one (n_y, m) matrix per input coordinate,
    /// valid after a forward pass with partials.
    pub fn partials(&self) -> &[Mat<f64>] {
        &self.a_prime[self.layer_sizes.len() - 1]
    }
}
