use faer::{linalg::matmul::matmul, prelude::*};

use crate::{
    Dataset, Error,
    core::{Cache, Parameters},
};

fn check_backward_shapes(data: &Dataset, params: &Parameters, cache: &Cache) -> Result<(), Error> {
    if cache.layer_sizes() != params.layer_sizes() {
        return Err(Error::shape_mismatch(
            format!("a cache for topology {:?}", params.layer_sizes()),
            format!("{:?}", cache.layer_sizes()),
        ));
    }
    if data.n_x() != params.n_x() || data.n_y() != params.n_y() || data.m() != cache.m() {
        return Err(Error::shape_mismatch(
            format!(
                "data with n_x = {}, n_y = {}, m = {}",
                params.n_x(),
                params.n_y(),
                cache.m()
            ),
            format!(
                "n_x = {}, n_y = {}, m = {}",
                data.n_x(),
                data.n_y(),
                data.m()
            ),
        ));
    }
    Ok(())
}

/// Seed the backward accumulators at the output layer with the residuals:
/// `dA = A - Y`, and `dA' = A' - J` when a Jacobian target exists (zero
/// otherwise, which switches the enhancement term off for the whole pass).
fn last_layer_backward(cache: &mut Cache, data: &Dataset) {
    let l = cache.n_layers() - 1;
    zip!(&mut cache.da[l], &cache.a[l], data.y()).for_each(|unzip!(da, a, y)| *da = *a - *y);
    match data.partials() {
        Some(j) => {
            for (jdx, da_prime_j) in cache.da_prime[l].iter_mut().enumerate() {
                zip!(da_prime_j.as_mut(), cache.a_prime[l][jdx].as_ref(), j[jdx].as_ref())
                    .for_each(|unzip!(d, a, j)| *d = *a - *j);
            }
        }
        None => {
            for da_prime_j in cache.da_prime[l].iter_mut() {
                da_prime_j.as_mut().fill(0.0);
            }
        }
    }
}

/// Ordinary mean-squared-error backprop through one layer, with L2 weight
/// regularization:
///
/// `dW = (G' ⊙ dA) A_prevᵀ / m + (lambd / m) W`
/// `db = sum_batch(G' ⊙ dA) / m`
/// `dA_prev = Wᵀ (G' ⊙ dA)`
fn next_layer_backward(
    layer: usize,
    params: &mut Parameters,
    cache: &mut Cache,
    m: f64,
    lambd: f64,
) {
    let r = layer;
    let s = layer - 1;
    let mut p = params.layer_mut(r).unwrap();
    p.phi.first_derivative(
        cache.z[r].as_ref(),
        cache.a[r].as_ref(),
        cache.g_prime[r].as_mut(),
    );
    zip!(&mut cache.delta[r], &cache.g_prime[r], &cache.da[r])
        .for_each(|unzip!(d, g, da)| *d = *g * *da);
    let delta = &cache.delta[r];
    matmul(
        p.dw.rb_mut(),
        faer::Accum::Replace,
        delta.as_ref(),
        cache.a[s].as_ref().transpose(),
        1.0 / m,
        Par::Seq,
    );
    zip!(p.dw.rb_mut(), p.w.rb()).for_each(|unzip!(dw, w)| *dw += lambd / m * *w);
    for i in 0..p.n {
        let mut sum = 0.0;
        for c in 0..delta.ncols() {
            sum += delta[(i, c)];
        }
        p.db[i] = sum / m;
    }
    let [da_prev, _] = cache.da.get_disjoint_mut([s, r]).unwrap();
    matmul(
        da_prev.as_mut(),
        faer::Accum::Replace,
        p.w.rb().transpose(),
        delta.as_ref(),
        1.0,
        Par::Seq,
    );
}

/// The Jacobian-matching correction for one layer: backpropagation through
/// the forward-mode computation of [`model_partials_forward`].
///
/// Two chain-rule paths exist from the Jacobian loss to this layer's
/// parameters: through the activation's second derivative (the dependence of
/// `G'` on `z`) and through the first derivative (the dependence of `z'` on
/// the previous layer's Jacobian). Per input coordinate j:
///
/// `dW += gamma/m [ (dA'_j ⊙ G'' ⊙ Z'_j) A_prevᵀ + (dA'_j ⊙ G') A'_prev_jᵀ ]`
/// `db += gamma/m sum_batch(dA'_j ⊙ G'' ⊙ Z'_j)`
/// `dA_prev += gamma Wᵀ (dA'_j ⊙ G'' ⊙ Z'_j)`
/// `dA'_prev_j = Wᵀ (dA'_j ⊙ G')`
///
/// `dA'` carries the raw Jacobian residual adjoint; `gamma` is applied once,
/// at each consumption point (the `dW`/`db` corrections and the `dA` cross
/// term). Baking it into `dA'_prev_j` as well would compound it once per
/// layer. `dA_prev` accumulates on top of the ordinary-loss contribution
/// written by [`next_layer_backward`], and must do so before the next
/// (lower) layer's Stage A consumes it; `dA'_prev_j` is overwritten. Skipped entirely when
/// `gamma` is zero, which makes `model_backward` recover plain backprop
/// exactly.
fn gradient_enhancement(
    layer: usize,
    params: &mut Parameters,
    cache: &mut Cache,
    m: f64,
    gamma: f64,
) {
    if gamma == 0.0 {
        return;
    }
    let r = layer;
    let s = layer - 1;
    let mut p = params.layer_mut(r).unwrap();
    p.phi.second_derivative(
        cache.z[r].as_ref(),
        cache.a[r].as_ref(),
        cache.g_prime[r].as_ref(),
        cache.g_second[r].as_mut(),
    );
    let (head, tail) = cache.da_prime.split_at_mut(r);
    let da_prime_prev = &mut head[s];
    let da_prime = &tail[0];
    let [da_prev, _] = cache.da.get_disjoint_mut([s, r]).unwrap();
    let a_prev = &cache.a[s];
    let a_prime_prev = &cache.a_prime[s];
    let z_prime = &cache.z_prime[r];
    let g_prime = &cache.g_prime[r];
    let g_second = &cache.g_second[r];
    let delta = &mut cache.delta[r];
    let n_x = a_prime_prev.len();
    for j in 0..n_x {
        // Second-derivative path.
        zip!(delta.as_mut(), da_prime[j].as_ref(), g_second.as_ref(), z_prime[j].as_ref())
            .for_each(|unzip!(d, dap, g2, zp)| *d = *dap * *g2 * *zp);
        matmul(
            p.dw.rb_mut(),
            faer::Accum::Add,
            delta.as_ref(),
            a_prev.as_ref().transpose(),
            gamma / m,
            Par::Seq,
        );
        for i in 0..p.n {
            let mut sum = 0.0;
            for c in 0..delta.ncols() {
                sum += delta[(i, c)];
            }
            p.db[i] += gamma / m * sum;
        }
        matmul(
            da_prev.as_mut(),
            faer::Accum::Add,
            p.w.rb().transpose(),
            delta.as_ref(),
            gamma,
            Par::Seq,
        );
        // First-derivative path.
        zip!(delta.as_mut(), da_prime[j].as_ref(), g_prime.as_ref())
            .for_each(|unzip!(d, dap, g)| *d = *dap * *g);
        matmul(
            p.dw.rb_mut(),
            faer::Accum::Add,
            delta.as_ref(),
            a_prime_prev[j].as_ref().transpose(),
            gamma / m,
            Par::Seq,
        );
        matmul(
            da_prime_prev[j].as_mut(),
            faer::Accum::Replace,
            p.w.rb().transpose(),
            delta.as_ref(),
            1.0,
            Par::Seq,
        );
    }
}

/// Propagate backward through all layers, writing parameter gradients into
/// the store's `dW`/`db` accumulators in place.
///
/// The cache must have been filled by [`model_partials_forward`] for the
/// same inputs (or [`model_forward`] when `gamma` is zero and the dataset
/// carries no Jacobian target). `lambd` scales the L2 regularization term,
/// `gamma` the Jacobian-matching term; both gradients are means over the
/// batch. Layer 0 is fixed and never receives gradients.
///
/// [`model_forward`]: crate::core::model_forward
/// [`model_partials_forward`]: crate::core::model_partials_forward
pub fn model_backward(
    data: &Dataset,
    params: &mut Parameters,
    cache: &mut Cache,
    lambd: f64,
    gamma: f64,
) -> Result<(), Error> {
    check_backward_shapes(data, params, cache)?;
    let m = data.m() as f64;
    last_layer_backward(cache, data);
    for layer in (1..params.n_layers()).rev() {
        next_layer_backward(layer, params, cache, m, lambd);
        // Must run before the next iteration reads dA/dA' of layer - 1.
        gradient_enhancement(layer, params, cache, m, gamma);
    }
    Ok(())
}
