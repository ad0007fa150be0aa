use faer::{linalg::matmul::matmul, prelude::*};
use rayon::prelude::*;

use crate::{
    Error,
    core::{Cache, Parameters},
};

fn check_forward_shapes(x: MatRef<f64>, params: &Parameters, cache: &Cache) -> Result<(), Error> {
    if cache.layer_sizes() != params.layer_sizes() {
        return Err(Error::shape_mismatch(
            format!("a cache for topology {:?}", params.layer_sizes()),
            format!("{:?}", cache.layer_sizes()),
        ));
    }
    if x.nrows() != params.n_x() || x.ncols() != cache.m() {
        return Err(Error::shape_mismatch(
            format!("inputs of shape {}x{}", params.n_x(), cache.m()),
            format!("{}x{}", x.nrows(), x.ncols()),
        ));
    }
    Ok(())
}

/// The input layer is identity: its activations are the raw inputs.
fn first_layer_forward(x: MatRef<f64>, cache: &mut Cache) {
    cache.a[0].as_mut().copy_from(x);
}

/// Seed `dx/dx`: the Jacobian of the input layer is the identity,
/// broadcast across the batch.
fn first_layer_partials(cache: &mut Cache) {
    for (j, a_prime_j) in cache.a_prime[0].iter_mut().enumerate() {
        a_prime_j.as_mut().fill(0.0);
        for c in 0..a_prime_j.ncols() {
            a_prime_j[(j, c)] = 1.0;
        }
    }
}

/// `z = W a_prev + b; a = phi(z)`, in place for one layer.
fn next_layer_forward(layer: usize, params: &Parameters, cache: &mut Cache) {
    let r = layer;
    let s = layer - 1;
    let p = params.layer(r).unwrap();
    let [a_prev, a] = cache.a.get_disjoint_mut([s, r]).unwrap();
    matmul(
        cache.z[r].as_mut(),
        faer::Accum::Replace,
        p.w,
        a_prev.as_ref(),
        1.0,
        Par::Seq,
    );
    let z = &mut cache.z[r];
    for c in 0..z.ncols() {
        for i in 0..z.nrows() {
            z[(i, c)] += p.b[i];
        }
    }
    p.phi.evaluate(z.as_ref(), a.as_mut());
}

/// Forward-mode step for one layer: for every input coordinate j,
/// `z'_j = W a'_prev_j; a'_j = phi'(z) ⊙ z'_j`.
///
/// The iterations over j are independent, so they run in parallel; the layer
/// loop itself is strictly sequential.
fn next_layer_partials(layer: usize, params: &Parameters, cache: &mut Cache) {
    let r = layer;
    let s = layer - 1;
    let p = params.layer(r).unwrap();
    p.phi.first_derivative(
        cache.z[r].as_ref(),
        cache.a[r].as_ref(),
        cache.g_prime[r].as_mut(),
    );
    let (head, tail) = cache.a_prime.split_at_mut(r);
    let a_prime_prev = &head[s];
    let a_prime = &mut tail[0];
    let z_prime = &mut cache.z_prime[r];
    let g_prime = &cache.g_prime[r];
    let w = p.w;
    z_prime
        .par_iter_mut()
        .zip(a_prime.par_iter_mut())
        .zip(a_prime_prev.par_iter())
        .for_each(|((z_prime_j, a_prime_j), a_prime_prev_j)| {
            matmul(
                z_prime_j.as_mut(),
                faer::Accum::Replace,
                w,
                a_prime_prev_j.as_ref(),
                1.0,
                Par::Seq,
            );
            zip!(a_prime_j.as_mut(), g_prime.as_ref(), z_prime_j.as_ref())
                .for_each(|unzip!(a, g, z)| *a = *g * *z);
        });
}

/// Propagate forward to predict the response.
///
/// Fills the cache in place and returns a view of the output-layer
/// activations, shape (n_y, m).
pub fn model_forward<'a>(
    x: MatRef<f64>,
    params: &Parameters,
    cache: &'a mut Cache,
) -> Result<MatRef<'a, f64>, Error> {
    check_forward_shapes(x, params, cache)?;
    first_layer_forward(x, cache);
    for layer in 1..params.n_layers() {
        next_layer_forward(layer, params, cache);
    }
    Ok(cache.response())
}

/// Propagate forward to predict the response and its Jacobian.
///
/// Returns the output-layer activations and, per input coordinate j, the
/// (n_y, m) matrix of partials d(y)/d(x_j). The extra factor-n_x cost over
/// [`model_forward`] is the price of forward-mode differentiation with
/// respect to every input simultaneously.
pub fn model_partials_forward<'a>(
    x: MatRef<f64>,
    params: &Parameters,
    cache: &'a mut Cache,
) -> Result<(MatRef<'a, f64>, &'a [Mat<f64>]), Error> {
    check_forward_shapes(x, params, cache)?;
    first_layer_forward(x, cache);
    first_layer_partials(cache);
    for layer in 1..params.n_layers() {
        next_layer_forward(layer, params, cache);
        next_layer_partials(layer, params, cache);
    }
    let cache = &*cache;
    Ok((cache.response(), cache.partials()))
}

/// Propagate forward to predict the Jacobian only.
pub fn partials_forward<'a>(
    x: MatRef<f64>,
    params: &Parameters,
    cache: &'a mut Cache,
) -> Result<&'a [Mat<f64>], Error> {
    Ok(model_partials_forward(x, params, cache)?.1)
}
