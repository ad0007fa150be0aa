//! Finite-difference verification of the propagation engine.
//!
//! The backward pass computes the gradient of
//!
//! `C = 1/(2m) Σ |a - y|^2 + lambd/(2m) Σ |W|^2 + gamma/(2m) Σ |a' - J|^2`
//!
//! with respect to every weight and bias. These tests rebuild that cost from
//! the public surface and compare central differences against the analytic
//! accumulators, which also pins the evaluation order of the enhancement
//! stage (its cross-layer `+=` into `dA` must land before the next layer
//! reads it).

use faer::prelude::*;
use genn::{
    Activation, Cache, Dataset, Parameters, model_backward, model_forward, model_partials_forward,
};

const STEP: f64 = 1e-5;

fn assert_close(fd: f64, analytic: f64, context: &str) {
    let tol = 1e-6 + 1e-4 * fd.abs().max(analytic.abs());
    assert!(
        (fd - analytic).abs() <= tol,
        "{context}: finite difference {fd} vs analytic {analytic}"
    );
}

fn toy_problem(
    sizes: &[usize],
    output_activation: Activation,
) -> (Parameters, Cache, Dataset) {
    let mut params = Parameters::new(sizes, Activation::Tanh, output_activation).unwrap();
    params.initialize(Some(1234));
    let (n_x, n_y) = (params.n_x(), params.n_y());
    let m = 4usize;
    let cache = Cache::new(sizes, m);
    let x = Mat::from_fn(n_x, m, |i, c| 0.4 * (i as f64 + 1.0) - 0.3 * c as f64);
    let y = Mat::from_fn(n_y, m, |i, c| 0.2 * c as f64 - 0.1 * (i as f64 + 1.0));
    let j = (0..n_x)
        .map(|jdx| Mat::from_fn(n_y, m, |i, c| 0.05 * (jdx as f64 - i as f64) + 0.02 * c as f64))
        .collect();
    let data = Dataset::with_partials(x, y, j).unwrap();
    (params, cache, data)
}

fn cost(params: &Parameters, cache: &mut Cache, data: &Dataset, lambd: f64, gamma: f64) -> f64 {
    let m = data.m() as f64;
    let (response, partials) = model_partials_forward(data.x(), params, cache).unwrap();
    let mut c = 0.0;
    for i in 0..data.n_y() {
        for col in 0..data.m() {
            c += (response[(i, col)] - data.y()[(i, col)]).powi(2);
        }
    }
    if gamma != 0.0 {
        let targets = data.partials().unwrap();
        for j in 0..data.n_x() {
            for i in 0..data.n_y() {
                for col in 0..data.m() {
                    c += gamma * (partials[j][(i, col)] - targets[j][(i, col)]).powi(2);
                }
            }
        }
    }
    if lambd != 0.0 {
        for layer in 1..params.n_layers() {
            let view = params.layer(layer).unwrap();
            for i in 0..view.n {
                for g in 0..view.n_previous {
                    c += lambd * view.w[(i, g)].powi(2);
                }
            }
        }
    }
    c / (2.0 * m)
}

fn run_gradient_check(lambd: f64, gamma: f64) {
    let (mut params, mut cache, data) = toy_problem(&[2, 4, 1], Activation::Linear);
    model_partials_forward(data.x(), &params, &mut cache).unwrap();
    model_backward(&data, &mut params, &mut cache, lambd, gamma).unwrap();
    let analytic = params.stack_partials();

    let theta = params.stack();
    for k in 0..theta.nrows() {
        let mut plus = theta.clone();
        plus[k] += STEP;
        params.unstack(plus.as_ref()).unwrap();
        let cost_plus = cost(&params, &mut cache, &data, lambd, gamma);

        let mut minus = theta.clone();
        minus[k] -= STEP;
        params.unstack(minus.as_ref()).unwrap();
        let cost_minus = cost(&params, &mut cache, &data, lambd, gamma);

        params.unstack(theta.as_ref()).unwrap();
        let fd = (cost_plus - cost_minus) / (2.0 * STEP);
        assert_close(fd, analytic[k], &format!("parameter {k}"));
    }
}

#[test]
fn gradient_check_without_enhancement() {
    run_gradient_check(0.0, 0.0);
}

#[test]
fn gradient_check_with_regularization() {
    run_gradient_check(0.15, 0.0);
}

#[test]
fn gradient_check_with_enhancement() {
    run_gradient_check(0.0, 0.8);
}

#[test]
fn gradient_check_with_everything() {
    run_gradient_check(0.05, 1.3);
}

#[test]
fn gradient_check_with_gamma_above_one() {
    // gamma = 1 cannot tell a single application of the weighting apart
    // from one compounded per layer; gamma = 2 can.
    run_gradient_check(0.0, 2.0);
}

#[test]
fn gradient_check_with_nonlinear_output_layer() {
    // A tanh output layer exercises the second-derivative path at the last
    // layer as well.
    let (mut params, mut cache, data) = toy_problem(&[2, 3, 2], Activation::Tanh);
    let (lambd, gamma) = (0.1, 0.6);
    model_partials_forward(data.x(), &params, &mut cache).unwrap();
    model_backward(&data, &mut params, &mut cache, lambd, gamma).unwrap();
    let analytic = params.stack_partials();

    let theta = params.stack();
    for k in 0..theta.nrows() {
        let mut plus = theta.clone();
        plus[k] += STEP;
        params.unstack(plus.as_ref()).unwrap();
        let cost_plus = cost(&params, &mut cache, &data, lambd, gamma);
        let mut minus = theta.clone();
        minus[k] -= STEP;
        params.unstack(minus.as_ref()).unwrap();
        let cost_minus = cost(&params, &mut cache, &data, lambd, gamma);
        params.unstack(theta.as_ref()).unwrap();
        assert_close(
            (cost_plus - cost_minus) / (2.0 * STEP),
            analytic[k],
            &format!("parameter {k}"),
        );
    }
}

#[test]
fn jacobian_matches_finite_differences() {
    let (params, mut cache, data) = toy_problem(&[2, 4, 1], Activation::Linear);
    let partials = model_partials_forward(data.x(), &params, &mut cache)
        .unwrap()
        .1
        .iter()
        .map(|p| p.to_owned())
        .collect::<Vec<Mat<f64>>>();

    for j in 0..data.n_x() {
        for col in 0..data.m() {
            let mut x_plus = data.x().to_owned();
            x_plus[(j, col)] += STEP;
            let response_plus = model_forward(x_plus.as_ref(), &params, &mut cache)
                .unwrap()
                .to_owned();
            let mut x_minus = data.x().to_owned();
            x_minus[(j, col)] -= STEP;
            let response_minus = model_forward(x_minus.as_ref(), &params, &mut cache)
                .unwrap()
                .to_owned();
            for i in 0..data.n_y() {
                let fd = (response_plus[(i, col)] - response_minus[(i, col)]) / (2.0 * STEP);
                assert_close(
                    fd,
                    partials[j][(i, col)],
                    &format!("d y_{i} / d x_{j} at example {col}"),
                );
            }
        }
    }
}
