use std::fmt::{self, Display};
use std::str::FromStr;

use faer::prelude::*;

use crate::Error;

/// The closed set of layer activation functions.
///
/// Each activation exposes its value and its first and second derivatives,
/// all elementwise and writing into a caller-owned buffer. The derivative
/// entry points receive the already-computed pre-activation `z` and
/// activation `a` (and `g1` for the second derivative) so nothing is ever
/// re-evaluated from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
    Linear,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Linear => "linear",
        }
    }

    /// `a = g(z)`, elementwise.
    pub fn evaluate(self, z: MatRef<f64>, mut a: MatMut<f64>) {
        match self {
            Activation::Linear => a.copy_from(z),
            Activation::Relu => {
                zip!(&mut a, &z).for_each(|unzip!(a, z)| *a = z.max(0.0));
            }
            Activation::Tanh => {
                zip!(&mut a, &z).for_each(|unzip!(a, z)| *a = z.tanh());
            }
        }
    }

    /// `g1 = g'(z)`, elementwise, reusing `a = g(z)` where it is cheaper.
    pub fn first_derivative(self, z: MatRef<f64>, a: MatRef<f64>, mut g1: MatMut<f64>) {
        match self {
            Activation::Linear => g1.fill(1.0),
            Activation::Relu => {
                zip!(&mut g1, &z).for_each(|unzip!(g1, z)| *g1 = if *z > 0.0 { 1.0 } else { 0.0 });
            }
            Activation::Tanh => {
                // tanh'(z) = 1 - tanh(z)^2
                zip!(&mut g1, &a).for_each(|unzip!(g1, a)| *g1 = 1.0 - *a * *a);
            }
        }
    }

    /// `g2 = g''(z)`, elementwise, reusing `a = g(z)` and `g1 = g'(z)`.
    pub fn second_derivative(
        self,
        _z: MatRef<f64>,
        a: MatRef<f64>,
        g1: MatRef<f64>,
        mut g2: MatMut<f64>,
    ) {
        match self {
            // Zero almost everywhere for relu; exactly zero for linear.
            Activation::Linear | Activation::Relu => g2.fill(0.0),
            Activation::Tanh => {
                // tanh''(z) = -2 tanh(z) tanh'(z)
                zip!(&mut g2, &a, &g1).for_each(|unzip!(g2, a, g1)| *g2 = -2.0 * *a * *g1);
            }
        }
    }
}

impl Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "linear" => Ok(Activation::Linear),
            _ => Err(Error::UnknownActivation { name: s.to_owned() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_scalar(phi: Activation, z: f64) -> (f64, f64, f64) {
        let z_mat = Mat::from_fn(1, 1, |_, _| z);
        let mut a = Mat::zeros(1, 1);
        let mut g1 = Mat::zeros(1, 1);
        let mut g2 = Mat::zeros(1, 1);
        phi.evaluate(z_mat.as_ref(), a.as_mut());
        phi.first_derivative(z_mat.as_ref(), a.as_ref(), g1.as_mut());
        phi.second_derivative(z_mat.as_ref(), a.as_ref(), g1.as_ref(), g2.as_mut());
        (a[(0, 0)], g1[(0, 0)], g2[(0, 0)])
    }

    #[test]
    fn linear_is_identity() {
        let (a, g1, g2) = eval_scalar(Activation::Linear, -2.5);
        assert_eq!(a, -2.5);
        assert_eq!(g1, 1.0);
        assert_eq!(g2, 0.0);
    }

    #[test]
    fn relu_clamps_negatives() {
        let (a, g1, g2) = eval_scalar(Activation::Relu, -1.0);
        assert_eq!((a, g1, g2), (0.0, 0.0, 0.0));
        let (a, g1, g2) = eval_scalar(Activation::Relu, 3.0);
        assert_eq!((a, g1, g2), (3.0, 1.0, 0.0));
    }

    #[test]
    fn tanh_derivatives() {
        let z = 0.7f64;
        let (a, g1, g2) = eval_scalar(Activation::Tanh, z);
        let t = z.tanh();
        assert!((a - t).abs() < 1e-15);
        assert!((g1 - (1.0 - t * t)).abs() < 1e-15);
        assert!((g2 - (-2.0 * t * (1.0 - t * t))).abs() < 1e-15);
    }

    #[test]
    fn parses_known_names_only() {
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("tanh".parse::<Activation>().unwrap(), Activation::Tanh);
        assert_eq!("linear".parse::<Activation>().unwrap(), Activation::Linear);
        assert_eq!(
            "softmax".parse::<Activation>(),
            Err(Error::UnknownActivation {
                name: "softmax".to_owned()
            })
        );
    }
}
