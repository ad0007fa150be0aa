use faer::prelude::*;

use crate::{
    Activation, Error, denormalize, normalize,
    core::{Cache, Parameters, model_forward, model_partials_forward},
};

/// A feed-forward network with a convenient prediction surface.
///
/// Owns the parameter store plus a propagation cache that is rebuilt lazily
/// whenever the incoming batch size changes. Inputs are centered and scaled
/// with the store's normalization statistics before propagation and the
/// outputs mapped back, so a network restored from saved parameters predicts
/// in the original units of its training data. With the default statistics
/// (mu = 0, sigma = 1) this is the raw propagation engine.
///
/// Training is not this type's job: an external optimizer drives the engine
/// directly through [`Parameters::stack`]/[`Parameters::unstack`] and
/// [`model_backward`](crate::core::model_backward).
pub struct NeuralNet {
    params: Parameters,
    cache: Option<Cache>,
}

impl NeuralNet {
    /// A network with freshly initialized (randomly drawn) parameters.
    pub fn new(
        layer_sizes: &[usize],
        hidden_activation: Activation,
        output_activation: Activation,
    ) -> Result<Self, Error> {
        let mut params = Parameters::new(layer_sizes, hidden_activation, output_activation)?;
        params.initialize(None);
        Ok(Self::from_parameters(params))
    }

    /// Wrap an existing parameter store, e.g. one restored with
    /// [`Parameters::deserialize`].
    pub fn from_parameters(params: Parameters) -> Self {
        Self {
            params,
            cache: None,
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn into_parameters(self) -> Parameters {
        self.params
    }

    pub fn n_x(&self) -> usize {
        self.params.n_x()
    }

    pub fn n_y(&self) -> usize {
        self.params.n_y()
    }

    fn split_with_cache(&mut self, m: usize) -> (&Parameters, &mut Cache) {
        let Self { params, cache } = self;
        let rebuild = match cache {
            Some(cache) => cache.m() != m,
            None => true,
        };
        if rebuild {
            *cache = Some(Cache::new(params.layer_sizes(), m));
        }
        (params, cache.as_mut().unwrap())
    }

    fn check_input(&self, x: MatRef<f64>) -> Result<(), Error> {
        if x.nrows() != self.params.n_x() || x.ncols() == 0 {
            return Err(Error::shape_mismatch(
                format!("inputs with {} rows", self.params.n_x()),
                format!("{}x{}", x.nrows(), x.ncols()),
            ));
        }
        Ok(())
    }

    /// Predict responses for a batch of inputs, shape (n_x, m) in, (n_y, m)
    /// out.
    pub fn predict(&mut self, x: MatRef<f64>) -> Result<Mat<f64>, Error> {
        self.check_input(x)?;
        let x_norm = normalize(x, self.params.mu_x(), self.params.sigma_x());
        let (params, cache) = self.split_with_cache(x.ncols());
        let response = model_forward(x_norm.as_ref(), params, cache)?;
        Ok(denormalize(response, params.mu_y(), params.sigma_y()))
    }

    /// Predict the Jacobian for a batch of inputs: one (n_y, m) matrix per
    /// input coordinate j, holding dy_i/dx_j per example.
    pub fn predict_partials(&mut self, x: MatRef<f64>) -> Result<Vec<Mat<f64>>, Error> {
        self.check_input(x)?;
        let x_norm = normalize(x, self.params.mu_x(), self.params.sigma_x());
        let (params, cache) = self.split_with_cache(x.ncols());
        let (_, partials) = model_partials_forward(x_norm.as_ref(), params, cache)?;
        let scaled = partials
            .iter()
            .enumerate()
            .map(|(j, partial)| {
                Mat::from_fn(partial.nrows(), partial.ncols(), |i, c| {
                    partial[(i, c)] * params.sigma_y()[i] / params.sigma_x()[j]
                })
            })
            .collect();
        Ok(scaled)
    }
}
