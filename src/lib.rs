pub use faer;

mod activation;
mod data;
mod error;
mod nn;
mod ptr;

pub use activation::*;
pub use data::*;
pub use error::*;
pub use nn::*;
pub use ptr::*;

pub mod core;

pub use crate::core::{
    Cache, Parameters, model_backward, model_forward, model_partials_forward, partials_forward,
};
