//! Core parts of the algorithms without abstraction.

pub mod cache;
pub mod params;

pub use cache::Cache;
pub use params::Parameters;

mod backward;
mod forward;

pub use backward::*;
pub use forward::*;
