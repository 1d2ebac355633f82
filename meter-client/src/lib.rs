pub mod api;
pub mod domain;

pub use api::{ProviderClient, ProviderError};
pub use domain::{CurveRecord, MeteringChannel};
