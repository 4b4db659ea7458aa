pub mod activations;
pub mod layers;
pub mod loss;
mod model;
pub mod ops;
pub mod rlsp;
mod sequential;

pub use model::{EvalMetrics, Losses, SuperResolution};
pub use sequential::Sequential;
