//! Recurrent latent space propagation (Fuoli et al., 2019): every frame is predicted from a
//! window of low resolution frames, the previous prediction and a hidden state carried
//! across the sequence.

mod cell;
mod model;
mod net;

pub use cell::{CellTrace, RlspCell};
pub use model::{Rlsp, RlspConfig};
pub use net::RlspNet;
