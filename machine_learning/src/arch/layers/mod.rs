mod conv;

pub use conv::{Conv2d, ConvTrace};
