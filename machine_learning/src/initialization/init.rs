use std::{cell::RefCell, rc::Rc};

use rand::Rng;

use super::{ConstParamGen, ParamGen, RandErr, RandParamGen};

/// How the weights of a layer are initialized. The fan of the layer is only known once the
/// architecture is built, so the distribution is resolved per layer through `Init::build`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    XavierUniform,
    LecunUniform,
    Normal { mean: f32, std_dev: f32 },
    Kaiming,
    Xavier,
    Lecun,
}

impl Default for Init {
    fn default() -> Self {
        Self::Kaiming
    }
}

impl Init {
    /// Builds the generator for a single weight tensor.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by the whole model.
    /// * `limit` - The amount of weights of the tensor.
    /// * `fan_in` - The number of input units of the tensor.
    /// * `fan_out` - The number of output units of the tensor.
    pub fn build<R: Rng + 'static>(
        self,
        rng: Rc<RefCell<R>>,
        limit: usize,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Box<dyn ParamGen>, RandErr> {
        let param_gen: Box<dyn ParamGen> = match self {
            Init::Const { value } => Box::new(ConstParamGen::new(value, limit)),
            Init::Uniform { low, high } => Box::new(RandParamGen::uniform(rng, limit, low, high)?),
            Init::XavierUniform => Box::new(RandParamGen::xavier_uniform(
                rng, limit, fan_in, fan_out,
            )?),
            Init::LecunUniform => Box::new(RandParamGen::lecun_uniform(rng, limit, fan_in)?),
            Init::Normal { mean, std_dev } => {
                Box::new(RandParamGen::normal(rng, limit, mean, std_dev)?)
            }
            Init::Kaiming => Box::new(RandParamGen::kaiming(rng, limit, fan_in)?),
            Init::Xavier => Box::new(RandParamGen::xavier(rng, limit, fan_in, fan_out)?),
            Init::Lecun => Box::new(RandParamGen::lecun(rng, limit, fan_in)?),
        };

        Ok(param_gen)
    }
}
