#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sigmoid {
    amp: f32,
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = 1. / (1. + (-z).exp());
        self.amp * s * (1. - s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_at_zero() {
        let sigmoid = Sigmoid::new(2.);

        assert_eq!(sigmoid.f(0.), 1.);
        assert_eq!(sigmoid.df(0.), 0.5);
    }

    #[test]
    fn saturated_inputs_stay_finite() {
        let sigmoid = Sigmoid::new(2.);

        assert_eq!(sigmoid.f(100.), 2.);
        assert_eq!(sigmoid.f(-100.), 0.);
        assert_eq!(sigmoid.df(100.), 0.);
        assert_eq!(sigmoid.df(-100.), 0.);
    }
}
