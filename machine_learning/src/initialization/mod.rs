mod param_gen;
mod random;

pub use param_gen::ParamGen;
pub use random::RandParamGen;

/// How the weights of a parametrized layer get their initial values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    /// Uniform in `[-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    #[default]
    XavierUniform,
    /// Normal with standard deviation `sqrt(2 / fan_in)`.
    Kaiming,
}
