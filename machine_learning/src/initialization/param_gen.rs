use crate::Result;

/// Generates the initial values of a layer's parameters.
pub trait ParamGen {
    /// Appends exactly `n` freshly generated parameters to `params`.
    ///
    /// # Returns
    /// An error if the generator can't produce `n` more values, leaving `params` untouched.
    fn fill(&mut self, params: &mut Vec<f32>, n: usize) -> Result<()>;
}
