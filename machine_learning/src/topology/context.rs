use std::fmt::{self, Display};

use crate::{arch::activations::ActFn, initialization::Init};

/// Where the computation of a network is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu(usize),
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu(0)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu(i) => write!(f, "/CPU:{i}"),
        }
    }
}

/// A hierarchical name prefix, rendered as its components joined by `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    /// The empty scope, names under it are left unprefixed.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new scope nested inside this one.
    pub fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self { path }
    }

    /// Renders the full name of `leaf` inside this scope.
    pub fn name(&self, leaf: &str) -> String {
        self.child(leaf).to_string()
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("/"))
    }
}

/// The defaults shared by every parametrized layer of a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerDefaults {
    act_fn: Option<ActFn>,
    init: Init,
}

impl LayerDefaults {
    pub fn new(act_fn: Option<ActFn>, init: Init) -> Self {
        Self { act_fn, init }
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        self.act_fn
    }

    pub fn init(&self) -> Init {
        self.init
    }
}

impl Default for LayerDefaults {
    fn default() -> Self {
        Self::new(Some(ActFn::relu()), Init::XavierUniform)
    }
}

/// Everything a build needs to know besides the model parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildContext {
    device: Device,
    scope: Scope,
    defaults: LayerDefaults,
    seed: Option<u64>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_defaults(mut self, defaults: LayerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn defaults(&self) -> LayerDefaults {
        self.defaults
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_names() {
        let scope = Scope::root().child("conv_layers").child("conv_layers_1");

        assert_eq!(scope.to_string(), "conv_layers/conv_layers_1");
        assert_eq!(scope.name("conv"), "conv_layers/conv_layers_1/conv");
        assert_eq!(Scope::root().name("logits"), "logits");
    }

    #[test]
    fn default_context() {
        let ctx = BuildContext::new();

        assert_eq!(ctx.device(), Device::Cpu(0));
        assert_eq!(ctx.device().to_string(), "/CPU:0");
        assert_eq!(ctx.defaults().act_fn(), Some(ActFn::relu()));
        assert_eq!(ctx.defaults().init(), Init::XavierUniform);
        assert_eq!(ctx.seed(), None);
    }
}
