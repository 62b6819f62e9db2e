use std::fmt::{self, Display};

use super::relu;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Relu(relu::Relu),
}

impl ActFn {
    pub fn relu() -> Self {
        ActFn::Relu(relu::Relu::new())
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.f(x),
        }
    }
}

impl Display for ActFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActFn::Relu(_) => f.write_str("relu"),
        }
    }
}
