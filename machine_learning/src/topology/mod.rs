//! Turns a compact, per layer group description of a convolutional network into a concrete
//! topology.

mod builder;
mod context;
mod net_factory;
mod params;

pub use builder::{LayerFactory, build_topology, stack};
pub use context::{BuildContext, Device, LayerDefaults, Scope};
pub use net_factory::{NetFactory, Node};
pub use params::{ConvStage, FcStage, ModelParams, NormalizedParams};
