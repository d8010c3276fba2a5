//! Host-side stand-ins for the device runtime and the graph services, for
//! driving `fftsplus-slicer` sub-tasks without an accelerator.

mod context;
mod runtime;
mod services;

pub use context::SimContext;
pub use runtime::{RtOp, SimRuntime, DEVICE_BASE};
pub use services::{KernelTable, ScriptedPartitioner, SimServices, TableUpdater, TilingTable};
