//! Argument and descriptor construction for FFTS-plus sub-tasks.
//!
//! A parent node task owns one sub-task per engine op. Each sub-task runs
//! the thread partitioner and the tiling function, lays the resulting
//! tiling blobs and per-thread address rows into one flat buffer, and fills
//! the hardware descriptor through its engine's context updater. The
//! collaborators live behind the traits in [`collab`].

pub mod align;
pub mod collab;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod layout;
pub mod model;
pub mod params;
pub mod subtask;

pub use collab::{
    ContextUpdater, DeviceRuntime, KernelStore, RtCallback, Services, TaskContext, ThreadPartitioner,
    TilingCalculator, UpdaterRegistry,
};
pub use config::{SlicerConfig, UndersizedTilingPolicy};
pub use descriptor::{EngineEntry, HwTaskHandle, KernelEntry, TaskDescriptor, TilingPtrs};
pub use error::{ErrorKind, RtCode, SliceError, SliceResult};
pub use factory::{SubTaskCtor, SubTaskFactory};
pub use layout::{ArgsBuffer, ArgsLayout};
pub use model::{DevicePtr, Engine, EngineType, MixL2TaskDef, NodeDesc, ParentTask, StreamId, TaskModel};
pub use params::{SliceGroup, ThreadSliceParameters, TilingGroup, TilingRunInfo};
pub use subtask::{AddressingScheme, DoneCallback, Stage, SubTask, OP_PARA_SIZE_ATTR, PARAM_HEAD_BYTES};
