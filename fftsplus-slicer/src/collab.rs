//! Contracts of the services a sub-task drives but does not own.

use std::collections::HashMap;
use std::sync::Arc;

use auto_impl::auto_impl;

use crate::config::SlicerConfig;
use crate::descriptor::{HwTaskHandle, KernelEntry, TaskDescriptor};
use crate::error::{RtCode, SliceResult};
use crate::model::{DevicePtr, Engine, NodeDesc, StreamId};
use crate::params::{ThreadSliceParameters, TilingGroup, TilingRunInfo};

/// Completion hook handed to the device runtime.
pub type RtCallback = Box<dyn FnOnce(RtCode) + Send + 'static>;

/// Splits a node's work into parallel-executable units.
#[auto_impl(&, Box, Arc)]
pub trait ThreadPartitioner: Send + Sync {
    // must be repeatable, and must fail rather than keep a stale split
    fn partition(&self, node: &NodeDesc) -> SliceResult<()>;
}

/// Runs the operator tiling function for one thread group.
#[auto_impl(&, Box, Arc)]
pub trait TilingCalculator: Send + Sync {
    // `None` when the partition produced no op for `group`
    fn calculate(&self, node: &NodeDesc, group: TilingGroup) -> SliceResult<Option<TilingRunInfo>>;
}

/// Engine specific half of descriptor construction.
#[auto_impl(&, Box, Arc)]
pub trait ContextUpdater: Send + Sync {
    fn thread_slice_params(
        &self,
        node: &NodeDesc,
        tiling: &[TilingRunInfo],
    ) -> SliceResult<ThreadSliceParameters>;

    fn entry_and_prefetch(
        &self,
        node: &NodeDesc,
        tiling_key: u64,
        engine: Engine,
    ) -> SliceResult<KernelEntry>;

    // bake the filled descriptor into a hardware dispatch object
    fn finalize(&self, node: &NodeDesc, descriptor: &TaskDescriptor) -> SliceResult<HwTaskHandle>;
}

/// Compiled kernel name -> device entry.
#[auto_impl(&, Box, Arc)]
pub trait KernelStore: Send + Sync {
    fn lookup(&self, kernel_name: &str) -> Option<KernelEntry>;
}

/// Stream ordered device calls. Every call returns the raw runtime code.
#[auto_impl(&, Box, Arc)]
pub trait DeviceRuntime: Send + Sync {
    fn allocate(&self, size: usize) -> Result<DevicePtr, RtCode>;
    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> RtCode;
    fn launch_task(&self, task: &HwTaskHandle, stream: StreamId) -> RtCode;
    fn register_callback(&self, stream: StreamId, callback: RtCallback) -> RtCode;
}

/// Per-invocation view the executor gives a sub-task.
pub trait TaskContext {
    fn input_addrs(&self) -> &[DevicePtr];
    fn output_addrs(&self) -> &[DevicePtr];
    fn workspace_addrs(&self) -> &[DevicePtr];
    fn stream(&self) -> StreamId;
    fn runtime(&self) -> &dyn DeviceRuntime;
    // device region that lives until the task completes
    fn allocate_workspace(&mut self, size: usize) -> SliceResult<DevicePtr>;
}

/// Engine tag -> context updater. The first registration for a tag wins.
#[derive(Default, Clone)]
pub struct UpdaterRegistry {
    updaters: HashMap<String, Arc<dyn ContextUpdater>>,
}

impl UpdaterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, updater: Arc<dyn ContextUpdater>) -> bool {
        let tag = tag.into();
        if self.updaters.contains_key(&tag) {
            return false;
        }
        self.updaters.insert(tag, updater);
        true
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn ContextUpdater>> {
        self.updaters.get(tag).cloned()
    }
}

/// Services shared by every sub-task of a model.
pub struct Services {
    pub partitioner: Arc<dyn ThreadPartitioner>,
    pub tiling: Arc<dyn TilingCalculator>,
    pub kernels: Arc<dyn KernelStore>,
    pub updaters: UpdaterRegistry,
    pub config: SlicerConfig,
}
