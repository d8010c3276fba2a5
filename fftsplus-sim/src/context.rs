use log::trace;

use fftsplus_slicer::collab::{DeviceRuntime, TaskContext};
use fftsplus_slicer::{DevicePtr, SliceError, SliceResult, StreamId};

use crate::runtime::SimRuntime;

fn malloc(runtime: &SimRuntime, size: usize) -> SliceResult<DevicePtr> {
    runtime.allocate(size).map_err(|code| SliceError::Runtime { op: "malloc", code })
}

/// Scheduling context of one node invocation against a [`SimRuntime`].
/// Input and output buffers are allocated up front from their byte sizes.
pub struct SimContext<'rt> {
    runtime: &'rt SimRuntime,
    stream: StreamId,
    inputs: Vec<DevicePtr>,
    outputs: Vec<DevicePtr>,
    workspaces: Vec<DevicePtr>,
    scratch: Vec<(DevicePtr, usize)>,
}

impl<'rt> SimContext<'rt> {
    pub fn new(runtime: &'rt SimRuntime, stream: StreamId) -> Self {
        SimContext {
            runtime,
            stream,
            inputs: Vec::new(),
            outputs: Vec::new(),
            workspaces: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn place(&self, sizes: &[usize]) -> SliceResult<Vec<DevicePtr>> {
        sizes.iter().map(|&size| malloc(self.runtime, size)).collect()
    }

    pub fn with_inputs(mut self, sizes: &[usize]) -> SliceResult<Self> {
        self.inputs = self.place(sizes)?;
        Ok(self)
    }

    pub fn with_outputs(mut self, sizes: &[usize]) -> SliceResult<Self> {
        self.outputs = self.place(sizes)?;
        Ok(self)
    }

    pub fn with_workspaces(mut self, sizes: &[usize]) -> SliceResult<Self> {
        self.workspaces = self.place(sizes)?;
        Ok(self)
    }

    /// Use caller chosen addresses instead of allocating.
    pub fn with_io_addrs(mut self, inputs: &[DevicePtr], outputs: &[DevicePtr]) -> Self {
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        self
    }

    // regions handed out through `allocate_workspace`, oldest first
    pub fn scratch(&self) -> &[(DevicePtr, usize)] {
        &self.scratch
    }

    /// Flush the stream's completion callbacks.
    pub fn synchronize(&self) -> usize {
        self.runtime.synchronize(self.stream)
    }
}

impl TaskContext for SimContext<'_> {
    fn input_addrs(&self) -> &[DevicePtr] {
        &self.inputs
    }

    fn output_addrs(&self) -> &[DevicePtr] {
        &self.outputs
    }

    fn workspace_addrs(&self) -> &[DevicePtr] {
        &self.workspaces
    }

    fn stream(&self) -> StreamId {
        self.stream
    }

    fn runtime(&self) -> &dyn DeviceRuntime {
        self.runtime
    }

    fn allocate_workspace(&mut self, size: usize) -> SliceResult<DevicePtr> {
        let addr = malloc(self.runtime, size)?;
        trace!("scratch {} bytes at {:#x}", size, addr);
        self.scratch.push((addr, size));
        Ok(addr)
    }
}
