//! Sub-tasks: one operator instance bound to its parent node task.
//!
//! Life cycle is `Unloaded -> Loaded -> Built -> Launched`. `load` binds the
//! parent once, `update_tiling_data` rebuilds the descriptor and argument
//! buffer from scratch on every invocation, and `execute_async` ships the
//! buffer. A failed build drops back to `Loaded`, so nothing half built is
//! ever copied to the device.

mod aic_aiv;
mod aicpu;
mod mix_aic_aiv;
mod mix_l2;

pub use aic_aiv::AicAivTask;
pub use aicpu::{AicpuTask, PARAM_HEAD_BYTES};
pub use mix_aic_aiv::MixAicAivTask;
pub use mix_l2::{MixL2Task, OP_PARA_SIZE_ATTR};

use std::sync::Arc;

use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::collab::{ContextUpdater, Services, TaskContext};
use crate::config::UndersizedTilingPolicy;
use crate::descriptor::{resolve_entry, DescriptorBuilder, HwTaskHandle, TaskDescriptor, TilingPtrs};
use crate::error::{check_rt, SliceError, SliceResult};
use crate::layout::{ArgsBuffer, ArgsLayout, TilingPack};
use crate::model::{DevicePtr, EngineType, NodeDesc, ParentTask, TaskModel};
use crate::params::TilingGroup;

/// Caller supplied completion hook.
pub type DoneCallback = Box<dyn FnOnce(SliceResult<()>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unloaded,
    Loaded,
    Built,
    Launched,
}

/// How a variant lays out device addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingScheme {
    /// one address row per thread slice
    PerThread,
    /// input/output addresses recorded once, behind a parameter head
    Direct,
    /// address list fixed by the compiled task definition
    Explicit,
}

pub trait SubTask: Send {
    fn engine_type(&self) -> EngineType;
    fn addressing(&self) -> AddressingScheme;
    fn stage(&self) -> Stage;

    fn load(&mut self, model: &TaskModel, node_name: &str) -> SliceResult<()>;
    fn update_tiling_data(&mut self, ctx: &mut dyn TaskContext) -> SliceResult<()>;

    fn update_args(&mut self, _ctx: &mut dyn TaskContext) -> SliceResult<()> {
        Ok(())
    }

    /// Ship the built buffer. Variants that leave the hardware launch to the
    /// parent node task hand `done` back so it can be chained there.
    fn execute_async(
        &mut self,
        ctx: &mut dyn TaskContext,
        done: Option<DoneCallback>,
    ) -> SliceResult<Option<DoneCallback>>;

    // descriptor of the last successful build
    fn descriptor(&self) -> Option<&TaskDescriptor>;
    fn host_args(&self) -> &[u8];
}

/// A sub-task's link to its parent and its engine's updater.
#[derive(Clone)]
pub(crate) struct Binding {
    pub parent: Arc<ParentTask>,
    pub updater: Arc<dyn ContextUpdater>,
}

impl Binding {
    pub(crate) fn bind(model: &TaskModel, node_name: &str, engine_type: EngineType) -> SliceResult<Binding> {
        let parent = model
            .find(node_name)
            .ok_or_else(|| SliceError::ParentNotFound(node_name.to_string()))?;
        parent.services.config.validate()?;
        let updater = parent
            .services
            .updaters
            .get(engine_type.tag())
            .ok_or_else(|| SliceError::UpdaterNotFound(engine_type.tag().to_string()))?;
        Ok(Binding { parent, updater })
    }

    pub(crate) fn node(&self) -> &NodeDesc {
        &self.parent.node
    }

    pub(crate) fn services(&self) -> &Services {
        &self.parent.services
    }

    // I/O address lists of the invocation, checked against the node
    pub(crate) fn io_addrs(&self, ctx: &dyn TaskContext) -> SliceResult<(Vec<DevicePtr>, Vec<DevicePtr>)> {
        let node = self.node();
        let (inputs, outputs) = (ctx.input_addrs(), ctx.output_addrs());
        if inputs.len() != node.input_count {
            return Err(SliceError::mismatch(&node.name, "input address list", node.input_count, inputs.len()));
        }
        if outputs.len() != node.output_count {
            return Err(SliceError::mismatch(&node.name, "output address list", node.output_count, outputs.len()));
        }
        Ok((inputs.to_vec(), outputs.to_vec()))
    }
}

pub(crate) fn bound<'a>(binding: &'a Option<Binding>, stage: Stage, op: &'static str) -> SliceResult<&'a Binding> {
    match binding {
        Some(binding) if stage != Stage::Unloaded => Ok(binding),
        _ => Err(SliceError::InvalidStage { op, stage }),
    }
}

// only a finalized build may touch the device
pub(crate) fn dispatchable(stage: Stage, descriptor: &TaskDescriptor, node: &str) -> SliceResult<HwTaskHandle> {
    if stage != Stage::Built {
        return Err(SliceError::InvalidStage { op: "execute", stage });
    }
    descriptor.hw_task.ok_or_else(|| SliceError::NotFinalized(node.to_string()))
}

/// Shared state machine of the variants that replicate addresses per thread.
pub(crate) struct PerThreadTask {
    engine_type: EngineType,
    binding: Option<Binding>,
    stage: Stage,
    descriptor: TaskDescriptor,
    args: ArgsBuffer,
}

impl PerThreadTask {
    pub(crate) fn new(engine_type: EngineType) -> Self {
        PerThreadTask {
            engine_type,
            binding: None,
            stage: Stage::Unloaded,
            descriptor: TaskDescriptor::default(),
            args: ArgsBuffer::default(),
        }
    }

    pub(crate) fn engine_type(&self) -> EngineType {
        self.engine_type
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub(crate) fn load(&mut self, model: &TaskModel, node_name: &str) -> SliceResult<()> {
        let binding = Binding::bind(model, node_name, self.engine_type)?;
        self.binding = Some(binding);
        self.descriptor = TaskDescriptor::default();
        self.args = ArgsBuffer::default();
        self.stage = Stage::Loaded;
        Ok(())
    }

    pub(crate) fn update_tiling_data(
        &mut self,
        ctx: &mut dyn TaskContext,
        undersized: UndersizedTilingPolicy,
    ) -> SliceResult<()> {
        let binding = bound(&self.binding, self.stage, "update tiling data")?.clone();
        let built = match self.build(&binding, ctx, undersized) {
            Ok(built) => built,
            Err(err) => {
                self.stage = Stage::Loaded;
                return Err(err);
            }
        };
        let Some((descriptor, args)) = built else {
            self.stage = Stage::Loaded;
            return Ok(());
        };
        self.descriptor = descriptor;
        self.args = args;
        self.stage = Stage::Built;
        let hw_task = binding.updater.finalize(binding.node(), &self.descriptor)?;
        self.descriptor.hw_task = Some(hw_task);
        Ok(())
    }

    // steps up to the context update; `None` when the build is deferred
    fn build(
        &self,
        binding: &Binding,
        ctx: &mut dyn TaskContext,
        undersized: UndersizedTilingPolicy,
    ) -> SliceResult<Option<(TaskDescriptor, ArgsBuffer)>> {
        let node = binding.node();
        let services = binding.services();
        let updater = &*binding.updater;
        let engines = self.engine_type.engines();

        trace!("{}: thread partition", node.name);
        services.partitioner.partition(node)?;

        let groups = TilingGroup::per_thread(&engines);
        let mut tiling = Vec::with_capacity(groups.len());
        for &group in &groups {
            if let Some(info) = services.tiling.calculate(node, group)? {
                tiling.push(info);
            }
        }
        if tiling.len() < groups.len() {
            match undersized {
                UndersizedTilingPolicy::Fail => {
                    return Err(SliceError::mismatch(&node.name, "tiling info", groups.len(), tiling.len()));
                }
                UndersizedTilingPolicy::Defer => {
                    warn!(
                        "{}: {} of {} tiling infos available, {} build deferred",
                        node.name,
                        tiling.len(),
                        groups.len(),
                        self.engine_type
                    );
                    return Ok(None);
                }
            }
        }

        trace!("{}: resolve kernel entries", node.name);
        let mut entries = SmallVec::<[_; 2]>::new();
        for (i, &engine) in engines.iter().enumerate() {
            let (non_tail, tail) = (&tiling[2 * i], &tiling[2 * i + 1]);
            entries.push(resolve_entry(updater, node, engine, non_tail.tiling_key, tail.tiling_key)?);
        }

        let (inputs, outputs) = binding.io_addrs(&*ctx)?;
        let workspaces = ctx.workspace_addrs().to_vec();
        let slot_count = inputs.len() + outputs.len() + workspaces.len();
        let params = updater.thread_slice_params(node, &tiling)?;
        params.validate(node, slot_count)?;

        let pack = TilingPack::new(tiling.iter().map(|t| t.tiling_size), services.config.align_bytes);
        let layout = ArgsLayout::new(pack.region_words(), slot_count, engines.len(), params.thread_dim());
        let mut args = ArgsBuffer::new(layout);
        for (info, &offset) in tiling.iter().zip(&pack.offsets) {
            args.write_tiling(offset, info)?;
        }

        let base = ctx.allocate_workspace(layout.device_bytes())?;

        let bases = inputs.iter().chain(&outputs).chain(&workspaces).copied().collect::<Vec<_>>();
        args.compile_addresses(&node.name, &bases, &params.per_slot_stride)?;

        let mut builder = DescriptorBuilder::new(params.thread_dim)
            .entries(entries)
            .io(&inputs, &outputs)
            .workspace_sizes(&tiling[0].workspace_sizes)
            .region(base, layout.tiling_region_bytes());
        for (i, &engine) in engines.iter().enumerate() {
            let non_tail = base + pack.offsets[2 * i] as u64;
            let tail = base + pack.offsets[2 * i + 1] as u64;
            args.assign_tiling_ptrs(i, non_tail, tail);
            builder = builder.tiling_ptrs(TilingPtrs { engine, non_tail, tail });
        }

        debug!(
            "{}: {} threads x {} slots, {} tiling bytes, args at {:#x}",
            node.name,
            layout.thread_dim,
            layout.row_words(),
            layout.tiling_region_bytes(),
            base
        );
        Ok(Some((builder.build(), args)))
    }

    pub(crate) fn execute_async(
        &mut self,
        ctx: &mut dyn TaskContext,
        done: Option<DoneCallback>,
    ) -> SliceResult<Option<DoneCallback>> {
        let node = self.binding.as_ref().map(|b| b.node().name.as_str()).unwrap_or_default();
        dispatchable(self.stage, &self.descriptor, node)?;
        if !self.args.is_empty() {
            let code = ctx
                .runtime()
                .copy_host_to_device(self.descriptor.region_base, self.args.as_bytes(), ctx.stream());
            check_rt(code, "memcpy_async")?;
        }
        self.stage = Stage::Launched;
        Ok(done)
    }

    pub(crate) fn descriptor(&self) -> Option<&TaskDescriptor> {
        matches!(self.stage, Stage::Built | Stage::Launched).then_some(&self.descriptor)
    }

    // empty unless the last build went through
    pub(crate) fn host_args(&self) -> &[u8] {
        match self.stage {
            Stage::Built | Stage::Launched => self.args.as_bytes(),
            _ => &[],
        }
    }
}
