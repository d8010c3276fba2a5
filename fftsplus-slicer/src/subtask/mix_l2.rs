use std::sync::{Arc, Mutex};

use log::{debug, trace};
use smallvec::SmallVec;

use crate::align::aligned_words;
use crate::collab::TaskContext;
use crate::descriptor::{DescriptorBuilder, EngineEntry, TaskDescriptor, TilingPtrs};
use crate::error::{check_rt, SliceError, SliceResult};
use crate::layout::{ArgsBuffer, ArgsLayout};
use crate::model::{DevicePtr, Engine, EngineType, TaskModel};
use crate::params::{SliceGroup, TilingGroup, TilingRunInfo};

use super::{bound, dispatchable, AddressingScheme, Binding, DoneCallback, Stage, SubTask};

/// Node attribute holding the maximum tiling size. Zero or absent means
/// the op runs without tiling data.
pub const OP_PARA_SIZE_ATTR: &str = "op_para_size";

/// Cube and vector op sharing L2-resident data. Its address list comes
/// straight from the compiled task definition, and unlike the other
/// variants it launches the hardware task itself.
pub struct MixL2Task {
    binding: Option<Binding>,
    stage: Stage,
    /// bytes reserved for tiling data, 0 when no tiling is needed
    tiling_limit: usize,
    descriptor: TaskDescriptor,
    args: ArgsBuffer,
}

impl MixL2Task {
    pub fn new() -> Self {
        MixL2Task {
            binding: None,
            stage: Stage::Unloaded,
            tiling_limit: 0,
            descriptor: TaskDescriptor::default(),
            args: ArgsBuffer::default(),
        }
    }

    pub fn needs_tiling(&self) -> bool {
        self.tiling_limit > 0
    }

    fn build(&self, binding: &Binding, ctx: &mut dyn TaskContext) -> SliceResult<(TaskDescriptor, ArgsBuffer)> {
        let node = binding.node();
        let services = binding.services();
        let def = binding.parent.mix_l2.as_ref().ok_or_else(|| SliceError::MissingTaskDef {
            node: node.name.clone(),
            what: "mix l2 task",
        })?;

        let tiling = if self.needs_tiling() {
            Some(self.calculate_tiling(binding)?)
        } else {
            None
        };

        let mut entries = SmallVec::<[EngineEntry; 2]>::new();
        for engine in [Engine::Aic, Engine::Aiv] {
            let name = format!("{}{}", engine.mix_prefix(), node.kernel_name);
            trace!("{}: lookup {}", node.name, name);
            let kernel = services.kernels.lookup(&name).ok_or(SliceError::KernelNotFound(name))?;
            entries.push(EngineEntry {
                engine,
                non_tail_start: kernel.addr,
                tail_start: kernel.addr,
                prefetch: kernel.prefetch,
            });
        }

        let split = node.input_count;
        if def.io_addrs.len() != split + node.output_count {
            return Err(SliceError::mismatch(
                &node.name,
                "compiled io address list",
                split + node.output_count,
                def.io_addrs.len(),
            ));
        }
        let (inputs, outputs) = def.io_addrs.split_at(split);

        let region_words = aligned_words(self.tiling_limit, services.config.align_bytes);
        let slot_count = def.mode_addrs.len() + def.io_addrs.len();
        let layout = ArgsLayout::new(region_words, slot_count, tiling.is_some() as usize, 1);
        let mut args = ArgsBuffer::new(layout);
        if let Some(info) = &tiling {
            args.write_tiling(0, info)?;
        }

        let base = match layout.device_bytes() {
            0 => 0,
            bytes => ctx.allocate_workspace(bytes)?,
        };
        let mut row = def.mode_addrs.iter().chain(&def.io_addrs).copied().collect::<Vec<DevicePtr>>();
        let mut builder = DescriptorBuilder::new(1)
            .entries(entries)
            .io(inputs, outputs)
            .region(base, layout.tiling_region_bytes());
        if let Some(info) = &tiling {
            // both engines read the one blob at the head of the region
            row.push(base);
            builder = builder
                .workspace_sizes(&info.workspace_sizes)
                .tiling_ptrs(TilingPtrs { engine: Engine::Aic, non_tail: base, tail: base })
                .tiling_ptrs(TilingPtrs { engine: Engine::Aiv, non_tail: base, tail: base });
        }
        args.write_row(&node.name, 0, &row)?;

        debug!(
            "{}: mix l2 {} mode + {} io slots, tiling {}",
            node.name,
            def.mode_addrs.len(),
            def.io_addrs.len(),
            self.tiling_limit
        );
        Ok((builder.build(), args))
    }

    fn calculate_tiling(&self, binding: &Binding) -> SliceResult<TilingRunInfo> {
        let node = binding.node();
        let group = TilingGroup::new(Engine::Aic, SliceGroup::NonTail);
        let info = binding
            .services()
            .tiling
            .calculate(node, group)?
            .ok_or_else(|| SliceError::mismatch(&node.name, "tiling info", 1, 0))?;
        if info.tiling_size > self.tiling_limit {
            return Err(SliceError::mismatch(&node.name, "tiling data", self.tiling_limit, info.tiling_size));
        }
        Ok(info)
    }
}

fn take_done(slot: &Mutex<Option<DoneCallback>>) -> Option<DoneCallback> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
}

impl Default for MixL2Task {
    fn default() -> Self {
        Self::new()
    }
}

impl SubTask for MixL2Task {
    fn engine_type(&self) -> EngineType {
        EngineType::MixL2
    }

    fn addressing(&self) -> AddressingScheme {
        AddressingScheme::Explicit
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn load(&mut self, model: &TaskModel, node_name: &str) -> SliceResult<()> {
        let binding = Binding::bind(model, node_name, EngineType::MixL2)?;
        let node = binding.node();
        if binding.parent.mix_l2.is_none() {
            return Err(SliceError::MissingTaskDef {
                node: node.name.clone(),
                what: "mix l2 task",
            });
        }
        let size = node.int_attr(OP_PARA_SIZE_ATTR).unwrap_or(0);
        if size < 0 {
            return Err(SliceError::InvalidParam {
                node: node.name.clone(),
                name: OP_PARA_SIZE_ATTR,
                value: size,
            });
        }
        self.tiling_limit = size as usize;
        self.binding = Some(binding);
        self.descriptor = TaskDescriptor::default();
        self.args = ArgsBuffer::default();
        self.stage = Stage::Loaded;
        Ok(())
    }

    fn update_tiling_data(&mut self, ctx: &mut dyn TaskContext) -> SliceResult<()> {
        let binding = bound(&self.binding, self.stage, "update tiling data")?.clone();
        let (descriptor, args) = match self.build(&binding, ctx) {
            Ok(built) => built,
            Err(err) => {
                self.stage = Stage::Loaded;
                return Err(err);
            }
        };
        self.descriptor = descriptor;
        self.args = args;
        self.stage = Stage::Built;
        let hw_task = binding.updater.finalize(binding.node(), &self.descriptor)?;
        self.descriptor.hw_task = Some(hw_task);
        Ok(())
    }

    // copy, launch, then chain `done` onto the stream's completion
    fn execute_async(
        &mut self,
        ctx: &mut dyn TaskContext,
        done: Option<DoneCallback>,
    ) -> SliceResult<Option<DoneCallback>> {
        let node = self.binding.as_ref().map(|b| b.node().name.as_str()).unwrap_or_default();
        let hw_task = dispatchable(self.stage, &self.descriptor, node)?;
        let (runtime, stream) = (ctx.runtime(), ctx.stream());
        if !self.args.is_empty() {
            let code = runtime.copy_host_to_device(self.descriptor.region_base, self.args.as_bytes(), stream);
            check_rt(code, "memcpy_async")?;
        }
        check_rt(runtime.launch_task(&hw_task, stream), "task_launch")?;
        // the task is on the stream now; a retry must go through a rebuild
        self.stage = Stage::Launched;

        let done = Arc::new(Mutex::new(done));
        let hook = Arc::clone(&done);
        let code = runtime.register_callback(
            stream,
            Box::new(move |code| {
                if let Some(done) = take_done(&hook) {
                    done(check_rt(code, "task_completion"));
                }
            }),
        );
        if code != 0 {
            if let Some(done) = take_done(&done) {
                done(check_rt(code, "callback_launch"));
            }
            return Err(SliceError::Runtime { op: "callback_launch", code });
        }
        Ok(None)
    }

    fn descriptor(&self) -> Option<&TaskDescriptor> {
        matches!(self.stage, Stage::Built | Stage::Launched).then_some(&self.descriptor)
    }

    fn host_args(&self) -> &[u8] {
        match self.stage {
            Stage::Built | Stage::Launched => self.args.as_bytes(),
            _ => &[],
        }
    }
}
