use log::debug;

use crate::align::{align_up_to, WORD_SIZE};
use crate::collab::TaskContext;
use crate::descriptor::{resolve_entry, DescriptorBuilder, TaskDescriptor};
use crate::error::{SliceError, SliceResult};
use crate::model::{DevicePtr, Engine, EngineType, NodeDesc, TaskModel};
use crate::params::{SliceGroup, TilingGroup};

use super::{bound, dispatchable, AddressingScheme, Binding, DoneCallback, Stage, SubTask};

/// Bytes of the parameter head that opens the scalar engine's args block:
/// `length: u32, io_addr_num: u32, ext_info_length: u32, reserved: u32,
/// ext_info_addr: u64`, all little-endian.
pub const PARAM_HEAD_BYTES: usize = 24;

/// Op run by the scalar engine. Nothing is replicated per thread: the
/// input and output addresses are written once after the parameter head,
/// followed by the ext-info region.
pub struct AicpuTask {
    binding: Option<Binding>,
    stage: Stage,
    descriptor: TaskDescriptor,
    block: Vec<u8>,
}

impl AicpuTask {
    pub fn new() -> Self {
        AicpuTask {
            binding: None,
            stage: Stage::Unloaded,
            descriptor: TaskDescriptor::default(),
            block: Vec::new(),
        }
    }

    fn build(&self, binding: &Binding, ctx: &mut dyn TaskContext) -> SliceResult<(TaskDescriptor, Vec<u8>)> {
        let node = binding.node();
        let services = binding.services();
        let updater = &*binding.updater;

        services.partitioner.partition(node)?;
        let group = TilingGroup::new(Engine::Aicpu, SliceGroup::NonTail);
        let tiling = services.tiling.calculate(node, group)?.into_iter().collect::<Vec<_>>();
        let Some(first) = tiling.first() else {
            return Err(SliceError::mismatch(&node.name, "tiling info", 1, 0));
        };
        let entry = resolve_entry(updater, node, Engine::Aicpu, first.tiling_key, first.tiling_key)?;

        let params = updater.thread_slice_params(node, &tiling)?;
        if params.thread_dim == 0 {
            return Err(SliceError::ZeroThreadDim(node.name.clone()));
        }
        let (inputs, outputs) = binding.io_addrs(&*ctx)?;
        let io_count = inputs.len() + outputs.len();
        let needed = PARAM_HEAD_BYTES + io_count * WORD_SIZE;
        if params.args_size < needed {
            return Err(SliceError::mismatch(&node.name, "aicpu args", needed, params.args_size));
        }

        let args_region = align_up_to(params.args_size, services.config.align_bytes);
        let mut block = vec![0u8; args_region + params.ext_info_size];
        let base = ctx.allocate_workspace(block.len())?;
        let ext_info_addr = base + args_region as u64;

        let head = ParamHead {
            length: narrow(node, "aicpu args", params.args_size)?,
            io_addr_num: narrow(node, "aicpu io addresses", io_count)?,
            ext_info_length: narrow(node, "aicpu ext info", params.ext_info_size)?,
            ext_info_addr,
        };
        head.write(&mut block[..PARAM_HEAD_BYTES]);
        for (i, addr) in inputs.iter().chain(&outputs).enumerate() {
            let at = PARAM_HEAD_BYTES + i * WORD_SIZE;
            block[at..at + WORD_SIZE].copy_from_slice(&addr.to_le_bytes());
        }

        debug!(
            "{}: aicpu args {} bytes, ext info {} bytes at {:#x}",
            node.name, params.args_size, params.ext_info_size, ext_info_addr
        );
        let descriptor = DescriptorBuilder::new(params.thread_dim)
            .entry(entry)
            .io(&inputs, &outputs)
            .workspace_sizes(&first.workspace_sizes)
            .region(base, 0)
            .ext_info(ext_info_addr)
            .build();
        Ok((descriptor, block))
    }
}

impl Default for AicpuTask {
    fn default() -> Self {
        Self::new()
    }
}

struct ParamHead {
    length: u32,
    io_addr_num: u32,
    ext_info_length: u32,
    ext_info_addr: DevicePtr,
}

impl ParamHead {
    fn write(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.length.to_le_bytes());
        dst[4..8].copy_from_slice(&self.io_addr_num.to_le_bytes());
        dst[8..12].copy_from_slice(&self.ext_info_length.to_le_bytes());
        dst[12..16].fill(0);
        dst[16..24].copy_from_slice(&self.ext_info_addr.to_le_bytes());
    }
}

fn narrow(node: &NodeDesc, what: &'static str, value: usize) -> SliceResult<u32> {
    u32::try_from(value).map_err(|_| SliceError::mismatch(&node.name, what, u32::MAX as usize, value))
}

impl SubTask for AicpuTask {
    fn engine_type(&self) -> EngineType {
        EngineType::Aicpu
    }

    fn addressing(&self) -> AddressingScheme {
        AddressingScheme::Direct
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn load(&mut self, model: &TaskModel, node_name: &str) -> SliceResult<()> {
        self.binding = Some(Binding::bind(model, node_name, EngineType::Aicpu)?);
        self.descriptor = TaskDescriptor::default();
        self.block.clear();
        self.stage = Stage::Loaded;
        Ok(())
    }

    fn update_tiling_data(&mut self, ctx: &mut dyn TaskContext) -> SliceResult<()> {
        let binding = bound(&self.binding, self.stage, "update tiling data")?.clone();
        let (descriptor, block) = match self.build(&binding, ctx) {
            Ok(built) => built,
            Err(err) => {
                self.stage = Stage::Loaded;
                return Err(err);
            }
        };
        self.descriptor = descriptor;
        self.block = block;
        self.stage = Stage::Built;
        let hw_task = binding.updater.finalize(binding.node(), &self.descriptor)?;
        self.descriptor.hw_task = Some(hw_task);
        Ok(())
    }

    // the scalar engine's block is consumed by the parent's launch; nothing
    // is copied from here yet
    fn execute_async(
        &mut self,
        _ctx: &mut dyn TaskContext,
        done: Option<DoneCallback>,
    ) -> SliceResult<Option<DoneCallback>> {
        let node = self.binding.as_ref().map(|b| b.node().name.as_str()).unwrap_or_default();
        dispatchable(self.stage, &self.descriptor, node)?;
        self.stage = Stage::Launched;
        Ok(done)
    }

    fn descriptor(&self) -> Option<&TaskDescriptor> {
        matches!(self.stage, Stage::Built | Stage::Launched).then_some(&self.descriptor)
    }

    fn host_args(&self) -> &[u8] {
        match self.stage {
            Stage::Built | Stage::Launched => &self.block,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_layout() {
        let mut buf = [0xffu8; PARAM_HEAD_BYTES];
        ParamHead {
            length: 0x40,
            io_addr_num: 3,
            ext_info_length: 16,
            ext_info_addr: 0x1122_3344_5566_7788,
        }
        .write(&mut buf);
        assert_eq!(&buf[0..4], &[0x40, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[3, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[16, 0, 0, 0]);
        assert_eq!(&buf[12..16], &[0; 4]);
        assert_eq!(u64::from_le_bytes(buf[16..24].try_into().unwrap()), 0x1122_3344_5566_7788);
    }
}
