use crate::collab::TaskContext;
use crate::descriptor::TaskDescriptor;
use crate::error::SliceResult;
use crate::model::{EngineType, TaskModel};

use super::{AddressingScheme, DoneCallback, PerThreadTask, Stage, SubTask};

/// Op whose slices run on the cube and vector engines together. Each thread
/// row carries one tiling pointer per engine.
pub struct MixAicAivTask {
    inner: PerThreadTask,
}

impl MixAicAivTask {
    pub fn mix_aic() -> Self {
        MixAicAivTask { inner: PerThreadTask::new(EngineType::MixAic) }
    }

    pub fn mix_aiv() -> Self {
        MixAicAivTask { inner: PerThreadTask::new(EngineType::MixAiv) }
    }
}

impl SubTask for MixAicAivTask {
    fn engine_type(&self) -> EngineType {
        self.inner.engine_type()
    }

    fn addressing(&self) -> AddressingScheme {
        AddressingScheme::PerThread
    }

    fn stage(&self) -> Stage {
        self.inner.stage()
    }

    fn load(&mut self, model: &TaskModel, node_name: &str) -> SliceResult<()> {
        self.inner.load(model, node_name)
    }

    fn update_tiling_data(&mut self, ctx: &mut dyn TaskContext) -> SliceResult<()> {
        let policy = self
            .inner
            .binding()
            .map(|b| b.services().config.mix_undersized_tiling)
            .unwrap_or_default();
        self.inner.update_tiling_data(ctx, policy)
    }

    fn execute_async(
        &mut self,
        ctx: &mut dyn TaskContext,
        done: Option<DoneCallback>,
    ) -> SliceResult<Option<DoneCallback>> {
        self.inner.execute_async(ctx, done)
    }

    fn descriptor(&self) -> Option<&TaskDescriptor> {
        self.inner.descriptor()
    }

    fn host_args(&self) -> &[u8] {
        self.inner.host_args()
    }
}
