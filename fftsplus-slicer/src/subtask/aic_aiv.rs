use crate::collab::TaskContext;
use crate::config::UndersizedTilingPolicy;
use crate::descriptor::TaskDescriptor;
use crate::error::SliceResult;
use crate::model::{EngineType, TaskModel};

use super::{AddressingScheme, DoneCallback, PerThreadTask, Stage, SubTask};

/// Op sliced across threads of a single engine, cube or vector.
pub struct AicAivTask {
    inner: PerThreadTask,
}

impl AicAivTask {
    pub fn aic() -> Self {
        AicAivTask { inner: PerThreadTask::new(EngineType::Aic) }
    }

    pub fn aiv() -> Self {
        AicAivTask { inner: PerThreadTask::new(EngineType::Aiv) }
    }
}

impl SubTask for AicAivTask {
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

    // a short tiling vector is always fatal here
    fn update_tiling_data(&mut self, ctx: &mut dyn TaskContext) -> SliceResult<()> {
        self.inner.update_tiling_data(ctx, UndersizedTilingPolicy::Fail)
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
