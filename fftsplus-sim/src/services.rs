use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

use fftsplus_slicer::collab::{ContextUpdater, KernelStore, Services, ThreadPartitioner, TilingCalculator, UpdaterRegistry};
use fftsplus_slicer::{
    Engine, EngineType, HwTaskHandle, KernelEntry, NodeDesc, SliceError, SliceResult, SlicerConfig, TaskDescriptor,
    ThreadSliceParameters, TilingGroup, TilingRunInfo,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Partitioner that only counts calls, or fails on demand.
#[derive(Default)]
pub struct ScriptedPartitioner {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedPartitioner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ThreadPartitioner for ScriptedPartitioner {
    fn partition(&self, node: &NodeDesc) -> SliceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SliceError::collaborator("thread partition", &node.name, "scripted failure"));
        }
        Ok(())
    }
}

/// Tiling results looked up by thread group. A missing group yields no op.
#[derive(Default)]
pub struct TilingTable {
    infos: Mutex<HashMap<TilingGroup, TilingRunInfo>>,
}

impl TilingTable {
    pub fn set(&self, info: TilingRunInfo) {
        locked(&self.infos).insert(info.group, info);
    }

    pub fn remove(&self, group: TilingGroup) -> Option<TilingRunInfo> {
        locked(&self.infos).remove(&group)
    }
}

impl TilingCalculator for TilingTable {
    fn calculate(&self, node: &NodeDesc, group: TilingGroup) -> SliceResult<Option<TilingRunInfo>> {
        trace!("{}: tiling for {}", node.name, group);
        Ok(locked(&self.infos).get(&group).cloned())
    }
}

/// Compiled kernels by name.
#[derive(Default)]
pub struct KernelTable {
    kernels: Mutex<HashMap<String, KernelEntry>>,
}

impl KernelTable {
    pub fn insert(&self, name: impl Into<String>, entry: KernelEntry) {
        locked(&self.kernels).insert(name.into(), entry);
    }
}

impl KernelStore for KernelTable {
    fn lookup(&self, kernel_name: &str) -> Option<KernelEntry> {
        locked(&self.kernels).get(kernel_name).copied()
    }
}

/// Context updater answering from fixed tables. Entries are keyed by
/// `(engine, tiling key)`; every finalize hands out a fresh handle and
/// keeps a copy of the descriptor it was given.
pub struct TableUpdater {
    params: Mutex<ThreadSliceParameters>,
    entries: Mutex<HashMap<(Engine, u64), KernelEntry>>,
    lookups: AtomicUsize,
    fail_finalize: AtomicBool,
    next_handle: AtomicU64,
    finalized: Mutex<Vec<TaskDescriptor>>,
}

impl TableUpdater {
    pub fn new(params: ThreadSliceParameters) -> Self {
        TableUpdater {
            params: Mutex::new(params),
            entries: Mutex::default(),
            lookups: AtomicUsize::new(0),
            fail_finalize: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            finalized: Mutex::default(),
        }
    }

    pub fn set_params(&self, params: ThreadSliceParameters) {
        *locked(&self.params) = params;
    }

    pub fn add_entry(&self, engine: Engine, tiling_key: u64, entry: KernelEntry) {
        locked(&self.entries).insert((engine, tiling_key), entry);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn finalized(&self) -> Vec<TaskDescriptor> {
        locked(&self.finalized).clone()
    }
}

impl ContextUpdater for TableUpdater {
    fn thread_slice_params(&self, _node: &NodeDesc, _tiling: &[TilingRunInfo]) -> SliceResult<ThreadSliceParameters> {
        Ok(locked(&self.params).clone())
    }

    fn entry_and_prefetch(&self, node: &NodeDesc, tiling_key: u64, engine: Engine) -> SliceResult<KernelEntry> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        locked(&self.entries)
            .get(&(engine, tiling_key))
            .copied()
            .ok_or_else(|| SliceError::KernelNotFound(format!("{}_{:?}_{}", node.kernel_name, engine, tiling_key)))
    }

    fn finalize(&self, node: &NodeDesc, descriptor: &TaskDescriptor) -> SliceResult<HwTaskHandle> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(SliceError::collaborator("context update", &node.name, "scripted failure"));
        }
        locked(&self.finalized).push(descriptor.clone());
        Ok(HwTaskHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }
}

/// The fakes of one parent task, kept reachable for inspection after they
/// are handed to the slicer as a [`Services`] bundle.
pub struct SimServices {
    pub partitioner: Arc<ScriptedPartitioner>,
    pub tiling: Arc<TilingTable>,
    pub kernels: Arc<KernelTable>,
    pub updater: Arc<TableUpdater>,
}

impl SimServices {
    pub fn new(params: ThreadSliceParameters) -> Self {
        SimServices {
            partitioner: Arc::default(),
            tiling: Arc::default(),
            kernels: Arc::default(),
            updater: Arc::new(TableUpdater::new(params)),
        }
    }

    /// Bundle with the table updater registered for every engine tag.
    pub fn services(&self, config: SlicerConfig) -> Services {
        self.services_for(config, &EngineType::ALL)
    }

    pub fn services_for(&self, config: SlicerConfig, engine_types: &[EngineType]) -> Services {
        let mut updaters = UpdaterRegistry::new();
        for ty in engine_types {
            updaters.register(ty.tag(), self.updater.clone() as Arc<dyn ContextUpdater>);
        }
        Services {
            partitioner: self.partitioner.clone(),
            tiling: self.tiling.clone(),
            kernels: self.kernels.clone(),
            updaters,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fftsplus_slicer::SliceGroup;

    #[test]
    fn missing_group_is_no_op() {
        let table = TilingTable::default();
        let node = NodeDesc::new("add", "Add");
        let group = TilingGroup::new(Engine::Aiv, SliceGroup::Tail);
        assert!(table.calculate(&node, group).unwrap().is_none());
        table.set(TilingRunInfo::new(group, vec![1, 2], 9));
        assert_eq!(table.calculate(&node, group).unwrap().unwrap().tiling_key, 9);
    }

    #[test]
    fn finalize_hands_out_fresh_handles() {
        let updater = TableUpdater::new(ThreadSliceParameters::default());
        let node = NodeDesc::new("add", "Add");
        let a = updater.finalize(&node, &TaskDescriptor::default()).unwrap();
        let b = updater.finalize(&node, &TaskDescriptor::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(updater.finalized().len(), 2);
        updater.set_fail_finalize(true);
        assert!(updater.finalize(&node, &TaskDescriptor::default()).is_err());
    }
}
