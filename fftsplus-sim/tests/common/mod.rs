#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use fftsplus_sim::SimServices;
use fftsplus_slicer::{
    DoneCallback, Engine, KernelEntry, NodeDesc, ParentTask, SliceGroup, SliceResult, SlicerConfig, TaskModel,
    ThreadSliceParameters, TilingGroup, TilingRunInfo,
};

pub fn blob(engine: Engine, slice: SliceGroup, data: &[u8], key: u64) -> TilingRunInfo {
    TilingRunInfo::new(TilingGroup::new(engine, slice), data.to_vec(), key)
}

pub fn entry(addr: u64, prefetch: u32) -> KernelEntry {
    KernelEntry { addr, prefetch }
}

/// Argument buffer bytes back as slot words.
pub fn words(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|w| u64::from_ne_bytes(w.try_into().unwrap()))
        .collect()
}

/// One parent task named after `node`, bound to fresh fakes.
pub fn model_with(node: NodeDesc, params: ThreadSliceParameters, config: SlicerConfig) -> (TaskModel, SimServices) {
    let sim = SimServices::new(params);
    let mut model = TaskModel::new();
    model.insert(ParentTask::new(node, Arc::new(sim.services(config))));
    (model, sim)
}

/// Completion hook that parks its status for the test to inspect.
pub fn recorder() -> (DoneCallback, Arc<Mutex<Option<SliceResult<()>>>>) {
    let slot = Arc::new(Mutex::new(None));
    let hook = Arc::clone(&slot);
    let done: DoneCallback = Box::new(move |status| {
        *hook.lock().unwrap() = Some(status);
    });
    (done, slot)
}
