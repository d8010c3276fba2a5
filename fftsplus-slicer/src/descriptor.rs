use smallvec::SmallVec;

use crate::collab::ContextUpdater;
use crate::error::SliceResult;
use crate::model::{DevicePtr, Engine, NodeDesc};

/// Device entry of a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEntry {
    pub addr: DevicePtr,
    /// instruction cache lines fetched ahead of `addr`
    pub prefetch: u32,
}

/// Start addresses one engine jumps to, per slice kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineEntry {
    pub engine: Engine,
    pub non_tail_start: DevicePtr,
    pub tail_start: DevicePtr,
    pub prefetch: u32,
}

/// Device addresses of the tiling blobs one engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingPtrs {
    pub engine: Engine,
    pub non_tail: DevicePtr,
    pub tail: DevicePtr,
}

/// Opaque dispatch object produced by an engine's context updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwTaskHandle(pub u64);

/// Engine-facing hardware task description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub thread_dim: u32,
    pub entries: SmallVec<[EngineEntry; 2]>,
    pub input_addrs: Vec<DevicePtr>,
    pub output_addrs: Vec<DevicePtr>,
    pub workspace_sizes: SmallVec<[i64; 4]>,
    /// start of the device argument region (tiling data first)
    pub region_base: DevicePtr,
    /// start of the per-thread address table, past the tiling data
    pub args_ptr: DevicePtr,
    pub tiling_ptrs: SmallVec<[TilingPtrs; 2]>,
    pub ext_info_ptr: Option<DevicePtr>,
    pub hw_task: Option<HwTaskHandle>,
}

impl TaskDescriptor {
    pub fn entry(&self, engine: Engine) -> Option<&EngineEntry> {
        self.entries.iter().find(|e| e.engine == engine)
    }

    pub fn tiling_ptrs(&self, engine: Engine) -> Option<&TilingPtrs> {
        self.tiling_ptrs.iter().find(|t| t.engine == engine)
    }
}

/// Assembles a `TaskDescriptor` step by step during a build.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    desc: TaskDescriptor,
}

impl DescriptorBuilder {
    pub fn new(thread_dim: u32) -> Self {
        let mut builder = Self::default();
        builder.desc.thread_dim = thread_dim;
        builder
    }

    pub fn entry(mut self, entry: EngineEntry) -> Self {
        self.desc.entries.push(entry);
        self
    }

    pub fn entries(mut self, entries: impl IntoIterator<Item = EngineEntry>) -> Self {
        self.desc.entries.extend(entries);
        self
    }

    pub fn io(mut self, inputs: &[DevicePtr], outputs: &[DevicePtr]) -> Self {
        self.desc.input_addrs = inputs.to_vec();
        self.desc.output_addrs = outputs.to_vec();
        self
    }

    pub fn workspace_sizes(mut self, sizes: &[i64]) -> Self {
        self.desc.workspace_sizes = sizes.into();
        self
    }

    // `base` holds `tiling_bytes` of tiling data followed by the address table
    pub fn region(mut self, base: DevicePtr, tiling_bytes: usize) -> Self {
        self.desc.region_base = base;
        self.desc.args_ptr = base + tiling_bytes as u64;
        self
    }

    pub fn tiling_ptrs(mut self, ptrs: TilingPtrs) -> Self {
        self.desc.tiling_ptrs.push(ptrs);
        self
    }

    pub fn ext_info(mut self, ptr: DevicePtr) -> Self {
        self.desc.ext_info_ptr = Some(ptr);
        self
    }

    pub fn build(self) -> TaskDescriptor {
        self.desc
    }
}

/// Resolve both start addresses of one engine by tiling key.
///
/// Equal keys share a single lookup. Distinct keys are looked up
/// separately and prefetch takes the smaller count, so neither slice
/// prefetches past the shorter kernel.
pub fn resolve_entry(
    updater: &dyn ContextUpdater,
    node: &NodeDesc,
    engine: Engine,
    non_tail_key: u64,
    tail_key: u64,
) -> SliceResult<EngineEntry> {
    let non_tail = updater.entry_and_prefetch(node, non_tail_key, engine)?;
    if non_tail_key == tail_key {
        return Ok(EngineEntry {
            engine,
            non_tail_start: non_tail.addr,
            tail_start: non_tail.addr,
            prefetch: non_tail.prefetch,
        });
    }
    let tail = updater.entry_and_prefetch(node, tail_key, engine)?;
    Ok(EngineEntry {
        engine,
        non_tail_start: non_tail.addr,
        tail_start: tail.addr,
        prefetch: non_tail.prefetch.min(tail.prefetch),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SliceError;
    use crate::params::{ThreadSliceParameters, TilingRunInfo};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct KeyTable {
        entries: HashMap<u64, KernelEntry>,
        lookups: AtomicUsize,
    }

    impl KeyTable {
        fn new(entries: &[(u64, u64, u32)]) -> Self {
            KeyTable {
                entries: entries
                    .iter()
                    .map(|&(key, addr, prefetch)| (key, KernelEntry { addr, prefetch }))
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl ContextUpdater for KeyTable {
        fn thread_slice_params(&self, _: &NodeDesc, _: &[TilingRunInfo]) -> SliceResult<ThreadSliceParameters> {
            unreachable!()
        }
        fn entry_and_prefetch(&self, node: &NodeDesc, key: u64, _: Engine) -> SliceResult<KernelEntry> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            self.entries
                .get(&key)
                .copied()
                .ok_or_else(|| SliceError::KernelNotFound(format!("{}#{key}", node.name)))
        }
        fn finalize(&self, _: &NodeDesc, _: &TaskDescriptor) -> SliceResult<HwTaskHandle> {
            unreachable!()
        }
    }

    #[test]
    fn equal_keys_resolve_once() {
        let table = KeyTable::new(&[(7, 0x4000, 6)]);
        let node = NodeDesc::new("mm", "MatMul");
        let entry = resolve_entry(&table, &node, Engine::Aic, 7, 7).unwrap();
        assert_eq!(entry.non_tail_start, entry.tail_start);
        assert_eq!(entry.prefetch, 6);
        assert_eq!(table.lookups.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn distinct_keys_take_min_prefetch() {
        let table = KeyTable::new(&[(1, 0x4000, 5), (2, 0x8000, 3)]);
        let node = NodeDesc::new("mm", "MatMul");
        let entry = resolve_entry(&table, &node, Engine::Aiv, 1, 2).unwrap();
        assert_eq!(entry.non_tail_start, 0x4000);
        assert_eq!(entry.tail_start, 0x8000);
        assert_eq!(entry.prefetch, 3);
        assert_eq!(table.lookups.load(Ordering::Relaxed), 2);

        // order of the keys does not matter
        let entry = resolve_entry(&table, &node, Engine::Aiv, 2, 1).unwrap();
        assert_eq!(entry.prefetch, 3);
    }

    #[test]
    fn missing_tail_key_fails() {
        let table = KeyTable::new(&[(1, 0x4000, 5)]);
        let node = NodeDesc::new("mm", "MatMul");
        assert!(resolve_entry(&table, &node, Engine::Aic, 1, 9).is_err());
    }

    #[test]
    fn builder_places_address_table_after_tiling() {
        let desc = DescriptorBuilder::new(4).region(0x1000, 64).build();
        assert_eq!(desc.args_ptr, 0x1040);
        assert_eq!(desc.thread_dim, 4);
        assert!(desc.hw_task.is_none());
    }
}
