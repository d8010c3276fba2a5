use std::fmt;

use smallvec::SmallVec;

use crate::error::{SliceError, SliceResult};
use crate::model::{Engine, NodeDesc};

/// Which parallel slice a tiling result describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceGroup {
    /// the common slice run by every thread but the last
    NonTail,
    /// the remainder slice run by the last thread
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingGroup {
    pub engine: Engine,
    pub slice: SliceGroup,
}

impl TilingGroup {
    pub fn new(engine: Engine, slice: SliceGroup) -> Self {
        TilingGroup { engine, slice }
    }

    // non-tail then tail for every engine, in engine order
    pub fn per_thread(engines: &[Engine]) -> SmallVec<[TilingGroup; 4]> {
        engines
            .iter()
            .flat_map(|&e| [TilingGroup::new(e, SliceGroup::NonTail), TilingGroup::new(e, SliceGroup::Tail)])
            .collect()
    }
}

impl fmt::Display for TilingGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.engine, self.slice)
    }
}

/// Result of one tiling calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingRunInfo {
    pub group: TilingGroup,
    pub tiling_data: Vec<u8>,
    /// length the calculator declared for `tiling_data`
    pub tiling_size: usize,
    pub workspace_sizes: SmallVec<[i64; 4]>,
    pub tiling_key: u64,
}

impl TilingRunInfo {
    pub fn new(group: TilingGroup, tiling_data: Vec<u8>, tiling_key: u64) -> Self {
        TilingRunInfo {
            group,
            tiling_size: tiling_data.len(),
            tiling_data,
            workspace_sizes: SmallVec::new(),
            tiling_key,
        }
    }

    pub fn with_workspaces(mut self, sizes: &[i64]) -> Self {
        self.workspace_sizes = sizes.into();
        self
    }
}

/// How an op is split into parallel hardware slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSliceParameters {
    pub thread_dim: u32,
    pub addressable_slot_count: usize,
    /// bytes added to a slot's base address per thread index
    pub per_slot_stride: Vec<u64>,
    pub args_size: usize,
    pub ext_info_size: usize,
}

impl ThreadSliceParameters {
    pub fn new(thread_dim: u32, per_slot_stride: Vec<u64>) -> Self {
        ThreadSliceParameters {
            thread_dim,
            addressable_slot_count: per_slot_stride.len(),
            per_slot_stride,
            ..Self::default()
        }
    }

    // scalar engine parameters: no per-thread table
    pub fn scalar(thread_dim: u32, args_size: usize, ext_info_size: usize) -> Self {
        ThreadSliceParameters {
            thread_dim,
            args_size,
            ext_info_size,
            ..Self::default()
        }
    }

    pub fn thread_dim(&self) -> usize {
        self.thread_dim as usize
    }

    // reject parameters that cannot drive a per-thread address table
    pub fn validate(&self, node: &NodeDesc, slot_count: usize) -> SliceResult<()> {
        if self.thread_dim == 0 {
            return Err(SliceError::ZeroThreadDim(node.name.clone()));
        }
        if self.addressable_slot_count != slot_count {
            return Err(SliceError::mismatch(
                &node.name,
                "addressable slot count",
                slot_count,
                self.addressable_slot_count,
            ));
        }
        if self.per_slot_stride.len() != slot_count {
            return Err(SliceError::mismatch(
                &node.name,
                "address offset table",
                slot_count,
                self.per_slot_stride.len(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn per_thread_groups_order() {
        let groups = TilingGroup::per_thread(&[Engine::Aic, Engine::Aiv]);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[1], TilingGroup::new(Engine::Aic, SliceGroup::Tail));
        assert_eq!(groups[2], TilingGroup::new(Engine::Aiv, SliceGroup::NonTail));
    }

    #[test]
    fn validate_rules() {
        let node = NodeDesc::new("add", "Add");
        assert!(ThreadSliceParameters::new(4, vec![0, 64, 64]).validate(&node, 3).is_ok());

        let err = ThreadSliceParameters::new(0, vec![0; 3]).validate(&node, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);

        let err = ThreadSliceParameters::new(2, vec![0; 2]).validate(&node, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mismatch);

        // stride table disagrees with the declared slot count
        let mut params = ThreadSliceParameters::new(2, vec![0; 3]);
        params.per_slot_stride.pop();
        let err = params.validate(&node, 3).unwrap_err();
        assert!(matches!(err, SliceError::SizeMismatch { what: "address offset table", .. }));
    }
}
