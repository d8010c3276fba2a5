//! The slice of the graph model a sub-task needs: node descriptions, engine
//! tags, and the table of compiled parent tasks that `load` binds against.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::collab::Services;

/// Device virtual address.
pub type DevicePtr = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub u32);

/// Physical execution engine of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// cube (matrix) engine
    Aic,
    /// vector engine
    Aiv,
    /// general purpose scalar engine
    Aicpu,
}

impl Engine {
    // kernel name prefix used by the cache-resident mixed mode
    pub fn mix_prefix(self) -> &'static str {
        match self {
            Engine::Aic => "mix_aic_",
            Engine::Aiv => "mix_aiv_",
            Engine::Aicpu => "",
        }
    }
}

/// Engine mode a sub-task is created for, keyed by its string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Aic,
    Aiv,
    MixAic,
    MixAiv,
    Aicpu,
    MixL2,
}

impl EngineType {
    pub const ALL: [EngineType; 6] = [
        EngineType::Aic,
        EngineType::Aiv,
        EngineType::MixAic,
        EngineType::MixAiv,
        EngineType::Aicpu,
        EngineType::MixL2,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            EngineType::Aic => "AIC",
            EngineType::Aiv => "AIV",
            EngineType::MixAic => "MIX_AIC",
            EngineType::MixAiv => "MIX_AIV",
            EngineType::Aicpu => "AICPU",
            EngineType::MixL2 => "MIX_L2",
        }
    }

    pub fn from_tag(tag: &str) -> Option<EngineType> {
        EngineType::ALL.into_iter().find(|ty| ty.tag() == tag)
    }

    // engines that run a slice of this mode, in argument order
    pub fn engines(self) -> SmallVec<[Engine; 2]> {
        match self {
            EngineType::Aic => smallvec::smallvec![Engine::Aic],
            EngineType::Aiv => smallvec::smallvec![Engine::Aiv],
            EngineType::MixAic | EngineType::MixAiv | EngineType::MixL2 => {
                smallvec::smallvec![Engine::Aic, Engine::Aiv]
            }
            EngineType::Aicpu => smallvec::smallvec![Engine::Aicpu],
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Static description of one operator node.
#[derive(Debug, Clone, Default)]
pub struct NodeDesc {
    pub name: String,
    pub op_type: String,
    pub kernel_name: String,
    pub input_count: usize,
    pub output_count: usize,
    pub attrs: HashMap<String, i64>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        NodeDesc {
            name: name.into(),
            op_type: op_type.into(),
            ..NodeDesc::default()
        }
    }

    pub fn with_io(mut self, inputs: usize, outputs: usize) -> Self {
        self.input_count = inputs;
        self.output_count = outputs;
        self
    }

    pub fn with_kernel(mut self, kernel_name: impl Into<String>) -> Self {
        self.kernel_name = kernel_name.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: i64) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn int_attr(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).copied()
    }
}

/// Compiled task definition of a cache-resident mixed node: the address
/// list is fixed at compile time instead of derived from node I/O.
#[derive(Debug, Clone, Default)]
pub struct MixL2TaskDef {
    /// fixed-position slots at the head of the address list
    pub mode_addrs: SmallVec<[DevicePtr; 2]>,
    pub io_addrs: Vec<DevicePtr>,
}

/// Compiled state of the parent node task, shared read-only by every
/// sub-task bound to it.
pub struct ParentTask {
    pub node: NodeDesc,
    pub services: Arc<Services>,
    pub mix_l2: Option<MixL2TaskDef>,
}

impl ParentTask {
    pub fn new(node: NodeDesc, services: Arc<Services>) -> Self {
        ParentTask { node, services, mix_l2: None }
    }

    pub fn with_mix_l2(mut self, def: MixL2TaskDef) -> Self {
        self.mix_l2 = Some(def);
        self
    }
}

/// Node name -> compiled parent task.
#[derive(Default)]
pub struct TaskModel {
    parents: HashMap<String, Arc<ParentTask>>,
}

impl TaskModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parent: ParentTask) -> Arc<ParentTask> {
        let parent = Arc::new(parent);
        self.parents.insert(parent.node.name.clone(), Arc::clone(&parent));
        parent
    }

    pub fn find(&self, node_name: &str) -> Option<Arc<ParentTask>> {
        self.parents.get(node_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for ty in EngineType::ALL {
            assert_eq!(EngineType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(EngineType::from_tag("DSA"), None);
    }

    #[test]
    fn mixed_modes_use_both_engines() {
        assert_eq!(EngineType::MixAiv.engines().as_slice(), &[Engine::Aic, Engine::Aiv]);
        assert_eq!(EngineType::Aiv.engines().as_slice(), &[Engine::Aiv]);
    }
}
