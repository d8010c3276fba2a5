use std::collections::HashMap;

use crate::error::{SliceError, SliceResult};
use crate::model::EngineType;
use crate::subtask::{AicAivTask, AicpuTask, MixAicAivTask, MixL2Task, SubTask};

/// Zero-argument sub-task constructor.
pub type SubTaskCtor = fn() -> Box<dyn SubTask>;

/// Engine tag -> sub-task constructor.
#[derive(Default, Clone)]
pub struct SubTaskFactory {
    ctors: HashMap<String, SubTaskCtor>,
}

impl SubTaskFactory {
    pub fn new() -> Self {
        Self::default()
    }

    // every variant shipped with the crate, under its engine tag
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        let builtin: [(EngineType, SubTaskCtor); 6] = [
            (EngineType::Aic, || Box::new(AicAivTask::aic()) as Box<dyn SubTask>),
            (EngineType::Aiv, || Box::new(AicAivTask::aiv()) as Box<dyn SubTask>),
            (EngineType::MixAic, || Box::new(MixAicAivTask::mix_aic()) as Box<dyn SubTask>),
            (EngineType::MixAiv, || Box::new(MixAicAivTask::mix_aiv()) as Box<dyn SubTask>),
            (EngineType::Aicpu, || Box::new(AicpuTask::new()) as Box<dyn SubTask>),
            (EngineType::MixL2, || Box::new(MixL2Task::new()) as Box<dyn SubTask>),
        ];
        for (ty, ctor) in builtin {
            factory.register(ty.tag(), Some(ctor));
        }
        factory
    }

    /// Register `ctor` under `tag`. Returns whether it was taken: a `None`
    /// constructor is ignored and the first registration for a tag wins.
    pub fn register(&mut self, tag: impl Into<String>, ctor: Option<SubTaskCtor>) -> bool {
        let Some(ctor) = ctor else { return false };
        let tag = tag.into();
        if self.ctors.contains_key(&tag) {
            return false;
        }
        self.ctors.insert(tag, ctor);
        true
    }

    pub fn create(&self, tag: &str) -> Option<Box<dyn SubTask>> {
        self.ctors.get(tag).map(|ctor| ctor())
    }

    pub fn try_create(&self, tag: &str) -> SliceResult<Box<dyn SubTask>> {
        self.create(tag).ok_or_else(|| SliceError::Unsupported(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::subtask::{AddressingScheme, Stage};

    #[test]
    fn builtin_tags() {
        let factory = SubTaskFactory::with_builtin();
        for ty in EngineType::ALL {
            let task = factory.create(ty.tag()).unwrap();
            assert_eq!(task.engine_type(), ty);
            assert_eq!(task.stage(), Stage::Unloaded);
        }
        assert_eq!(factory.create("AICPU").unwrap().addressing(), AddressingScheme::Direct);
        assert_eq!(factory.create("MIX_L2").unwrap().addressing(), AddressingScheme::Explicit);
    }

    #[test]
    fn unknown_tag() {
        let factory = SubTaskFactory::with_builtin();
        assert!(factory.create("DSA").is_none());
        let err = factory.try_create("DSA").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn first_registration_wins() {
        let mut factory = SubTaskFactory::new();
        assert!(!factory.register("AIC", None));
        assert!(factory.create("AIC").is_none());
        let aiv: SubTaskCtor = || Box::new(AicAivTask::aiv());
        let aic: SubTaskCtor = || Box::new(AicAivTask::aic());
        assert!(factory.register("AIC", Some(aiv)));
        assert!(!factory.register("AIC", Some(aic)));
        assert_eq!(factory.create("AIC").unwrap().engine_type(), EngineType::Aiv);
    }

    #[test]
    fn instances_are_independent() {
        let factory = SubTaskFactory::with_builtin();
        let a = factory.create("AIV").unwrap();
        let b = factory.create("AIV").unwrap();
        assert!(a.descriptor().is_none() && b.descriptor().is_none());
        assert!(a.host_args().is_empty());
    }
}
