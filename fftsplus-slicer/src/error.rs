use thiserror::Error;

use crate::subtask::Stage;

/// Raw status code returned by the device runtime (0 is success).
pub type RtCode = i32;

pub type SliceResult<T> = Result<T, SliceError>;

/// Coarse failure class, used by callers that only care how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// bad declared parameter or missing binding; nothing was built
    Config,
    /// inconsistent counts or lengths between build inputs
    Mismatch,
    /// a collaborator produced nothing usable
    Resolution,
    /// the device runtime rejected a call
    Launch,
    /// operation called out of order
    State,
}

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("invalid attribute `{name}` on node {node}: {value}")]
    InvalidParam {
        node: String,
        name: &'static str,
        value: i64,
    },
    #[error("invalid slicer configuration: {0}")]
    InvalidConfig(String),
    #[error("no compiled parent task found for node {0}")]
    ParentNotFound(String),
    #[error("node {node} has no compiled {what} definition")]
    MissingTaskDef { node: String, what: &'static str },
    #[error("no context updater registered for engine tag {0}")]
    UpdaterNotFound(String),
    #[error("unsupported engine type tag {0}")]
    Unsupported(String),
    #[error("{what} size mismatch on node {node}: expected {expected}, got {actual}")]
    SizeMismatch {
        node: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("short tiling copy for {group}: expected {expected} bytes, copied {copied}")]
    ShortCopy {
        group: String,
        expected: usize,
        copied: usize,
    },
    #[error("thread dim resolved to zero for node {0}")]
    ZeroThreadDim(String),
    #[error("kernel {0} not found in binary store")]
    KernelNotFound(String),
    #[error("{service} failed for node {node}: {reason}")]
    Collaborator {
        service: &'static str,
        node: String,
        reason: String,
    },
    #[error("runtime call {op} failed with code {code}")]
    Runtime { op: &'static str, code: RtCode },
    #[error("cannot {op} while sub-task is {stage:?}")]
    InvalidStage { op: &'static str, stage: Stage },
    #[error("sub-task for node {0} was built without a dispatch object")]
    NotFinalized(String),
}

impl SliceError {
    pub fn collaborator(service: &'static str, node: &str, reason: impl Into<String>) -> Self {
        SliceError::Collaborator {
            service,
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mismatch(node: &str, what: &'static str, expected: usize, actual: usize) -> Self {
        SliceError::SizeMismatch {
            node: node.to_string(),
            what,
            expected,
            actual,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use SliceError::*;
        match self {
            InvalidParam { .. } | InvalidConfig(_) | ParentNotFound(_) | MissingTaskDef { .. }
            | UpdaterNotFound(_) | Unsupported(_) => ErrorKind::Config,
            SizeMismatch { .. } | ShortCopy { .. } => ErrorKind::Mismatch,
            ZeroThreadDim(_) | KernelNotFound(_) | Collaborator { .. } => ErrorKind::Resolution,
            Runtime { .. } => ErrorKind::Launch,
            InvalidStage { .. } | NotFinalized(_) => ErrorKind::State,
        }
    }
}

// lift a runtime status code into a result
pub fn check_rt(code: RtCode, op: &'static str) -> SliceResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(SliceError::Runtime { op, code })
    }
}
