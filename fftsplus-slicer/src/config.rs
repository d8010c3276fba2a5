use crate::align::DMA_ALIGN;
use crate::error::{SliceError, SliceResult};

/// What the mixed dual-engine variant does when the tiling calculator
/// hands back fewer tiling infos than its four thread groups.
///
/// The single-engine variant always fails in that situation. The mixed
/// variant historically reported success without building anything, and
/// that behavior is kept as the default until its owners decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndersizedTilingPolicy {
    /// report success, leave the sub-task unbuilt
    #[default]
    Defer,
    /// treat it as a size mismatch, like the single-engine variant
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicerConfig {
    /// granularity every tiling blob offset is aligned to
    pub align_bytes: usize,
    pub mix_undersized_tiling: UndersizedTilingPolicy,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        SlicerConfig {
            align_bytes: DMA_ALIGN,
            mix_undersized_tiling: UndersizedTilingPolicy::default(),
        }
    }
}

impl SlicerConfig {
    pub fn with_align_bytes(mut self, align_bytes: usize) -> Self {
        self.align_bytes = align_bytes;
        self
    }

    pub fn with_mix_undersized_tiling(mut self, policy: UndersizedTilingPolicy) -> Self {
        self.mix_undersized_tiling = policy;
        self
    }

    // word-aligned power of two, otherwise tiling offsets would split a slot
    pub fn validate(&self) -> SliceResult<()> {
        if !self.align_bytes.is_power_of_two() || self.align_bytes < crate::align::WORD_SIZE {
            return Err(SliceError::InvalidConfig(format!(
                "align_bytes must be a power of two no smaller than a word, got {}",
                self.align_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn default_keeps_deferral() {
        let cfg = SlicerConfig::default();
        assert_eq!(cfg.align_bytes, 32);
        assert_eq!(cfg.mix_undersized_tiling, UndersizedTilingPolicy::Defer);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_odd_alignment() {
        let err = SlicerConfig::default().with_align_bytes(24).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(SlicerConfig::default().with_align_bytes(4).validate().is_err());
        assert!(SlicerConfig::default().with_align_bytes(64).validate().is_ok());
    }
}
