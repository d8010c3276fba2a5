/// DMA alignment granularity of the device, in bytes.
pub const DMA_ALIGN: usize = 32;

/// Size of one argument-buffer slot (a device address).
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

// round `bytes` up to the next multiple of the DMA granularity
pub fn align_up(bytes: usize) -> usize {
    align_up_to(bytes, DMA_ALIGN)
}

// round `bytes` up to the next multiple of `granularity` (a power of two)
pub fn align_up_to(bytes: usize, granularity: usize) -> usize {
    debug_assert!(granularity.is_power_of_two());
    (bytes + granularity - 1) & !(granularity - 1)
}

// number of whole words needed to hold `bytes` once aligned
pub fn aligned_words(bytes: usize, granularity: usize) -> usize {
    align_up_to(bytes, granularity) / WORD_SIZE
}
