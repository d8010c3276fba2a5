//! Typed view of the flat argument buffer copied to the device.
//!
//! ```text
//! | tiling region (packed blobs) | thread 0 row | thread 1 row | ... |
//! row = [slot 0 .. slot N-1][tiling ptr 0 .. tiling ptr T-1]
//! ```
//!
//! Every slot is one machine word. The address of slot `s` for thread `i`
//! is `base[s] + stride[s] * i`. Tiling pointers of every thread but the
//! last point at the non-tail blob, the last thread gets the tail blob.

use smallvec::SmallVec;

use crate::align::{align_up_to, WORD_SIZE};
use crate::error::{SliceError, SliceResult};
use crate::model::DevicePtr;
use crate::params::TilingRunInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgsLayout {
    pub tiling_region_words: usize,
    /// inputs + outputs + workspaces
    pub slot_count: usize,
    /// tiling pointers per thread row
    pub tiling_slots: usize,
    pub thread_dim: usize,
}

impl ArgsLayout {
    pub fn new(tiling_region_words: usize, slot_count: usize, tiling_slots: usize, thread_dim: usize) -> Self {
        ArgsLayout {
            tiling_region_words,
            slot_count,
            tiling_slots,
            thread_dim,
        }
    }

    pub fn row_words(&self) -> usize {
        self.slot_count + self.tiling_slots
    }

    pub fn total_words(&self) -> usize {
        self.tiling_region_words + self.row_words() * self.thread_dim
    }

    pub fn tiling_region_bytes(&self) -> usize {
        self.tiling_region_words * WORD_SIZE
    }

    // size of the device region backing the whole buffer
    pub fn device_bytes(&self) -> usize {
        self.total_words() * WORD_SIZE
    }

    pub fn slot_index(&self, thread: usize, slot: usize) -> usize {
        self.tiling_region_words + thread * self.row_words() + slot
    }

    pub fn tiling_index(&self, thread: usize, engine_slot: usize) -> usize {
        self.slot_index(thread, self.slot_count + engine_slot)
    }
}

/// Byte offsets of tiling blobs packed back to back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TilingPack {
    pub offsets: SmallVec<[usize; 4]>,
    pub region_bytes: usize,
}

impl TilingPack {
    // every blob starts on an `align` boundary
    pub fn new(sizes: impl IntoIterator<Item = usize>, align: usize) -> Self {
        let mut offsets = SmallVec::new();
        let mut cursor = 0;
        for size in sizes {
            offsets.push(cursor);
            cursor += align_up_to(size, align);
        }
        TilingPack {
            offsets,
            region_bytes: align_up_to(cursor, align),
        }
    }

    pub fn region_words(&self) -> usize {
        self.region_bytes / WORD_SIZE
    }
}

// memcpy that reports how many bytes actually moved
fn copy_bytes(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

/// Host side argument buffer, one `u64` per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgsBuffer {
    layout: ArgsLayout,
    words: Vec<u64>,
}

impl ArgsBuffer {
    pub fn new(layout: ArgsLayout) -> Self {
        ArgsBuffer {
            words: vec![0; layout.total_words()],
            layout,
        }
    }

    pub fn layout(&self) -> &ArgsLayout {
        &self.layout
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn tiling_region(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words[..self.layout.tiling_region_words])
    }

    fn tiling_region_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words[..self.layout.tiling_region_words])
    }

    /// Copy one tiling blob at `offset` into the tiling region.
    ///
    /// The full declared length must land; a source shorter than declared
    /// is an error, never zero padded.
    pub fn write_tiling(&mut self, offset: usize, info: &TilingRunInfo) -> SliceResult<()> {
        let expected = info.tiling_size;
        let region = self.tiling_region_mut();
        let end = offset + expected;
        if end > region.len() {
            return Err(SliceError::ShortCopy {
                group: info.group.to_string(),
                expected,
                copied: region.len().saturating_sub(offset),
            });
        }
        let copied = copy_bytes(&mut region[offset..end], &info.tiling_data);
        if copied != expected {
            return Err(SliceError::ShortCopy {
                group: info.group.to_string(),
                expected,
                copied,
            });
        }
        Ok(())
    }

    /// Fill every thread row with `base[slot] + stride[slot] * thread`.
    ///
    /// Both tables must have exactly `slot_count` entries; the buffer is
    /// left untouched otherwise.
    pub fn compile_addresses(&mut self, node: &str, bases: &[DevicePtr], strides: &[u64]) -> SliceResult<()> {
        let layout = self.layout;
        if strides.len() != layout.slot_count {
            return Err(SliceError::mismatch(node, "address offset table", layout.slot_count, strides.len()));
        }
        if bases.len() != layout.slot_count {
            return Err(SliceError::mismatch(node, "base address list", layout.slot_count, bases.len()));
        }
        for thread in 0..layout.thread_dim {
            let row = layout.slot_index(thread, 0);
            let dst = &mut self.words[row..row + layout.slot_count];
            for ((slot, &base), &stride) in dst.iter_mut().zip(bases).zip(strides) {
                *slot = base + stride * thread as u64;
            }
        }
        Ok(())
    }

    // every thread but the last reads the non-tail blob
    pub fn assign_tiling_ptrs(&mut self, engine_slot: usize, non_tail: DevicePtr, tail: DevicePtr) {
        let layout = self.layout;
        debug_assert!(engine_slot < layout.tiling_slots);
        for thread in 0..layout.thread_dim {
            let ptr = if thread + 1 == layout.thread_dim { tail } else { non_tail };
            self.words[layout.tiling_index(thread, engine_slot)] = ptr;
        }
    }

    // write a whole row verbatim, for explicit address lists
    pub fn write_row(&mut self, node: &str, thread: usize, addrs: &[DevicePtr]) -> SliceResult<()> {
        let layout = self.layout;
        if addrs.len() != layout.row_words() || thread >= layout.thread_dim {
            return Err(SliceError::mismatch(node, "address row", layout.row_words(), addrs.len()));
        }
        let row = layout.slot_index(thread, 0);
        self.words[row..row + addrs.len()].copy_from_slice(addrs);
        Ok(())
    }

    pub fn slot(&self, thread: usize, slot: usize) -> u64 {
        self.words[self.layout.slot_index(thread, slot)]
    }

    pub fn tiling_ptr(&self, thread: usize, engine_slot: usize) -> u64 {
        self.words[self.layout.tiling_index(thread, engine_slot)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::DMA_ALIGN;
    use crate::model::Engine;
    use crate::params::{SliceGroup, TilingGroup};
    use rand::Rng;

    fn blob(slice: SliceGroup, data: &[u8]) -> TilingRunInfo {
        TilingRunInfo::new(TilingGroup::new(Engine::Aic, slice), data.to_vec(), 0)
    }

    #[test]
    fn buffer_length_formula() {
        // 2 inputs + 1 output, 4 threads, 2 words of tiling
        let layout = ArgsLayout::new(2, 3, 1, 4);
        assert_eq!(layout.total_words(), 18);
        assert_eq!(ArgsBuffer::new(layout).words().len(), 18);
        assert_eq!(layout.device_bytes(), 18 * WORD_SIZE);
    }

    #[test]
    fn pack_aligns_each_blob() {
        let pack = TilingPack::new([10, 6], DMA_ALIGN);
        assert_eq!(pack.offsets.as_slice(), &[0, 32]);
        assert_eq!(pack.region_bytes, 64);
        assert_eq!(pack.region_words(), 64 / WORD_SIZE);

        let empty = TilingPack::new([0, 0], DMA_ALIGN);
        assert_eq!(empty.region_bytes, 0);
    }

    #[test]
    fn tiling_bytes_land_at_offsets() {
        let pack = TilingPack::new([10, 6], DMA_ALIGN);
        let mut buf = ArgsBuffer::new(ArgsLayout::new(pack.region_words(), 1, 1, 1));
        buf.write_tiling(pack.offsets[0], &blob(SliceGroup::NonTail, &[1; 10])).unwrap();
        buf.write_tiling(pack.offsets[1], &blob(SliceGroup::Tail, &[2; 6])).unwrap();
        let region = buf.tiling_region();
        assert_eq!(&region[..10], &[1; 10]);
        assert!(region[10..32].iter().all(|&b| b == 0));
        assert_eq!(&region[32..38], &[2; 6]);
    }

    #[test]
    fn short_source_fails() {
        let mut buf = ArgsBuffer::new(ArgsLayout::new(4, 1, 1, 1));
        let mut info = blob(SliceGroup::NonTail, &[7; 6]);
        info.tiling_size = 10;
        let err = buf.write_tiling(0, &info).unwrap_err();
        assert!(matches!(err, SliceError::ShortCopy { expected: 10, copied: 6, .. }));
    }

    #[test]
    fn stride_table_mismatch_leaves_buffer() {
        let mut buf = ArgsBuffer::new(ArgsLayout::new(0, 3, 1, 2));
        let before = buf.clone();
        assert!(buf.compile_addresses("n", &[1, 2, 3], &[8, 8]).is_err());
        assert!(buf.compile_addresses("n", &[1, 2], &[8, 8, 8]).is_err());
        assert_eq!(buf, before);
    }

    #[test]
    fn random_strides() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let slots = rng.gen_range(1..8);
            let threads = rng.gen_range(1..16);
            let bases = (0..slots).map(|_| rng.gen_range(0..1u64 << 40)).collect::<Vec<_>>();
            let strides = (0..slots).map(|_| rng.gen_range(0..1u64 << 16)).collect::<Vec<_>>();
            let mut buf = ArgsBuffer::new(ArgsLayout::new(2, slots, 1, threads));
            buf.compile_addresses("n", &bases, &strides).unwrap();
            buf.assign_tiling_ptrs(0, 0xaaaa, 0xbbbb);
            for i in 0..threads {
                for s in 0..slots {
                    assert_eq!(buf.slot(i, s), bases[s] + strides[s] * i as u64);
                }
                let want = if i + 1 == threads { 0xbbbb } else { 0xaaaa };
                assert_eq!(buf.tiling_ptr(i, 0), want);
            }
            assert!(buf.words()[..2].iter().all(|&w| w == 0));
        }
    }

    #[test]
    fn single_thread_reads_tail() {
        let mut buf = ArgsBuffer::new(ArgsLayout::new(0, 1, 2, 1));
        buf.assign_tiling_ptrs(0, 1, 2);
        buf.assign_tiling_ptrs(1, 3, 4);
        assert_eq!(buf.words(), &[0, 2, 4]);
    }

    #[test]
    fn explicit_row() {
        let mut buf = ArgsBuffer::new(ArgsLayout::new(0, 2, 1, 1));
        buf.write_row("n", 0, &[5, 6, 7]).unwrap();
        assert_eq!(buf.words(), &[5, 6, 7]);
        assert!(buf.write_row("n", 0, &[5, 6]).is_err());
    }
}
