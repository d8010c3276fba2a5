use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, trace};

use fftsplus_slicer::align::align_up;
use fftsplus_slicer::collab::{DeviceRuntime, RtCallback};
use fftsplus_slicer::{DevicePtr, HwTaskHandle, RtCode, StreamId};

/// First address handed out by the simulated allocator.
pub const DEVICE_BASE: DevicePtr = 0x1_0000_0000;

/// Runtime calls a failure code can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtOp {
    Allocate,
    Copy,
    Launch,
    Callback,
    /// status reported to callbacks when the stream drains
    Completion,
}

struct CopyRecord {
    dst: DevicePtr,
    data: Vec<u8>,
    stream: StreamId,
}

#[derive(Default)]
struct State {
    next: DevicePtr,
    allocated: Vec<(DevicePtr, usize)>,
    copies: Vec<CopyRecord>,
    launches: Vec<(HwTaskHandle, StreamId)>,
    pending: Vec<(StreamId, RtCallback)>,
    failures: HashMap<RtOp, RtCode>,
}

/// Device runtime backed by host memory. Allocation bumps a cursor in
/// 32-byte steps, copies are recorded in issue order, and callbacks stay
/// queued until their stream is synchronized.
pub struct SimRuntime {
    state: Mutex<State>,
}

impl SimRuntime {
    pub fn new() -> Self {
        SimRuntime {
            state: Mutex::new(State {
                next: DEVICE_BASE,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // a panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later `op` return `code`. Zero clears the failure.
    pub fn fail_on(&self, op: RtOp, code: RtCode) {
        let mut state = self.state();
        if code == 0 {
            state.failures.remove(&op);
        } else {
            state.failures.insert(op, code);
        }
    }

    fn injected(&self, op: RtOp) -> RtCode {
        self.state().failures.get(&op).copied().unwrap_or(0)
    }

    pub fn allocations(&self) -> Vec<(DevicePtr, usize)> {
        self.state().allocated.clone()
    }

    pub fn copy_count(&self) -> usize {
        self.state().copies.len()
    }

    pub fn launches(&self) -> Vec<(HwTaskHandle, StreamId)> {
        self.state().launches.clone()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.state().pending.len()
    }

    /// Bytes of the latest copy whose destination starts at `dst`.
    pub fn copied_to(&self, dst: DevicePtr) -> Option<Vec<u8>> {
        let state = self.state();
        state.copies.iter().rev().find(|c| c.dst == dst).map(|c| c.data.clone())
    }

    /// Stream the latest copy to `dst` was issued on.
    pub fn copy_stream(&self, dst: DevicePtr) -> Option<StreamId> {
        let state = self.state();
        state.copies.iter().rev().find(|c| c.dst == dst).map(|c| c.stream)
    }

    /// Read `len` bytes at `addr`, replaying every copy in issue order.
    /// Bytes no copy ever touched read as `None`.
    pub fn read(&self, addr: DevicePtr, len: usize) -> Option<Vec<u8>> {
        let state = self.state();
        let mut out = vec![None; len];
        for copy in &state.copies {
            let end = copy.dst + copy.data.len() as u64;
            for (i, byte) in out.iter_mut().enumerate() {
                let at = addr + i as u64;
                if at >= copy.dst && at < end {
                    *byte = Some(copy.data[(at - copy.dst) as usize]);
                }
            }
        }
        out.into_iter().collect()
    }

    /// Drain `stream`: run its queued callbacks with the completion status.
    /// Returns how many ran.
    pub fn synchronize(&self, stream: StreamId) -> usize {
        let (ready, status) = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending);
            let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(s, _)| *s == stream);
            state.pending = rest;
            let status = state.failures.get(&RtOp::Completion).copied().unwrap_or(0);
            (ready, status)
        };
        // callbacks may call back into the runtime
        let count = ready.len();
        for (_, callback) in ready {
            callback(status);
        }
        debug!("stream {}: {} callbacks, status {}", stream.0, count, status);
        count
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRuntime for SimRuntime {
    fn allocate(&self, size: usize) -> Result<DevicePtr, RtCode> {
        let code = self.injected(RtOp::Allocate);
        if code != 0 {
            return Err(code);
        }
        let mut state = self.state();
        let addr = state.next;
        state.next += align_up(size.max(1)) as u64;
        state.allocated.push((addr, size));
        trace!("malloc {} bytes at {:#x}", size, addr);
        Ok(addr)
    }

    fn copy_host_to_device(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> RtCode {
        let code = self.injected(RtOp::Copy);
        if code != 0 {
            return code;
        }
        trace!("memcpy {} bytes to {:#x} on stream {}", src.len(), dst, stream.0);
        self.state().copies.push(CopyRecord {
            dst,
            data: src.to_vec(),
            stream,
        });
        0
    }

    fn launch_task(&self, task: &HwTaskHandle, stream: StreamId) -> RtCode {
        let code = self.injected(RtOp::Launch);
        if code != 0 {
            return code;
        }
        self.state().launches.push((*task, stream));
        0
    }

    fn register_callback(&self, stream: StreamId, callback: RtCallback) -> RtCode {
        let code = self.injected(RtOp::Callback);
        if code != 0 {
            return code;
        }
        self.state().pending.push((stream, callback));
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn bump_allocation() {
        let rt = SimRuntime::new();
        let a = rt.allocate(10).unwrap();
        let b = rt.allocate(40).unwrap();
        let c = rt.allocate(0).unwrap();
        assert_eq!(a, DEVICE_BASE);
        assert_eq!(b, DEVICE_BASE + 32);
        assert_eq!(c, DEVICE_BASE + 96);
        assert_eq!(rt.allocations().len(), 3);
    }

    #[test]
    fn read_replays_copies() {
        let rt = SimRuntime::new();
        let s = StreamId(0);
        assert_eq!(rt.copy_host_to_device(0x100, &[1, 2, 3, 4], s), 0);
        assert_eq!(rt.copy_host_to_device(0x102, &[9], s), 0);
        assert_eq!(rt.read(0x100, 4), Some(vec![1, 2, 9, 4]));
        assert_eq!(rt.read(0x103, 2), None);
        assert_eq!(rt.copied_to(0x102), Some(vec![9]));
        assert_eq!(rt.copy_stream(0x102), Some(s));
        assert_eq!(rt.copy_stream(0x101), None);
    }

    #[test]
    fn injected_codes() {
        let rt = SimRuntime::new();
        rt.fail_on(RtOp::Allocate, 207001);
        assert_eq!(rt.allocate(8), Err(207001));
        rt.fail_on(RtOp::Allocate, 0);
        assert!(rt.allocate(8).is_ok());
        rt.fail_on(RtOp::Launch, 507011);
        assert_eq!(rt.launch_task(&HwTaskHandle(1), StreamId(0)), 507011);
        assert!(rt.launches().is_empty());
    }

    #[test]
    fn callbacks_wait_for_their_stream() {
        let rt = SimRuntime::new();
        let seen = Arc::new(AtomicI32::new(-1));
        let hook = Arc::clone(&seen);
        rt.register_callback(StreamId(1), Box::new(move |code| hook.store(code, Ordering::SeqCst)));
        assert_eq!(rt.synchronize(StreamId(0)), 0);
        assert_eq!(seen.load(Ordering::SeqCst), -1);
        rt.fail_on(RtOp::Completion, 3);
        assert_eq!(rt.synchronize(StreamId(1)), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(rt.pending_callbacks(), 0);
    }
}
