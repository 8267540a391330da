//! Software-only loopback transport (spec §1's "one reference
//! implementation of each trait boundary"), used by this crate's own tests
//! and the integration suite. Several [`LoopbackNet`] instances in the same
//! process model distinct cluster peers: each gets its own address, and
//! [`LoopbackNet::class`]/[`LoopbackNet::context`] hand out the
//! [`NetClass`]/[`NetContext`] trait objects a [`crate::Class`] is built
//! from.
//!
//! No thread does independent background work here; every send/recv call
//! either matches immediately against a previously-posted counterpart or
//! queues itself for a future one. `progress`/`trigger` only ever observe
//! state some other call on some other thread already produced.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use crate::net::{Addr, NetCallback, NetCbInfo, NetClass, NetContext, NetError, OpId, Tag, UnexpectedInfo};

const DEFAULT_MAX_EXPECTED_SIZE: usize = 4096;
const DEFAULT_MAX_TAG: Tag = Tag::MAX - 1;

/// Directory of every live loopback peer, keyed by address. Weak so that a
/// peer with no remaining [`Arc`] owner (no `LoopbackNet`, no `Class`
/// holding its `NetContext`) can actually be freed; an unresolvable address
/// is simply reported as [`NetError::UnknownPeer`].
fn registry() -> &'static Mutex<HashMap<Addr, Weak<LoopbackContext>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<Addr, Weak<LoopbackContext>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

struct RecvSlot {
    op: OpId,
    cb: NetCallback,
}

#[derive(Default)]
struct LoopbackState {
    /// Unexpected sends that arrived before a matching `recv_unexpected`
    /// was posted.
    unexpected_inbox: VecDeque<(Addr, Tag, Vec<u8>)>,
    /// Posted `recv_unexpected` calls waiting for a message.
    unexpected_waiters: VecDeque<RecvSlot>,
    /// Expected sends keyed by `(source, tag)` that arrived before their
    /// matching `recv_expected` was posted.
    expected_inbox: HashMap<(Addr, Tag), Vec<u8>>,
    /// Posted `recv_expected` calls waiting for a message, keyed the same
    /// way.
    expected_waiters: HashMap<(Addr, Tag), RecvSlot>,
    /// Payload delivered for a given op, ready for `take_recv_buf`.
    recv_bufs: HashMap<OpId, Vec<u8>>,
    /// Completions ready to fire on the next `trigger`.
    completions: VecDeque<(NetCallback, NetCbInfo)>,
    next_op: u64,
}

impl LoopbackState {
    fn alloc_op(&mut self) -> OpId {
        self.next_op += 1;
        OpId(self.next_op)
    }
}

/// One loopback peer's progress-scoped transport handle.
pub struct LoopbackContext {
    addr: Addr,
    state: Mutex<LoopbackState>,
}

impl LoopbackContext {
    fn push_completion(&self, cb: NetCallback, info: NetCbInfo) {
        self.state
            .lock()
            .expect("loopback state poisoned")
            .completions
            .push_back((cb, info));
    }

    fn deliver_unexpected(&self, source: Addr, tag: Tag, payload: Vec<u8>) {
        let mut state = self.state.lock().expect("loopback state poisoned");
        if let Some(slot) = state.unexpected_waiters.pop_front() {
            let actual_size = payload.len();
            state.recv_bufs.insert(slot.op, payload);
            drop(state);
            let info = NetCbInfo {
                result: Ok(()),
                unexpected: Some(UnexpectedInfo { source, tag, actual_size }),
            };
            self.push_completion(slot.cb, info);
        } else {
            state.unexpected_inbox.push_back((source, tag, payload));
        }
    }

    fn deliver_expected(&self, source: Addr, tag: Tag, payload: Vec<u8>) {
        let mut state = self.state.lock().expect("loopback state poisoned");
        if let Some(slot) = state.expected_waiters.remove(&(source, tag)) {
            state.recv_bufs.insert(slot.op, payload);
            drop(state);
            self.push_completion(slot.cb, NetCbInfo { result: Ok(()), unexpected: None });
        } else {
            state.expected_inbox.insert((source, tag), payload);
        }
    }
}

impl NetContext for LoopbackContext {
    fn recv_unexpected(&self, _buf_size: usize, cb: NetCallback) -> Result<OpId, NetError> {
        let mut state = self.state.lock().expect("loopback state poisoned");
        let op = state.alloc_op();
        if let Some((source, tag, payload)) = state.unexpected_inbox.pop_front() {
            let actual_size = payload.len();
            state.recv_bufs.insert(op, payload);
            drop(state);
            self.push_completion(
                cb,
                NetCbInfo {
                    result: Ok(()),
                    unexpected: Some(UnexpectedInfo { source, tag, actual_size }),
                },
            );
        } else {
            state.unexpected_waiters.push_back(RecvSlot { op, cb });
        }
        Ok(op)
    }

    fn recv_expected(
        &self,
        _buf_size: usize,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> Result<OpId, NetError> {
        let mut state = self.state.lock().expect("loopback state poisoned");
        let op = state.alloc_op();
        let key = (addr.clone(), tag);
        if let Some(payload) = state.expected_inbox.remove(&key) {
            state.recv_bufs.insert(op, payload);
            drop(state);
            self.push_completion(cb, NetCbInfo { result: Ok(()), unexpected: None });
        } else {
            state.expected_waiters.insert(key, RecvSlot { op, cb });
        }
        Ok(op)
    }

    fn send_unexpected(
        &self,
        buf: Vec<u8>,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> Result<OpId, NetError> {
        let op = self.state.lock().expect("loopback state poisoned").alloc_op();
        match lookup(addr) {
            Some(target) => {
                target.deliver_unexpected(self.addr.clone(), tag, buf);
                self.push_completion(cb, NetCbInfo { result: Ok(()), unexpected: None });
            }
            None => {
                self.push_completion(
                    cb,
                    NetCbInfo {
                        result: Err(NetError::UnknownPeer(addr.clone())),
                        unexpected: None,
                    },
                );
            }
        }
        Ok(op)
    }

    fn send_expected(
        &self,
        buf: Vec<u8>,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> Result<OpId, NetError> {
        let op = self.state.lock().expect("loopback state poisoned").alloc_op();
        match lookup(addr) {
            Some(target) => {
                target.deliver_expected(self.addr.clone(), tag, buf);
                self.push_completion(cb, NetCbInfo { result: Ok(()), unexpected: None });
            }
            None => {
                self.push_completion(
                    cb,
                    NetCbInfo {
                        result: Err(NetError::UnknownPeer(addr.clone())),
                        unexpected: None,
                    },
                );
            }
        }
        Ok(op)
    }

    fn trigger(&self, max_count: u32) -> Result<u32, NetError> {
        let mut count = 0u32;
        while count < max_count {
            let next = self.state.lock().expect("loopback state poisoned").completions.pop_front();
            let Some((cb, info)) = next else { break };
            cb(info);
            count += 1;
        }
        Ok(count)
    }

    fn progress(&self, timeout: Duration) -> Result<(), NetError> {
        let deadline = Instant::now() + timeout;
        loop {
            let has_work = !self
                .state
                .lock()
                .expect("loopback state poisoned")
                .completions
                .is_empty();
            if has_work {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(NetError::Timeout);
            }
            std::thread::yield_now();
        }
    }

    fn cancel(&self, op: OpId) -> Result<(), NetError> {
        let mut state = self.state.lock().expect("loopback state poisoned");

        if let Some(pos) = state.unexpected_waiters.iter().position(|slot| slot.op == op) {
            let slot = state.unexpected_waiters.remove(pos).expect("position just checked");
            drop(state);
            self.push_completion(slot.cb, NetCbInfo { result: Err(NetError::Cancelled), unexpected: None });
            return Ok(());
        }

        if let Some(key) = state
            .expected_waiters
            .iter()
            .find(|(_, slot)| slot.op == op)
            .map(|(key, _)| key.clone())
        {
            let slot = state.expected_waiters.remove(&key).expect("key just found");
            drop(state);
            self.push_completion(slot.cb, NetCbInfo { result: Err(NetError::Cancelled), unexpected: None });
            return Ok(());
        }

        // Already completed (our sends fire synchronously) or unknown: a
        // best-effort cancel of a settled operation is a no-op.
        Ok(())
    }

    fn take_recv_buf(&self, op: OpId) -> Option<Vec<u8>> {
        self.state.lock().expect("loopback state poisoned").recv_bufs.remove(&op)
    }
}

fn lookup(addr: &Addr) -> Option<Arc<LoopbackContext>> {
    registry().lock().expect("loopback registry poisoned").get(addr).and_then(Weak::upgrade)
}

/// Process-scoped half of one loopback peer.
pub struct LoopbackClass {
    addr: Addr,
    max_expected_size: usize,
    max_tag: Tag,
    listening: bool,
}

impl NetClass for LoopbackClass {
    fn max_expected_size(&self) -> usize {
        self.max_expected_size
    }

    fn max_tag(&self) -> Tag {
        self.max_tag
    }

    fn is_self(&self, addr: &Addr) -> bool {
        *addr == self.addr
    }

    fn is_listening(&self) -> bool {
        self.listening
    }

    fn self_addr(&self) -> Addr {
        self.addr.clone()
    }
}

/// One named peer in a loopback cluster: owns a registered address and the
/// [`NetClass`]/[`NetContext`] pair built over it.
pub struct LoopbackNet {
    class: Arc<LoopbackClass>,
    context: Arc<LoopbackContext>,
}

impl LoopbackNet {
    /// Register a new listening peer named `name` with default capacity
    /// limits.
    pub fn new_process(name: &str) -> Self {
        Self::with_limits(name, DEFAULT_MAX_EXPECTED_SIZE, DEFAULT_MAX_TAG)
    }

    /// Register a new listening peer with a caller-chosen `max_tag`, used
    /// by tests exercising tag wrap-around (spec §8 scenario 3).
    pub fn with_limits(name: &str, max_expected_size: usize, max_tag: Tag) -> Self {
        let addr = Addr::new(unique_label(name));
        let context = Arc::new(LoopbackContext {
            addr: addr.clone(),
            state: Mutex::new(LoopbackState::default()),
        });
        registry()
            .lock()
            .expect("loopback registry poisoned")
            .insert(addr.clone(), Arc::downgrade(&context));
        let class = Arc::new(LoopbackClass {
            addr,
            max_expected_size,
            max_tag,
            listening: true,
        });
        Self { class, context }
    }

    pub fn class(&self) -> Arc<dyn NetClass> {
        self.class.clone()
    }

    pub fn context(&self) -> Arc<dyn NetContext> {
        self.context.clone()
    }
}

/// Every loopback peer gets a process-unique address even when two tests
/// both ask for `"p0"`, so stale registry entries from a previous test
/// (kept alive only by a `Weak`, but not yet observed as dead) never
/// shadow a new one.
fn unique_label(name: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{name}#{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn unknown_peer_send_reports_error() {
        let a = LoopbackNet::new_process("a");
        let ctx = a.context();
        let got = Arc::new(StdMutex::new(None));
        let got2 = got.clone();
        ctx.send_unexpected(vec![1, 2, 3], &Addr::new("nowhere"), 0, Box::new(move |info| {
            *got2.lock().unwrap() = Some(info.result);
        }))
        .unwrap();
        ctx.trigger(1).unwrap();
        assert!(matches!(
            got.lock().unwrap().take(),
            Some(Err(NetError::UnknownPeer(_)))
        ));
    }

    #[test]
    fn unexpected_send_then_recv_matches() {
        let a = LoopbackNet::new_process("a");
        let b = LoopbackNet::new_process("b");

        a.context()
            .send_unexpected(vec![9, 9], &b.class().self_addr(), 5, Box::new(|_| {}))
            .unwrap();
        a.context().trigger(1).unwrap();

        let got = Arc::new(StdMutex::new(None));
        let got2 = got.clone();
        let op = b
            .context()
            .recv_unexpected(
                8,
                Box::new(move |info| {
                    *got2.lock().unwrap() = Some(info);
                }),
            )
            .unwrap();
        b.context().trigger(1).unwrap();

        let info = got.lock().unwrap().take().unwrap();
        assert!(info.result.is_ok());
        assert_eq!(info.unexpected.unwrap().tag, 5);
        assert_eq!(b.context().take_recv_buf(op).unwrap(), vec![9, 9]);
    }

    #[test]
    fn recv_unexpected_then_send_matches() {
        let a = LoopbackNet::new_process("a");
        let b = LoopbackNet::new_process("b");

        let got = Arc::new(StdMutex::new(None));
        let got2 = got.clone();
        let op = b
            .context()
            .recv_unexpected(
                8,
                Box::new(move |info| {
                    *got2.lock().unwrap() = Some(info);
                }),
            )
            .unwrap();

        a.context()
            .send_unexpected(vec![1, 2, 3], &b.class().self_addr(), 7, Box::new(|_| {}))
            .unwrap();
        b.context().trigger(1).unwrap();

        let info = got.lock().unwrap().take().unwrap();
        assert!(info.result.is_ok());
        assert_eq!(info.unexpected.unwrap().tag, 7);
        assert_eq!(b.context().take_recv_buf(op).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn progress_times_out_with_nothing_pending() {
        let a = LoopbackNet::new_process("a");
        assert!(matches!(
            a.context().progress(Duration::from_millis(20)),
            Err(NetError::Timeout)
        ));
    }
}
