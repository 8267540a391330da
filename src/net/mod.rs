//! The network transport boundary.
//!
//! This module defines the traits the RPC core consumes from "the network
//! layer" (spec §6): unexpected/expected send and receive, progress and
//! trigger, tag and address primitives. The core never constructs a
//! transport itself; callers pass one in to [`crate::Class::init`].
//!
//! [`loopback`] ships one concrete implementation, used by this crate's own
//! tests, the same way the teacher crate ships a software `lo` module next
//! to its hardware-backed `rdma` module.

pub mod loopback;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Transport-level tag identifying one send/receive pair.
pub type Tag = u32;

/// Opaque identifier for one outstanding network operation, returned by the
/// post calls and consumed by [`NetContext::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u64);

/// Transport-level address. Opaque to the core beyond equality and the
/// self-address predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Addr(pub Arc<str>);

impl Addr {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self(label.into())
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-layer failure.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("network operation timed out")]
    Timeout,
    #[error("network operation was cancelled")]
    Cancelled,
    #[error("unknown peer address: {0}")]
    UnknownPeer(Addr),
    #[error("no operation posted for this handle")]
    NoSuchOp,
    #[error("transport-level I/O failure: {0}")]
    Io(String),
}

/// Outcome of one completed network operation, delivered to the closure
/// passed to `recv_unexpected`/`recv_expected`/`send_unexpected`/
/// `send_expected`.
#[derive(Debug)]
pub struct NetCbInfo {
    /// Whether the operation succeeded.
    pub result: std::result::Result<(), NetError>,
    /// Present only for `recv_unexpected` completions: who sent it, the tag
    /// they sent it on, and how many bytes actually landed in the buffer.
    pub unexpected: Option<UnexpectedInfo>,
}

#[derive(Debug, Clone)]
pub struct UnexpectedInfo {
    pub source: Addr,
    pub tag: Tag,
    pub actual_size: usize,
}

/// Completion closure. Boxed and `'static` because the transport may invoke
/// it from `progress`/`trigger` on a thread unrelated to the poster; `Send`
/// because the code that runs it may not be the thread that posted it.
pub type NetCallback = Box<dyn FnOnce(NetCbInfo) + Send>;

/// Process-scoped transport handle: capability queries only, no I/O.
///
/// Corresponds to `na_class_t` in spec §6.
pub trait NetClass: Send + Sync {
    /// Maximum size of one inline (expected or unexpected) message,
    /// including header space.
    fn max_expected_size(&self) -> usize;

    /// Largest legal tag value; tags live in `[0, max_tag()]`.
    fn max_tag(&self) -> Tag;

    /// Whether `addr` names the local process.
    fn is_self(&self, addr: &Addr) -> bool;

    /// Whether this class is configured to receive unsolicited requests
    /// (i.e. whether the listen pump should run).
    fn is_listening(&self) -> bool;

    /// This process's own address, used by [`Class::create`](crate::Class::create)
    /// callers that want to address themselves.
    fn self_addr(&self) -> Addr;
}

/// Progress-scoped transport handle: the actual I/O surface.
///
/// Corresponds to `na_context_t` in spec §6.
pub trait NetContext: Send + Sync {
    /// Post a receive for an unsolicited (unexpected) inbound message.
    fn recv_unexpected(&self, buf_size: usize, cb: NetCallback) -> std::result::Result<OpId, NetError>;

    /// Post a receive for a message matched by `(addr, tag)`.
    fn recv_expected(
        &self,
        buf_size: usize,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> std::result::Result<OpId, NetError>;

    /// Send a message that does not require a pre-posted matching receive.
    fn send_unexpected(
        &self,
        buf: Vec<u8>,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> std::result::Result<OpId, NetError>;

    /// Send a message matched by `(addr, tag)` at the receiver.
    fn send_expected(
        &self,
        buf: Vec<u8>,
        addr: &Addr,
        tag: Tag,
        cb: NetCallback,
    ) -> std::result::Result<OpId, NetError>;

    /// Drain whatever completions are already available, invoking their
    /// callbacks, without blocking. Returns the number delivered.
    fn trigger(&self, max_count: u32) -> std::result::Result<u32, NetError>;

    /// Block up to `timeout` making progress, returning once at least one
    /// event became available or the timeout elapsed
    /// ([`NetError::Timeout`]).
    fn progress(&self, timeout: Duration) -> std::result::Result<(), NetError>;

    /// Best-effort cancellation of an outstanding operation. The eventual
    /// completion (if any) is delivered with [`NetError::Cancelled`].
    fn cancel(&self, op: OpId) -> std::result::Result<(), NetError>;

    /// Fetch the payload most recently delivered into a receive buffer.
    /// Used by the core to pull posted-buffer contents back out after a
    /// completion fires, since this trait moves buffers by value on post.
    fn take_recv_buf(&self, op: OpId) -> Option<Vec<u8>>;
}
