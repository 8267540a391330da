//! One RPC exchange (spec §3/§4.4): buffers, tag, address, callback,
//! network operation ids.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::class::Class;
use crate::context::Context;
use crate::error::{Result, RpcError};
use crate::header::{RequestHeader, ResponseHeader};
use crate::net::{Addr, NetError, OpId, Tag};

/// User callback invoked once an exchange completes, on whichever thread is
/// blocked in (or next calls) [`Context::trigger`].
pub type UserCallback = Arc<dyn Fn(CallbackInfo) + Send + Sync>;

/// Delivered to the user callback exactly once per exchange.
#[derive(Clone)]
pub struct CallbackInfo {
    pub class: Class,
    pub context: Context,
    pub handle: Handle,
    /// Outcome of the underlying network operation(s). `Ok(())` for a
    /// normal completion; `Err` surfaces a transport failure or a header
    /// decode/verify failure instead of silently dropping it (SPEC_FULL
    /// §7's resolution of the "TODO report failure" flag).
    pub status: Result<()>,
}

/// Snapshot returned by [`Handle::info`].
#[derive(Clone)]
pub struct HandleInfo {
    pub class: Class,
    pub context: Context,
    pub addr: Option<Addr>,
    pub id: u32,
}

struct HandleState {
    id: u32,
    cookie: u32,
    tag: Tag,
    addr: Option<Addr>,
    /// Whether this handle owns (must free) `addr`: `true` on the target
    /// (address came from an unexpected receive), `false` on the origin
    /// (caller supplied and owns the address) — spec §3 invariant. Kept for
    /// parity with the original design even though `Addr` here is a plain
    /// `Arc<str>` with no separate free step.
    addr_mine: bool,
    send_op: Option<OpId>,
    recv_op: Option<OpId>,
    callback: Option<UserCallback>,
    last_status: Result<()>,
}

struct HandleInner {
    class: Class,
    context: Context,
    state: Mutex<HandleState>,
    in_buf: Mutex<Vec<u8>>,
    out_buf: Mutex<Vec<u8>>,
}

/// One RPC exchange handle. Cheap to clone; each clone is a distinct owner
/// for as long as it (or something it handed a clone to, like a posted
/// network completion closure) is alive — see DESIGN.md for how this models
/// the original's manual reference count.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

/// A view into a handle's buffer, offset past the header region reserved by
/// the class's [`HeaderCodec`](crate::header::HeaderCodec). Borrowed from an
/// internal lock; drop it before making another call on the same handle.
pub struct BufView<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    offset: usize,
}

impl Deref for BufView<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard[self.offset..]
    }
}

impl DerefMut for BufView<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[self.offset..]
    }
}

impl Handle {
    /// Internal allocation helper: both buffers sized to the transport's
    /// maximum expected-message size, refcount effectively 1 (this is the
    /// only owner so far) (spec §4.4).
    pub(crate) fn create_internal(class: Class, context: Context) -> Result<Self> {
        let size = class.max_expected_size();
        Ok(Self {
            inner: Arc::new(HandleInner {
                class,
                context,
                state: Mutex::new(HandleState {
                    id: 0,
                    cookie: 0,
                    tag: 0,
                    addr: None,
                    addr_mine: false,
                    send_op: None,
                    recv_op: None,
                    callback: None,
                    last_status: Ok(()),
                }),
                in_buf: Mutex::new(vec![0u8; size]),
                out_buf: Mutex::new(vec![0u8; size]),
            }),
        })
    }

    /// User-facing `Create`: validates `addr`/`id` and returns a handle
    /// bound to this exchange (spec §4.4).
    pub fn create(class: Class, context: Context, addr: Addr, id: u32) -> Result<Self> {
        if id == 0 {
            return Err(RpcError::InvalidParam("RPC id must be non-zero"));
        }
        let handle = Self::create_internal(class, context)?;
        {
            let mut state = handle.inner.state.lock().expect("handle state poisoned");
            state.addr = Some(addr);
            state.addr_mine = false;
            state.id = id;
        }
        Ok(handle)
    }

    /// Consume this handle value now. Equivalent to letting it drop; exists
    /// so call sites can mirror the original's explicit `HG_Destroy` calls
    /// and so early disposal reads intentionally in RPC handlers.
    pub fn destroy(self) {}

    pub fn info(&self) -> HandleInfo {
        let state = self.inner.state.lock().expect("handle state poisoned");
        HandleInfo {
            class: self.inner.class.clone(),
            context: self.inner.context.clone(),
            addr: state.addr.clone(),
            id: state.id,
        }
    }

    pub fn addr(&self) -> Option<Addr> {
        self.inner.state.lock().expect("handle state poisoned").addr.clone()
    }

    pub fn class(&self) -> &Class {
        &self.inner.class
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// View of the input buffer past the request-header reservation.
    pub fn input_buf(&self) -> BufView<'_> {
        let offset = self.inner.class.header_codec().request_size();
        BufView {
            guard: self.inner.in_buf.lock().expect("in_buf poisoned"),
            offset,
        }
    }

    /// Mutable view of the input buffer past the request-header
    /// reservation, for the origin to write its request payload into
    /// before calling [`Handle::forward`].
    pub fn input_buf_mut(&self) -> BufView<'_> {
        self.input_buf()
    }

    /// View of the output buffer past the response-header reservation.
    pub fn output_buf(&self) -> BufView<'_> {
        let offset = self.inner.class.header_codec().response_size();
        BufView {
            guard: self.inner.out_buf.lock().expect("out_buf poisoned"),
            offset,
        }
    }

    /// Mutable view of the output buffer past the response-header
    /// reservation, for the target to write its response payload into
    /// before calling [`Handle::respond`].
    pub fn output_buf_mut(&self) -> BufView<'_> {
        self.output_buf()
    }

    pub(crate) fn is_same(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn in_buf_size(&self) -> usize {
        self.inner.in_buf.lock().expect("in_buf poisoned").len()
    }

    pub(crate) fn out_buf_size(&self) -> usize {
        self.inner.out_buf.lock().expect("out_buf poisoned").len()
    }

    pub(crate) fn replace_in_buf(&self, buf: Vec<u8>) {
        *self.inner.in_buf.lock().expect("in_buf poisoned") = buf;
    }

    pub(crate) fn replace_out_buf(&self, buf: Vec<u8>) {
        *self.inner.out_buf.lock().expect("out_buf poisoned") = buf;
    }

    pub(crate) fn clone_out_buf(&self) -> Vec<u8> {
        self.inner.out_buf.lock().expect("out_buf poisoned").clone()
    }

    pub(crate) fn clone_in_buf(&self) -> Vec<u8> {
        self.inner.in_buf.lock().expect("in_buf poisoned").clone()
    }

    pub(crate) fn id(&self) -> u32 {
        self.inner.state.lock().expect("handle state poisoned").id
    }

    pub(crate) fn set_id(&self, id: u32) {
        self.inner.state.lock().expect("handle state poisoned").id = id;
    }

    pub(crate) fn cookie(&self) -> u32 {
        self.inner.state.lock().expect("handle state poisoned").cookie
    }

    pub(crate) fn set_cookie(&self, cookie: u32) {
        self.inner.state.lock().expect("handle state poisoned").cookie = cookie;
    }

    /// The network tag assigned to this exchange. Zero until `forward` has
    /// run (on the origin) or an unexpected-receive has matched (on the
    /// target).
    pub fn tag(&self) -> Tag {
        self.inner.state.lock().expect("handle state poisoned").tag
    }

    pub(crate) fn set_tag(&self, tag: Tag) {
        self.inner.state.lock().expect("handle state poisoned").tag = tag;
    }

    /// Record the address/ownership pair observed from an unexpected
    /// receive (`addr_mine = true` on the target, per spec §3).
    pub(crate) fn set_unexpected_addr(&self, addr: Addr, tag: Tag) {
        let mut state = self.inner.state.lock().expect("handle state poisoned");
        state.addr = Some(addr);
        state.addr_mine = true;
        state.tag = tag;
    }

    pub(crate) fn set_send_op(&self, op: Option<OpId>) {
        self.inner.state.lock().expect("handle state poisoned").send_op = op;
    }

    pub(crate) fn set_recv_op(&self, op: Option<OpId>) {
        self.inner.state.lock().expect("handle state poisoned").recv_op = op;
    }

    pub(crate) fn send_op(&self) -> Option<OpId> {
        self.inner.state.lock().expect("handle state poisoned").send_op
    }

    pub(crate) fn recv_op(&self) -> Option<OpId> {
        self.inner.state.lock().expect("handle state poisoned").recv_op
    }

    pub(crate) fn set_callback(&self, callback: Option<UserCallback>) {
        self.inner.state.lock().expect("handle state poisoned").callback = callback;
    }

    pub(crate) fn set_last_status(&self, status: Result<()>) {
        self.inner.state.lock().expect("handle state poisoned").last_status = status;
    }

    pub(crate) fn build_callback_info(&self) -> Result<()> {
        self.inner.state.lock().expect("handle state poisoned").last_status.clone()
    }

    pub(crate) fn invoke_callback(&self, info: CallbackInfo) {
        let callback = self
            .inner
            .state
            .lock()
            .expect("handle state poisoned")
            .callback
            .clone();
        if let Some(cb) = callback {
            cb(info);
        }
    }

    /// Push this handle onto its context's completion queue
    /// (`hg_complete`).
    pub(crate) fn complete(&self) {
        self.inner.context.complete(self.clone());
    }

    /// Encode the request header and either dispatch locally (self address)
    /// or post the expected-recv/unexpected-send pair (spec §4.5 O1).
    pub fn forward(&self, callback: Option<UserCallback>, bulk: Option<crate::bulk::BulkHandle>) -> Result<()> {
        self.set_callback(callback);

        let header = RequestHeader {
            id: self.id(),
            cookie: self.cookie(),
            bulk,
        };
        {
            let mut buf = self.inner.in_buf.lock().expect("in_buf poisoned");
            self.inner.class.header_codec().encode_request(&mut buf, &header)?;
        }

        let addr = self.addr().ok_or(RpcError::InvalidParam("handle has no target address"))?;

        if self.inner.class.net_class().is_self(&addr) {
            return crate::processor::process(self.clone());
        }

        let tag = self.inner.class.next_tag();
        self.set_tag(tag);

        crate::callback::post_forward(self.clone(), addr, tag)
    }

    /// Encode the response header (echoing the request's cookie) and either
    /// complete locally (self address) or post the expected-send
    /// (spec §4.5 T2).
    pub fn respond(&self, callback: Option<UserCallback>, _bulk: Option<crate::bulk::BulkHandle>) -> Result<()> {
        self.set_callback(callback);

        let header = ResponseHeader { cookie: self.cookie() };
        {
            let mut buf = self.inner.out_buf.lock().expect("out_buf poisoned");
            self.inner.class.header_codec().encode_response(&mut buf, &header)?;
        }

        let addr = self.addr().ok_or(RpcError::InvalidParam("handle has no peer address"))?;

        if self.inner.class.net_class().is_self(&addr) {
            self.set_last_status(Ok(()));
            self.complete();
            return Ok(());
        }

        crate::callback::post_respond(self.clone(), addr)
    }

    /// Best-effort cancellation of any outstanding network operations on
    /// this handle (SPEC_FULL §7, the source's `HG_Cancel` stub made real).
    pub fn cancel(&self) -> Result<()> {
        let net_context = self.inner.class.net_context().clone();
        if let Some(op) = self.send_op() {
            net_context.cancel(op)?;
        }
        if let Some(op) = self.recv_op() {
            net_context.cancel(op)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect("handle state poisoned");
        f.debug_struct("Handle")
            .field("id", &state.id)
            .field("tag", &state.tag)
            .field("addr", &state.addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::loopback::LoopbackNet;

    fn setup() -> (Class, Context, Addr) {
        let net = LoopbackNet::new_process("p0");
        let class = Class::init(net.class(), net.context(), None, None).unwrap();
        let addr = net.class().self_addr();
        let context = Context::create(class.clone()).unwrap();
        (class, context, addr)
    }

    #[test]
    fn buffer_views_are_offset_past_header() {
        let (class, context, addr) = setup();
        let id = class.register_rpc("noop", Arc::new(|_h| Ok(()))).unwrap();
        let handle = Handle::create(class.clone(), context, addr, id).unwrap();
        let req_size = class.header_codec().request_size();
        assert_eq!(handle.input_buf().len(), handle.in_buf_size() - req_size);
    }

    #[test]
    fn create_rejects_zero_id() {
        let (class, context, addr) = setup();
        assert!(Handle::create(class, context, addr, 0).is_err());
    }
}
