//! Progress scope: completion queue, in-flight listen slots, and the
//! mutex/condvar pairs guarding them (spec §3/§4.3).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::bulk::BulkContext;
use crate::class::Class;
use crate::error::{Result, RpcError};
use crate::handle::{CallbackInfo, Handle};

struct ContextInner {
    class: Class,
    bulk_context: Arc<dyn BulkContext>,
    completion_queue: Mutex<VecDeque<Handle>>,
    completion_queue_cond: Condvar,
    processing_list: Mutex<Vec<Handle>>,
}

/// Progress scope. Cheap to clone; every [`crate::handle::Handle`] created
/// against it keeps one. Multiple threads may call
/// [`Context::trigger`]/[`crate::Class`]'s progress concurrently against the
/// same `Context` (spec §4.7).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a new progress scope over `class`. The bulk context is
    /// derived from whatever `BulkClass` `class` was actually constructed
    /// with (spec §6 `Bulk_context_create`), not a hardcoded [`NullBulk`]
    /// (see [`crate::bulk::NullBulk`] for the no-op default `Class::init`
    /// falls back to when the caller supplies no bulk class of its own).
    pub fn create(class: Class) -> Result<Self> {
        let bulk_context = class.bulk_class().context_create()?;
        Ok(Self {
            inner: Arc::new(ContextInner {
                class,
                bulk_context,
                completion_queue: Mutex::new(VecDeque::new()),
                completion_queue_cond: Condvar::new(),
                processing_list: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Tear down this context. Fails with [`RpcError::ProtocolError`] if the
    /// completion queue is non-empty — the caller must drain it via
    /// [`Context::trigger`] first (spec §4.3). Also tears down the bulk
    /// context derived in [`Context::create`] (spec §6 `Bulk_context_destroy`).
    pub fn destroy(&self) -> Result<()> {
        let queue = self.inner.completion_queue.lock().expect("queue lock poisoned");
        if !queue.is_empty() {
            return Err(RpcError::ProtocolError(
                "completion queue is non-empty; drain with trigger() first",
            ));
        }
        drop(queue);
        self.inner.bulk_context.destroy()
    }

    pub fn class(&self) -> &Class {
        &self.inner.class
    }

    /// Drive the network layer forward (spec §4.7). Does not invoke any
    /// user callback; callbacks are only ever run from [`Context::trigger`].
    pub fn progress(&self, timeout: Duration) -> Result<()> {
        crate::progress::progress(self, timeout)
    }

    pub(crate) fn bulk_context(&self) -> &Arc<dyn BulkContext> {
        &self.inner.bulk_context
    }

    /// Push a completed handle onto the completion queue and wake one
    /// waiter, if any (`hg_complete`).
    pub(crate) fn complete(&self, handle: Handle) {
        let mut queue = self.inner.completion_queue.lock().expect("queue lock poisoned");
        queue.push_front(handle);
        self.inner.completion_queue_cond.notify_all();
    }

    pub(crate) fn completion_queue_is_empty(&self) -> bool {
        self.inner
            .completion_queue
            .lock()
            .expect("queue lock poisoned")
            .is_empty()
    }

    /// Current length of the processing list, used by the listen pump to
    /// decide whether more unexpected receives need posting.
    pub(crate) fn processing_list_len(&self) -> usize {
        self.inner
            .processing_list
            .lock()
            .expect("processing list lock poisoned")
            .len()
    }

    pub(crate) fn processing_list_push(&self, handle: Handle) {
        self.inner
            .processing_list
            .lock()
            .expect("processing list lock poisoned")
            .push(handle);
    }

    /// Remove `handle` from the processing list by identity. Returns `true`
    /// if it was found (mirrors `hg_list_remove_data`).
    pub(crate) fn processing_list_remove(&self, handle: &Handle) -> bool {
        let mut list = self
            .inner
            .processing_list
            .lock()
            .expect("processing list lock poisoned");
        if let Some(pos) = list.iter().position(|h| h.is_same(handle)) {
            list.remove(pos);
            true
        } else {
            false
        }
    }

    /// Deliver up to `max_count` completions, blocking up to `timeout` when
    /// the queue is empty. Returns the number of callbacks actually
    /// invoked (spec §4.7).
    pub fn trigger(&self, timeout: Duration, max_count: u32) -> Result<u32> {
        let mut count = 0u32;
        let deadline = Instant::now() + timeout;

        while count < max_count {
            let handle = {
                let mut queue = self
                    .inner
                    .completion_queue
                    .lock()
                    .expect("queue lock poisoned");
                while queue.is_empty() {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return if count > 0 {
                            Ok(count)
                        } else {
                            Err(RpcError::Timeout)
                        };
                    }
                    let (guard, result) = self
                        .inner
                        .completion_queue_cond
                        .wait_timeout(queue, remaining)
                        .expect("queue lock poisoned");
                    queue = guard;
                    if result.timed_out() && queue.is_empty() {
                        return if count > 0 {
                            Ok(count)
                        } else {
                            Err(RpcError::Timeout)
                        };
                    }
                }
                queue.pop_back().expect("just checked non-empty")
            };

            let info = handle.build_callback_info();
            handle.invoke_callback(CallbackInfo {
                class: self.inner.class.clone(),
                context: self.clone(),
                handle: handle.clone(),
                status: info,
            });
            // `handle` (this local clone) drops at the end of this
            // iteration, releasing the completion queue's ownership share.
            count += 1;
        }
        Ok(count)
    }

    /// [`Context::trigger`] with `max_count` defaulted from
    /// [`crate::config::RpcConfig::default_trigger_batch`], for callers
    /// that do not want to pick a batch size themselves.
    pub fn trigger_default(&self, timeout: Duration) -> Result<u32> {
        self.trigger(timeout, self.inner.class.config().default_trigger_batch)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::loopback::LoopbackNet;

    #[test]
    fn destroy_fails_while_queue_non_empty_and_succeeds_after_drain() {
        let net = LoopbackNet::new_process("p0");
        let class = Class::init(net.class(), net.context(), None, None).unwrap();
        class
            .register_rpc("echo", Arc::new(|h: Handle| h.respond(None, None)))
            .unwrap();
        let context = Context::create(class.clone()).unwrap();

        let id = class.registered_rpc("echo").1;
        let handle = Handle::create(class.clone(), context.clone(), net.class().self_addr(), id).unwrap();
        {
            let mut buf = handle.output_buf_mut();
            buf[..2].copy_from_slice(b"hi");
        }
        handle.forward(None, None).unwrap();

        assert!(matches!(
            context.destroy(),
            Err(RpcError::ProtocolError(_))
        ));

        context
            .trigger(Duration::from_millis(200), 1)
            .expect("trigger should deliver the loopback completion");

        assert!(context.destroy().is_ok());
    }

    #[test]
    fn trigger_default_uses_configured_batch_size() {
        let net = LoopbackNet::new_process("p0");
        let config = crate::config::RpcConfig {
            default_trigger_batch: 2,
            ..Default::default()
        };
        let class = Class::init(net.class(), net.context(), None, Some(config)).unwrap();
        class
            .register_rpc("echo", Arc::new(|h: Handle| h.respond(None, None)))
            .unwrap();
        let context = Context::create(class.clone()).unwrap();
        let id = class.registered_rpc("echo").1;

        for _ in 0..2 {
            let handle = Handle::create(class.clone(), context.clone(), net.class().self_addr(), id).unwrap();
            handle.forward(None, None).unwrap();
        }

        let delivered = context
            .trigger_default(Duration::from_millis(200))
            .expect("trigger_default should deliver both loopback completions");
        assert_eq!(delivered, 2);
    }
}
