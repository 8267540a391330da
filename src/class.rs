//! Process-scoped [`Class`]: the network/bulk references, the RPC registry,
//! and the shared tag allocator (spec §3/§4.1).

use std::sync::Arc;

use crate::bulk::{BulkClass, NullBulk};
use crate::config::RpcConfig;
use crate::error::Result;
use crate::header::{BinHeaderCodec, HeaderCodec};
use crate::net::{NetClass, NetContext};
use crate::registry::{FreeCallback, RpcCallback, RpcRegistry};
use crate::tag::TagAllocator;

struct ClassInner {
    net_class: Arc<dyn NetClass>,
    net_context: Arc<dyn NetContext>,
    bulk_class: Arc<dyn BulkClass>,
    /// Whether `bulk_class` was constructed by this `Class` (and must be
    /// torn down by `finalize`) or borrowed from the caller.
    bulk_owned: bool,
    header_codec: Arc<dyn HeaderCodec>,
    registry: RpcRegistry,
    tag_alloc: TagAllocator,
    config: RpcConfig,
}

/// Process-shared RPC class. Cheap to clone (an `Arc` underneath); every
/// [`crate::Context`] and [`crate::handle::Handle`] keeps one.
#[derive(Clone)]
pub struct Class {
    inner: Arc<ClassInner>,
}

impl Class {
    /// Create a new class over `net_class`/`net_context`. If `bulk_class` is
    /// `None`, the `Class` constructs and owns a [`NullBulk`] of its own;
    /// otherwise the caller's bulk class is borrowed and must outlive the
    /// `Class` (spec §4.1).
    pub fn init(
        net_class: Arc<dyn NetClass>,
        net_context: Arc<dyn NetContext>,
        bulk_class: Option<Arc<dyn BulkClass>>,
        config: Option<RpcConfig>,
    ) -> Result<Self> {
        let (bulk_class, bulk_owned): (Arc<dyn BulkClass>, bool) = match bulk_class {
            Some(b) => (b, false),
            None => (Arc::new(NullBulk), true),
        };
        let max_tag = net_class.max_tag();
        Ok(Self {
            inner: Arc::new(ClassInner {
                net_class,
                net_context,
                bulk_class,
                bulk_owned,
                header_codec: Arc::new(BinHeaderCodec),
                registry: RpcRegistry::new(),
                tag_alloc: TagAllocator::new(max_tag),
                config: config.unwrap_or_default(),
            }),
        })
    }

    /// Use a non-default header codec (e.g. in tests that want to assert on
    /// wire bytes directly). Must be called before any exchange is created.
    pub fn with_header_codec(mut self, codec: Arc<dyn HeaderCodec>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_header_codec must be called before the Class is shared");
        inner.header_codec = codec;
        self
    }

    /// Tear down the owned bulk class, if any. Idempotent in the sense that
    /// dropping the last `Class` clone after calling this is always safe;
    /// unlike the original `HG_Finalize` there is no explicit free to race.
    pub fn finalize(&self) -> Result<()> {
        if self.inner.bulk_owned {
            self.inner.bulk_class.finalize()?;
        }
        Ok(())
    }

    /// Register `name` with `callback`, returning the assigned id (the
    /// string hash of `name`). Rejects a collision with an already
    /// registered distinct name (SPEC_FULL §4.1).
    pub fn register_rpc(&self, name: &str, callback: RpcCallback) -> Result<u32> {
        self.inner.registry.register(name, callback)
    }

    /// Pure lookup: `(true, id)` if `name` is registered, `(false, 0)`
    /// otherwise.
    pub fn registered_rpc(&self, name: &str) -> (bool, u32) {
        self.inner.registry.registered(name)
    }

    /// Attach opaque user state to an existing registration.
    pub fn register_data(
        &self,
        id: u32,
        data: Arc<dyn std::any::Any + Send + Sync>,
        free_callback: Option<FreeCallback>,
    ) -> Result<()> {
        self.inner.registry.register_data(id, data, free_callback)
    }

    /// Retrieve user state attached via [`Class::register_data`].
    pub fn registered_data(&self, id: u32) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        self.inner.registry.registered_data(id)
    }

    pub(crate) fn callback_for(&self, id: u32) -> Option<RpcCallback> {
        self.inner.registry.callback_for(id)
    }

    pub(crate) fn net_class(&self) -> &Arc<dyn NetClass> {
        &self.inner.net_class
    }

    pub(crate) fn net_context(&self) -> &Arc<dyn NetContext> {
        &self.inner.net_context
    }

    pub(crate) fn header_codec(&self) -> &Arc<dyn HeaderCodec> {
        &self.inner.header_codec
    }

    pub(crate) fn bulk_class(&self) -> &Arc<dyn BulkClass> {
        &self.inner.bulk_class
    }

    pub(crate) fn next_tag(&self) -> crate::net::Tag {
        self.inner.tag_alloc.next()
    }

    pub(crate) fn config(&self) -> RpcConfig {
        self.inner.config
    }

    pub(crate) fn max_expected_size(&self) -> usize {
        self.inner.net_class.max_expected_size()
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("max_tag", &self.inner.tag_alloc.max_tag())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::loopback::LoopbackNet;

    fn test_class() -> Class {
        let net = LoopbackNet::new_process("p0");
        Class::init(net.class(), net.context(), None, None).unwrap()
    }

    #[test]
    fn register_then_registered_round_trips() {
        let class = test_class();
        let id = class.register_rpc("ping", Arc::new(|_h| Ok(()))).unwrap();
        assert_eq!(class.registered_rpc("ping"), (true, id));
        assert_eq!(class.registered_rpc("pong"), (false, 0));
    }

    #[test]
    fn finalize_owned_bulk_is_ok() {
        let class = test_class();
        assert!(class.finalize().is_ok());
    }
}
