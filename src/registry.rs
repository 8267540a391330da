//! Process-scoped RPC id → callback registry ("func_map" in spec §3/§4.1).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, RpcError};
use crate::handle::Handle;

/// Target-side RPC handler: given the dispatched handle, do the work and
/// eventually call [`Handle::respond`].
pub type RpcCallback = Arc<dyn Fn(Handle) -> Result<()> + Send + Sync>;

/// Free function for opaque user data attached via
/// [`RpcRegistry::register_data`].
pub type FreeCallback = Arc<dyn Fn(&(dyn std::any::Any + Send + Sync)) + Send + Sync>;

struct RpcInfo {
    callback: RpcCallback,
    data: Option<Arc<dyn std::any::Any + Send + Sync>>,
    free_callback: Option<FreeCallback>,
}

impl Drop for RpcInfo {
    fn drop(&mut self) {
        if let (Some(data), Some(free)) = (&self.data, &self.free_callback) {
            free(data.as_ref());
        }
    }
}

/// 32-bit FNV-1a string hash, used as the RPC id so names never need to be
/// shipped over the wire (spec GLOSSARY: "RPC id").
pub fn hash_name(name: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Read-mostly registry: registration may race with concurrent
/// progress/trigger on other threads (SPEC_FULL §5 Open Question
/// resolution), guarded by an `RwLock` rather than requiring registration
/// to precede the first `Progress`.
#[derive(Default)]
pub struct RpcRegistry {
    map: RwLock<HashMap<u32, RpcInfo>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with `callback`. Returns the assigned id (the string
    /// hash of `name`). Rejects a hash collision with an already-registered
    /// distinct name rather than silently overwriting it (SPEC_FULL §4.1).
    pub fn register(&self, name: &str, callback: RpcCallback) -> Result<u32> {
        let id = hash_name(name);
        let mut map = self.map.write().expect("registry lock poisoned");
        if map.contains_key(&id) {
            return Err(RpcError::InvalidParam(
                "RPC id collision: name already registered",
            ));
        }
        map.insert(
            id,
            RpcInfo {
                callback,
                data: None,
                free_callback: None,
            },
        );
        Ok(id)
    }

    /// Pure lookup: `(true, hash(name))` if registered, `(false, 0)`
    /// otherwise.
    pub fn registered(&self, name: &str) -> (bool, u32) {
        let id = hash_name(name);
        let map = self.map.read().expect("registry lock poisoned");
        if map.contains_key(&id) {
            (true, id)
        } else {
            (false, 0)
        }
    }

    /// Attach opaque user state (and its optional free callback) to an
    /// existing registration.
    pub fn register_data(
        &self,
        id: u32,
        data: Arc<dyn std::any::Any + Send + Sync>,
        free_callback: Option<FreeCallback>,
    ) -> Result<()> {
        let mut map = self.map.write().expect("registry lock poisoned");
        let info = map.get_mut(&id).ok_or(RpcError::NoMatch)?;
        info.data = Some(data);
        info.free_callback = free_callback;
        Ok(())
    }

    /// Retrieve the user state attached via `register_data`, if any.
    pub fn registered_data(&self, id: u32) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        let map = self.map.read().expect("registry lock poisoned");
        map.get(&id).and_then(|info| info.data.clone())
    }

    /// Look up the callback for `id`, used by the processor to dispatch an
    /// inbound request.
    pub fn callback_for(&self, id: u32) -> Option<RpcCallback> {
        let map = self.map.read().expect("registry lock poisoned");
        map.get(&id).map(|info| info.callback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_round_trip() {
        let registry = RpcRegistry::new();
        let id = registry.register("ping", Arc::new(|_h| Ok(()))).unwrap();
        assert_eq!(id, hash_name("ping"));

        let (found, found_id) = registry.registered("ping");
        assert!(found);
        assert_eq!(found_id, id);

        let (found, found_id) = registry.registered("pong");
        assert!(!found);
        assert_eq!(found_id, 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = RpcRegistry::new();
        registry.register("echo", Arc::new(|_h| Ok(()))).unwrap();
        let err = registry.register("echo", Arc::new(|_h| Ok(()))).unwrap_err();
        assert!(matches!(err, RpcError::InvalidParam(_)));
    }

    #[test]
    fn register_data_round_trips() {
        let registry = RpcRegistry::new();
        let id = registry.register("with_data", Arc::new(|_h| Ok(()))).unwrap();
        registry
            .register_data(id, Arc::new(42u32), None)
            .unwrap();
        let data = registry.registered_data(id).unwrap();
        assert_eq!(*data.downcast_ref::<u32>().unwrap(), 42);
    }

    #[test]
    fn register_data_on_unknown_id_is_no_match() {
        let registry = RpcRegistry::new();
        let err = registry.register_data(999, Arc::new(0u32), None).unwrap_err();
        assert!(matches!(err, RpcError::NoMatch));
    }
}
