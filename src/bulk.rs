//! Bulk transfer stub.
//!
//! Out of scope per spec §1: actual bulk data movement is a separate
//! subsystem. The core only owns an optional [`BulkClass`]/[`BulkContext`]
//! pair (or constructs its own no-op [`NullBulk`] if the caller supplies
//! none, mirroring `Class::init`'s ownership rule) and forwards opaque
//! [`BulkHandle`]s through request headers untouched.

use std::sync::Arc;

/// Opaque handle to a registered bulk-transfer region. The core never
/// examines its contents; it is carried in [`crate::header::RequestHeader`]
/// purely for the benefit of a real bulk-transfer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BulkHandle(pub u64);

/// Process-scoped bulk transfer class.
pub trait BulkClass: Send + Sync {
    /// Tear down this bulk class. Idempotent.
    fn finalize(&self) -> crate::error::Result<()>;

    /// Derive a progress-scoped [`BulkContext`] from this class, one per
    /// [`crate::Context`] built over it (spec §6 `Bulk_context_create`).
    fn context_create(&self) -> crate::error::Result<Arc<dyn BulkContext>>;
}

/// Progress-scoped bulk transfer context.
pub trait BulkContext: Send + Sync {
    /// Tear down this context (spec §6 `Bulk_context_destroy`). Idempotent.
    fn destroy(&self) -> crate::error::Result<()>;
}

/// A no-op bulk class/context pair, constructed by [`crate::Class::init`]
/// when the caller does not supply one of its own.
#[derive(Debug, Default)]
pub struct NullBulk;

impl BulkClass for NullBulk {
    fn finalize(&self) -> crate::error::Result<()> {
        Ok(())
    }

    fn context_create(&self) -> crate::error::Result<Arc<dyn BulkContext>> {
        Ok(Arc::new(NullBulk))
    }
}

impl BulkContext for NullBulk {
    fn destroy(&self) -> crate::error::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bulk_finalize_is_infallible() {
        assert!(NullBulk.finalize().is_ok());
    }

    #[test]
    fn null_bulk_context_create_and_destroy_round_trip() {
        let ctx = NullBulk.context_create().unwrap();
        assert!(ctx.destroy().is_ok());
    }
}
