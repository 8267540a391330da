//! A lightweight RPC runtime over a pluggable unreliable-message transport.
//!
//! A [`Class`] binds a network transport (and, optionally, a bulk-transfer
//! layer) and owns the RPC registry and tag allocator for one process. One
//! or more [`Context`]s drive progress and deliver completions. A [`Handle`]
//! represents one in-flight RPC exchange, created by the origin via
//! [`Handle::create`] and forwarded with [`Handle::forward`], or created
//! internally by the listen pump on the target and completed with
//! [`Handle::respond`].
//!
//! Three boundaries are left as traits for the host application to satisfy
//! with real infrastructure: [`net::NetClass`]/[`net::NetContext`] (the
//! transport), [`header::HeaderCodec`] (the wire header), and
//! [`bulk::BulkClass`]/[`bulk::BulkContext`] (large-data transfer). The
//! crate ships one concrete implementation of each so it is independently
//! testable: [`net::loopback`], [`header::BinHeaderCodec`], and
//! [`bulk::NullBulk`].

pub mod bulk;
pub mod class;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod header;
pub mod net;
pub mod registry;
pub mod tag;

mod callback;
mod processor;
mod progress;

pub use class::Class;
pub use context::Context;
pub use error::{error_to_string, version_get, Result, RpcError};
pub use handle::{CallbackInfo, Handle, HandleInfo, UserCallback};
