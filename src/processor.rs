//! Header-decode, registry-lookup and dispatch on the target (spec §4.5 T1).

use crate::error::{Result, RpcError};
use crate::handle::Handle;

/// Decode and verify the request header carried in `handle`'s input buffer,
/// record its id and cookie on the handle, look up the registered callback
/// for that id, and invoke it.
///
/// Reached two ways: from the unexpected-recv completion on a remote
/// dispatch, and directly from [`Handle::forward`](crate::handle::Handle::forward)
/// when the destination is the local process (spec §4.5 self-dispatch short
/// circuit) — both paths must behave indistinguishably to the RPC callback.
pub(crate) fn process(handle: Handle) -> Result<()> {
    let buf = handle.clone_in_buf();
    let codec = handle.class().header_codec().clone();

    let header = codec.decode_request(&buf)?;
    codec.verify_request(&header)?;

    handle.set_id(header.id);
    handle.set_cookie(header.cookie);

    let Some(callback) = handle.class().callback_for(header.id) else {
        log::warn!("no RPC registered for id {:#x}", header.id);
        return Err(RpcError::NoMatch);
    };

    callback(handle)
}
