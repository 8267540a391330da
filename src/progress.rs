//! Drives the network layer and delivers completions to user callbacks
//! (spec §4.6/§4.7). The listen pump lives here too: it only ever runs at
//! the top of `progress`.

use std::time::Duration;

use crate::context::Context;
use crate::error::{Result, RpcError};
use crate::handle::Handle;
use crate::net::NetError;

/// Top up the processing list to the configured depth, posting a fresh
/// unexpected-receive for each new slot (spec §4.6). Runs only when the
/// network class is in listening mode.
fn run_listen_pump(context: &Context) -> Result<()> {
    let class = context.class().clone();
    let target = class.config().processing_list_size;

    while context.processing_list_len() < target {
        let handle = Handle::create_internal(class.clone(), context.clone())?;
        context.processing_list_push(handle.clone());
        if let Err(err) = crate::callback::post_listen(handle.clone()) {
            context.processing_list_remove(&handle);
            return Err(err);
        }
    }
    Ok(())
}

/// **Progress**: (1) run the listen pump if listening; (2) drain the
/// network's trigger queue until it reports zero events; (3) return
/// immediately if the completion queue already has work; (4) otherwise
/// block in the network layer's own progress call, up to `timeout`
/// (spec §4.7).
pub fn progress(context: &Context, timeout: Duration) -> Result<()> {
    let class = context.class();
    let net_class = class.net_class().clone();
    let net_context = class.net_context().clone();

    if net_class.is_listening() {
        run_listen_pump(context)?;
    }

    loop {
        let delivered = net_context.trigger(u32::MAX)?;
        log::trace!("progress: drained {delivered} network-layer completions");
        if delivered == 0 {
            break;
        }
    }

    if !context.completion_queue_is_empty() {
        return Ok(());
    }

    match net_context.progress(timeout) {
        Ok(()) => Ok(()),
        Err(NetError::Timeout) => Err(RpcError::Timeout),
        Err(err) => Err(RpcError::NetworkError(err)),
    }
}
