//! The network completion callbacks implementing the request/response state
//! machine (spec §4.5) and the listen pump's request-arrival callback
//! (spec §4.6).

use std::sync::Arc;

use crate::error::{Result, RpcError};
use crate::handle::Handle;
use crate::net::{Addr, NetCbInfo, NetContext, Tag};

/// T0: post an unexpected-receive for a freshly allocated processing-list
/// slot.
pub(crate) fn post_listen(handle: Handle) -> Result<()> {
    let net_context = handle.class().net_context().clone();
    let buf_size = handle.in_buf_size();
    let recv_handle = handle.clone();
    let op = net_context.recv_unexpected(
        buf_size,
        Box::new(move |info| on_recv_input(recv_handle, info)),
    )?;
    handle.set_recv_op(Some(op));
    Ok(())
}

/// O1: post the expected recv for the response, then the unexpected send of
/// the request. The recv is posted first so the response can never arrive
/// before a receive slot exists for it (spec §4.5 rationale).
pub(crate) fn post_forward(handle: Handle, addr: Addr, tag: Tag) -> Result<()> {
    let net_context = handle.class().net_context().clone();
    let out_size = handle.out_buf_size();

    let recv_handle = handle.clone();
    let recv_op = net_context.recv_expected(out_size, &addr, tag, {
        let net_context = net_context.clone();
        Box::new(move |info: NetCbInfo| on_recv_output(recv_handle, info, net_context))
    })?;
    handle.set_recv_op(Some(recv_op));

    let send_handle = handle.clone();
    let in_buf = handle.clone_in_buf();
    let send_op = net_context.send_unexpected(
        in_buf,
        &addr,
        tag,
        Box::new(move |info| on_send_input(send_handle, info)),
    )?;
    handle.set_send_op(Some(send_op));

    Ok(())
}

/// T2: post the expected send of the response.
pub(crate) fn post_respond(handle: Handle, addr: Addr) -> Result<()> {
    let net_context = handle.class().net_context().clone();
    let tag = handle.tag();
    let out_buf = handle.clone_out_buf();

    let send_handle = handle.clone();
    let send_op = net_context.send_expected(
        out_buf,
        &addr,
        tag,
        Box::new(move |info| on_send_output(send_handle, info)),
    )?;
    handle.set_send_op(Some(send_op));

    Ok(())
}

/// Send-input completion: a no-op on success, matching the original's
/// `hg_send_input_cb` (the request send completing carries no further work;
/// the exchange concludes when the *response* arrives).
fn on_send_input(handle: Handle, info: NetCbInfo) {
    handle.set_send_op(None);
    if let Err(err) = info.result {
        log::warn!("forward: unexpected-send of request failed: {err}");
        handle.set_last_status(Err(RpcError::NetworkError(err)));
        handle.complete();
    }
}

/// Recv-input completion: an unexpected request arrived. Pull its bytes out
/// of the transport, record its origin and tag, remove the handle from the
/// processing list, and dispatch it to the registered RPC callback
/// (spec §4.5 T1).
fn on_recv_input(handle: Handle, info: NetCbInfo) {
    let net_context = handle.class().net_context().clone();
    let op = handle.recv_op();
    handle.set_recv_op(None);

    if let Err(err) = info.result {
        log::warn!("listen: unexpected-recv failed: {err}");
        handle.context().processing_list_remove(&handle);
        return;
    }

    let Some(unexpected) = info.unexpected else {
        log::error!("listen: unexpected-recv completion missing source/tag info");
        handle.context().processing_list_remove(&handle);
        return;
    };

    if let Some(op) = op {
        if let Some(buf) = net_context.take_recv_buf(op) {
            handle.replace_in_buf(buf);
        }
    }

    handle.set_unexpected_addr(unexpected.source, unexpected.tag);

    if !handle.context().processing_list_remove(&handle) {
        log::error!("listen: handle was not on the processing list at recv completion");
    }

    if let Err(err) = crate::processor::process(handle) {
        log::error!("listen: could not process inbound request: {err}");
    }
}

/// Send-output completion: the response has gone out; mark the exchange
/// complete (spec §4.5 T3).
fn on_send_output(handle: Handle, info: NetCbInfo) {
    handle.set_send_op(None);
    if let Err(ref err) = info.result {
        log::warn!("respond: expected-send of response failed: {err}");
    }
    handle.set_last_status(info.result.map_err(RpcError::NetworkError));
    handle.complete();
}

/// Recv-output completion: the response arrived. Pull its bytes out of the
/// transport, then decode and verify its header before completing the
/// exchange (spec §4.5 O2).
fn on_recv_output(handle: Handle, info: NetCbInfo, net_context: Arc<dyn NetContext>) {
    let op = handle.recv_op();
    handle.set_recv_op(None);

    if let Err(err) = info.result {
        log::warn!("forward: expected-recv of response failed: {err}");
        handle.set_last_status(Err(RpcError::NetworkError(err)));
        handle.complete();
        return;
    }

    if let Some(op) = op {
        if let Some(buf) = net_context.take_recv_buf(op) {
            handle.replace_out_buf(buf);
        }
    }

    let buf = handle.clone_out_buf();
    let codec = handle.class().header_codec().clone();
    let status = (|| -> Result<()> {
        let header = codec.decode_response(&buf)?;
        codec.verify_response(&header)?;
        if header.cookie != handle.cookie() {
            return Err(RpcError::ProtocolError(
                "response cookie does not match request cookie",
            ));
        }
        Ok(())
    })();

    if let Err(ref err) = status {
        log::error!("forward: response header rejected: {err}");
    }
    handle.set_last_status(status);
    handle.complete();
}
