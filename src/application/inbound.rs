//! Dialog-forming requests for handsets that are not on a channel
//!
//! Until a paging layer attaches, an INVITE or MESSAGE for a subscriber is
//! refused with 480 and the engine is closed once the error is settled.
//! The call's FIFO is claimed before the refusal starts, so retransmissions
//! and a CANCEL reach the one engine handling the call.

use crate::domain::shared::{CallId, ControlError, Result};
use crate::infrastructure::protocols::sip::{
    EngineParams, IncomingMessage, MessageTransport, SipEngine, SipMethod, SipState,
};
use std::sync::Arc;
use tracing::{debug, info};

const UNAVAILABLE: u16 = 480;

/// IMSI digits from a `sip:IMSI<digits>@host` request URI
fn target_imsi(user: &str) -> Option<&str> {
    let digits = user.strip_prefix("IMSI")?;
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

/// Route a message whose call had no FIFO when it arrived.
///
/// An INVITE or MESSAGE opens the call's FIFO and is handed back to start a
/// refusal. When the FIFO is already open the message joins it instead, as
/// does any other request for a call in progress. Everything else is
/// dropped.
pub async fn claim_new_call(
    transport: &dyn MessageTransport,
    incoming: IncomingMessage,
) -> Option<IncomingMessage> {
    let Some(request) = incoming.message.as_request() else {
        debug!("stray response from {}", incoming.source);
        return None;
    };
    let Some(call_id) = request.call_id().map(CallId::new) else {
        debug!("request without Call-ID from {}", incoming.source);
        return None;
    };
    let opens = matches!(
        request.method(),
        Some(SipMethod::Invite) | Some(SipMethod::Message)
    );
    if opens && transport.add_call(&call_id).await {
        return Some(incoming);
    }

    let method = request.method_name();
    if !transport.enqueue(&call_id, incoming.message).await {
        debug!("ignoring {} for unknown call", method);
        return None;
    }
    debug!("{} joined call {}", method, call_id);
    None
}

/// Refuse one new inbound transaction and return the engine's final state.
///
/// Anything that is not an INVITE or MESSAGE is ignored and left in
/// `Null`.
pub async fn refuse_unattached(
    transport: Arc<dyn MessageTransport>,
    params: Arc<EngineParams>,
    incoming: IncomingMessage,
) -> Result<SipState> {
    let Some(request) = incoming.message.as_request().cloned() else {
        debug!("stray response from {}", incoming.source);
        return Ok(SipState::Null);
    };
    let method = request.method();
    if !matches!(method, Some(SipMethod::Invite) | Some(SipMethod::Message)) {
        debug!("ignoring {} for unknown call", request.method_name());
        return Ok(SipState::Null);
    }

    let call_id = request
        .call_id()
        .map(CallId::new)
        .ok_or_else(|| ControlError::UnsupportedMessage("request without Call-ID".to_string()))?;
    let uri = request.uri();
    let user = uri.auth.as_ref().map(|a| a.user.clone()).unwrap_or_default();
    let imsi = target_imsi(&user).unwrap_or_default().to_string();
    let host = uri.host_with_port.host.to_string();
    info!(
        "{} for {} not attached, refusing call {}",
        request.method_name(),
        user,
        call_id
    );

    let table = transport.clone();
    let mut engine = SipEngine::new(transport, params, &incoming.source.to_string())
        .await?
        .for_incoming(call_id.clone(), &imsi, &user, &host);
    engine.save_invite(request, false);

    let refused = refuse(&mut engine, method).await;
    engine.close().await;
    // A MESSAGE engine never opens the FIFO it was handed
    table.remove_call(&call_id).await;
    refused?;
    Ok(engine.state())
}

async fn refuse(engine: &mut SipEngine, method: Option<SipMethod>) -> Result<()> {
    if method == Some(SipMethod::Invite) {
        engine.mtc_send_trying().await?;
        engine
            .mod_send_error(None, UNAVAILABLE, "Temporarily Unavailable", true)
            .await?;
        engine.mod_wait_for_error_ack(true, None).await;
    } else {
        engine
            .mtsms_send_error(UNAVAILABLE, "Temporarily Unavailable")
            .await?;
    }
    Ok(())
}
