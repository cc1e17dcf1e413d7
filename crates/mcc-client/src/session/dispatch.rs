//! Inbound frame routing.
//!
//! Nothing here fails the connection: frames that cannot be routed are
//! dropped and reported to listeners as a [`RoutingFailure`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use mcc_core::{MaritimeId, PositionTime};
use mcc_protocol::{ClientMessage, RelayMessage, ServiceFault};
use serde_json::Value;
use tracing::{debug, warn};

use super::{BroadcastAck, BroadcastHeader, SessionInner};
use crate::listener::RoutingFailure;
use crate::service::ServiceInvocation;

pub(super) fn handle(inner: &SessionInner, message: RelayMessage) {
    match message {
        RelayMessage::Broadcast {
            message_id,
            channel,
            sender,
            position,
            ack_requested,
            payload,
        } => on_broadcast(inner, message_id, channel, sender, position, ack_requested, &payload),

        RelayMessage::BroadcastAck {
            message_id,
            receiver,
            position,
        } => on_broadcast_ack(inner, message_id, receiver, position),

        RelayMessage::ServiceRegistered { service } => match inner.service(&service) {
            Some(registration) => {
                if registration.mark_registered() {
                    debug!(service = %service, "Service registered with relay");
                }
            }
            None => debug!(service = %service, "Registration ack for a service no longer offered"),
        },

        RelayMessage::ServiceUnregistered { service } => {
            if let Some(registration) = inner.service(&service) {
                inner.remove_service(&registration);
                registration.cancel_locally();
                warn!(service = %service, "Relay withdrew service registration");
            }
        }

        RelayMessage::Invoke {
            invocation_id,
            caller,
            service,
            message_name,
            payload,
        } => on_invoke(
            inner,
            ServiceInvocation {
                invocation_id,
                caller,
                service,
                message_name,
                payload,
            },
        ),

        RelayMessage::InvocationResult {
            invocation_id,
            payload,
        } => complete_invocation(inner, invocation_id, Ok(payload)),

        RelayMessage::InvocationFault {
            invocation_id,
            fault,
        } => complete_invocation(inner, invocation_id, Err(fault)),

        other @ (RelayMessage::Welcome { .. }
        | RelayMessage::KeepAliveAck { .. }
        | RelayMessage::Closing { .. }) => {
            debug!(kind = other.kind(), "Ignoring control frame");
        }
    }
}

pub(super) fn report(inner: &SessionInner, failure: RoutingFailure) {
    warn!(%failure, "Dropped inbound frame");
    inner
        .listeners
        .notify("routing_failure", |l| l.routing_failure(&failure));
}

fn on_broadcast(
    inner: &SessionInner,
    message_id: u64,
    channel: String,
    sender: MaritimeId,
    position: PositionTime,
    ack_requested: bool,
    payload: &Value,
) {
    let Some(descriptor) = inner.registry().lookup(&channel) else {
        report(inner, RoutingFailure::UnknownChannel { channel, sender });
        return;
    };

    let header = BroadcastHeader {
        message_id,
        channel: Arc::clone(descriptor.channel()),
        sender,
        position,
    };

    let mut decode_error = None;
    for subscriber in inner.subscribers(descriptor.type_id()) {
        match catch_unwind(AssertUnwindSafe(|| (subscriber.deliver)(&header, payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => decode_error = Some(e.to_string()),
            Err(_) => warn!(channel = %header.channel, "Broadcast listener panicked"),
        }
    }
    if let Some(reason) = decode_error {
        report(inner, RoutingFailure::MalformedBroadcast { channel, reason });
        return;
    }

    if ack_requested {
        let ack = ClientMessage::broadcast_ack(message_id, header.sender, inner.position());
        if !inner.try_send(ack) {
            debug!(message_id, "Broadcast ack dropped, not connected");
        }
    }
}

fn on_broadcast_ack(
    inner: &SessionInner,
    message_id: u64,
    receiver: MaritimeId,
    position: PositionTime,
) {
    let mut pending = inner.pending_acks.lock();
    let Some(acks) = pending.get(&message_id) else {
        debug!(message_id, %receiver, "Ack for a broadcast nobody waits on");
        return;
    };
    if acks.send(BroadcastAck { receiver, position }).is_err() {
        pending.remove(&message_id);
    }
}

fn on_invoke(inner: &SessionInner, invocation: ServiceInvocation) {
    let invocation_id = invocation.invocation_id;
    let caller = invocation.caller.clone();
    let service = invocation.service.clone();

    let dispatched = inner
        .service(&service)
        .is_some_and(|registration| registration.dispatch(invocation));
    if dispatched {
        return;
    }

    let fault = ServiceFault::service_unavailable(&service);
    if !inner.try_send(ClientMessage::invocation_fault(invocation_id, caller.clone(), fault)) {
        debug!(invocation_id, "Unavailable fault dropped, not connected");
    }
    report(inner, RoutingFailure::UnknownService { service, caller });
}

fn complete_invocation(
    inner: &SessionInner,
    invocation_id: u64,
    outcome: std::result::Result<Value, ServiceFault>,
) {
    let Some(reply) = inner.pending_invocations.lock().remove(&invocation_id) else {
        report(inner, RoutingFailure::UnmatchedReply { invocation_id });
        return;
    };
    if reply.send(outcome).is_err() {
        debug!(invocation_id, "Invocation reply arrived after the caller gave up");
    }
}
