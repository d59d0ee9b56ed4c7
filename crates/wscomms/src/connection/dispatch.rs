//! Inbound frame dispatch: decode, look up the route, deliver.

use metrics::counter;
use tracing::{debug, warn};
use wscomms_core::{Frame, Result, WsError};

use super::Connection;
use crate::metrics::{DECODE_ERRORS_TOTAL, MESSAGES_RECEIVED_TOTAL, UNROUTED_MESSAGES_TOTAL};
use crate::route::RouteTable;
use crate::route::receiver::{Delivery, Inbound};

/// Frame payload as it came off the socket.
pub(crate) enum Payload<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// Handle one inbound data frame.
///
/// Decode failures and unknown routes are logged, counted on the connection
/// and returned; the caller keeps the connection open either way.
pub(crate) async fn dispatch(
    payload: Payload<'_>,
    connection: &Connection,
    routes: &RouteTable,
) -> Result<Delivery> {
    let decoded = match payload {
        Payload::Text(text) => Frame::decode(text),
        Payload::Binary(bytes) => Frame::decode_bytes(bytes),
    };
    let frame = match decoded {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conn_id = %connection.id(), error = %e, "dropping undecodable frame");
            connection.record_decode_error();
            counter!(DECODE_ERRORS_TOTAL).increment(1);
            return Err(e);
        }
    };

    let Some(manager) = routes.get(&frame.route) else {
        warn!(conn_id = %connection.id(), route = %frame.route, "no handler for route");
        connection.record_unrouted();
        counter!(UNROUTED_MESSAGES_TOTAL).increment(1);
        return Err(WsError::UnroutedMessage { route: frame.route });
    };

    let Frame {
        route,
        message,
        sender,
    } = frame;
    debug!(route = %route, msg = message.name(), "dispatching frame");
    let label = route.clone();
    let inbound = Inbound {
        route,
        message,
        peer: connection.id().clone(),
        sender,
    };
    let delivery = manager.receiver().deliver(inbound).await;
    if delivery == Delivery::Delivered {
        counter!(MESSAGES_RECEIVED_TOTAL, "route" => label).increment(1);
    }
    Ok(delivery)
}
