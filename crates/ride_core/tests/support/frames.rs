#![allow(dead_code)]

use ride_core::ecs::{ConnectionId, RideId};
use ride_core::protocol::{Outbound, ServerEvent};

/// Events delivered to `connection`, in publish order.
pub fn events_for<'a>(messages: &'a [Outbound], connection: &str) -> Vec<&'a ServerEvent> {
    let connection = ConnectionId::from(connection);
    messages
        .iter()
        .filter(|m| m.recipient == connection)
        .map(|m| &m.event)
        .collect()
}

/// Wire names delivered to `connection`.
pub fn names_for(messages: &[Outbound], connection: &str) -> Vec<&'static str> {
    events_for(messages, connection)
        .into_iter()
        .map(ServerEvent::name)
        .collect()
}

pub fn count_named(messages: &[Outbound], name: &str) -> usize {
    messages.iter().filter(|m| m.event.name() == name).count()
}

pub fn about_ride(messages: &[Outbound], ride_id: RideId) -> Vec<&Outbound> {
    messages
        .iter()
        .filter(|m| m.event.ride_id() == Some(ride_id))
        .collect()
}
