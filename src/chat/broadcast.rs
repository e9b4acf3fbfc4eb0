//! Fan-out of a line to the members of one room.

use super::member::{Member, MemberId};

/// Outcome of a single fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Number of members the line was queued for.
    pub delivered: usize,
    /// Members whose connection is gone or whose queue is full.
    pub failed: Vec<MemberId>,
}

/// Queue `message` for every member except `exclude`.
///
/// A member that cannot take the line does not stop delivery to the rest;
/// it is reported in [`Delivery::failed`] for the caller to remove.
pub fn fan_out<'a, I>(members: I, message: &str, exclude: Option<MemberId>) -> Delivery
where
    I: IntoIterator<Item = &'a Member>,
{
    let mut delivery = Delivery::default();
    for member in members {
        if Some(member.id) == exclude {
            continue;
        }
        if member.deliver(message) {
            delivery.delivered += 1;
        } else {
            delivery.failed.push(member.id);
        }
    }
    delivery
}
