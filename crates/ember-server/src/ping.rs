//! Ping/pong liveness traffic.
//!
//! A ping carries a `u32` sequence number which the pong echoes back.
//! Replies to connected peers go straight out through their connection.
//! Connectionless senders have no slot, so their replies are queued and the
//! main loop sends them directly after `update`.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;

use ember_net::{BinaryStream, CoreMessage, Message, NetError, NetSession, Session};

/// Pongs owed to senders without a connection slot.
pub type PendingReplies = Rc<RefCell<Vec<(SocketAddr, u32)>>>;

/// Shared counters and queues filled in by the ping handlers.
#[derive(Debug, Default, Clone)]
pub struct PingStats {
    /// Pings answered or queued.
    pub pings_seen: Rc<Cell<u32>>,
    /// Pongs received.
    pub pongs_seen: Rc<Cell<u32>>,
    /// Replies the main loop still has to send directly.
    pub pending: PendingReplies,
}

/// Build a ping carrying `sequence`.
pub fn ping(sequence: u32) -> Result<Message, NetError> {
    let mut message = Message::new(CoreMessage::Ping);
    message.write(sequence)?;
    Ok(message)
}

/// Build the pong answering `sequence`.
pub fn pong(sequence: u32) -> Result<Message, NetError> {
    let mut message = Message::new(CoreMessage::Pong);
    message.write(sequence)?;
    Ok(message)
}

/// Register the ping responder and pong logger on `session`.
pub fn register<S: Session>(session: &mut S) -> Result<PingStats, NetError> {
    let stats = PingStats::default();

    let pings = Rc::clone(&stats.pings_seen);
    let pending = Rc::clone(&stats.pending);
    session.register_message(
        CoreMessage::Ping,
        move |mut message: Message, net: &mut NetSession| {
            let sequence = message.read::<u32>().unwrap_or_default();
            pings.set(pings.get() + 1);
            match (message.sender(), message.sender_address()) {
                (Some(index), _) => {
                    let sent = pong(sequence).map(|reply| net.send_message_to_index(index, &reply));
                    if !matches!(sent, Ok(true)) {
                        tracing::warn!("Could not answer ping {sequence} from {index}");
                    }
                }
                (None, Some(address)) => pending.borrow_mut().push((address, sequence)),
                (None, None) => tracing::warn!("Dropping ping {sequence} with no return path"),
            }
        },
    )?;

    let pongs = Rc::clone(&stats.pongs_seen);
    session.register_message(
        CoreMessage::Pong,
        move |mut message: Message, _: &mut NetSession| {
            let sequence = message.read::<u32>().unwrap_or_default();
            pongs.set(pongs.get() + 1);
            tracing::debug!(
                "Pong {sequence} from {:?} ({:?})",
                message.sender(),
                message.sender_address()
            );
        },
    )?;

    Ok(stats)
}

/// Take every queued reply.
pub fn drain_pending(pending: &PendingReplies) -> Vec<(SocketAddr, u32)> {
    std::mem::take(&mut *pending.borrow_mut())
}
