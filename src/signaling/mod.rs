//! Signaling relays
//!
//! Participants never talk to each other directly until the media transport is up. Offers,
//! answers and ICE candidates travel over a `SignalingBus`. Any relay which keeps per-recipient
//! send order can be plugged in: the in-process bus used when every participant lives in one
//! process, or the HTTP relay (feature `http-relay`) for participants spread over a LAN.
//!
//! Delivery is fire-and-forget. Messages for a participant with no subscription are dropped
//! without telling the sender.

use tokio::sync::mpsc;

use crate::internal::data_types::ParticipantId;
use crate::internal::events::SignalingMessage;

mod in_process;
pub use in_process::InProcessBus;

#[cfg(feature = "http-relay")]
mod http_relay;
#[cfg(feature = "http-relay")]
pub use http_relay::HttpRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "sub#{}", _0)]
pub struct SubscriptionId(pub u64);

pub trait SignalingBus: Send + Sync {
    /// queues `message` for `message.to_id`. never blocks
    fn send(&self, message: SignalingMessage);
    /// every message addressed to `participant` is delivered to the returned subscription,
    /// in send order
    fn subscribe(&self, participant: &str) -> Subscription;
    /// stops delivery to the subscription. unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// receiving end of a `SignalingBus::subscribe`
pub struct Subscription {
    id: SubscriptionId,
    participant: ParticipantId,
    rx: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        participant: ParticipantId,
        rx: mpsc::UnboundedReceiver<SignalingMessage>,
    ) -> Self {
        Self {
            id,
            participant,
            rx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// returns None once the subscription was removed from the bus
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SignalingMessage> {
        self.rx.try_recv().ok()
    }
}
