use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{SignalingBus, Subscription, SubscriptionId};
use crate::internal::data_types::ParticipantId;
use crate::internal::events::SignalingMessage;

/// delivers signals between participants living in the same process.
/// clones share the same set of subscribers
#[derive(Clone, Default)]
pub struct InProcessBus {
    inner: Arc<Mutex<Subscribers>>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_participant: HashMap<ParticipantId, Vec<(SubscriptionId, mpsc::UnboundedSender<SignalingMessage>)>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// true if at least one live subscription exists for `participant`
    pub fn has_subscriber(&self, participant: &str) -> bool {
        self.lock()
            .by_participant
            .get(participant)
            .map(|subs| subs.iter().any(|(_, tx)| !tx.is_closed()))
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SignalingBus for InProcessBus {
    fn send(&self, message: SignalingMessage) {
        let mut subscribers = self.lock();
        let Some(subs) = subscribers.by_participant.get_mut(&message.to_id) else {
            log::debug!(
                "dropping {:?} from {}: nobody is listening for {}",
                message.kind,
                message.from_id,
                message.to_id
            );
            return;
        };

        // a failed send means the receiver was dropped without unsubscribing
        subs.retain(|(id, tx)| match tx.send(message.clone()) {
            Ok(_) => true,
            Err(_) => {
                log::debug!("pruning closed subscription {}", id);
                false
            }
        });
        if subs.is_empty() {
            subscribers.by_participant.remove(&message.to_id);
        }
    }

    fn subscribe(&self, participant: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        subscribers.next_id += 1;
        let id = SubscriptionId(subscribers.next_id);
        subscribers
            .by_participant
            .entry(participant.to_string())
            .or_default()
            .push((id, tx));
        Subscription::new(id, participant.to_string(), rx)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.lock();
        subscribers
            .by_participant
            .retain(|_, subs| {
                subs.retain(|(sub_id, _)| *sub_id != id);
                !subs.is_empty()
            });
    }
}
