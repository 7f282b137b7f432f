use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal::data_types::*;

/// the roster of registered participants. cloning shares the roster
///
/// participants are only ever added. ids are `<role>-<uuid>`, so participants registered
/// by directories in different processes never collide
#[derive(Clone, Default)]
pub struct Directory {
    inner: Arc<RwLock<Roster>>,
}

#[derive(Default)]
struct Roster {
    participants: Vec<Participant>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, role: Role) -> Participant {
        let participant = Participant {
            id: format!("{}-{}", role, uuid::Uuid::new_v4()),
            name: name.into(),
            role,
        };
        self.write().participants.push(participant.clone());
        log::info!("registered {} {} as {}", role, name, &participant.id);
        participant
    }

    /// admits a participant registered elsewhere, e.g. by another process on the LAN.
    /// returns false if the id is already known
    pub fn insert(&self, participant: Participant) -> bool {
        let mut roster = self.write();
        if roster.participants.iter().any(|p| p.id == participant.id) {
            return false;
        }
        log::info!(
            "admitted {} {} as {}",
            participant.role,
            &participant.name,
            &participant.id
        );
        roster.participants.push(participant);
        true
    }

    /// returns the roster in registration order
    pub fn list(&self) -> Vec<Participant> {
        self.read().participants.clone()
    }

    pub fn find(&self, id: &str) -> Option<Participant> {
        self.read().participants.iter().find(|p| p.id == id).cloned()
    }

    // a writer can't leave the roster half-updated, so a poisoned lock is still usable
    fn read(&self) -> RwLockReadGuard<'_, Roster> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Roster> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
