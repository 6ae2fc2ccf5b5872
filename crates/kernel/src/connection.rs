//! Connection bookkeeping: viewer circuit state, per-neighbour remote
//! presences and the initial attachment rez registry.
//!
//! # Invariants
//! - An entry in the initial-rez registry older than its TTL is never honoured.
//! - A remote presence is either establishing or established, never both.

use regionspace_common::{AvatarId, RegionHandle};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default lifetime of an initial-rez mark.
pub const INITIAL_REZ_TTL: Duration = Duration::from_secs(5 * 60);

/// State of the viewer circuit backing a presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Established,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePresenceState {
    Establishing,
    Established,
}

/// Child presences this avatar holds (or is opening) in other regions.
#[derive(Debug, Clone, Default)]
pub struct RemotePresences {
    regions: BTreeMap<RegionHandle, RemotePresenceState>,
}

impl RemotePresences {
    pub fn set(&mut self, region: RegionHandle, state: RemotePresenceState) {
        self.regions.insert(region, state);
    }

    pub fn remove(&mut self, region: RegionHandle) -> Option<RemotePresenceState> {
        self.regions.remove(&region)
    }

    pub fn state(&self, region: RegionHandle) -> Option<RemotePresenceState> {
        self.regions.get(&region).copied()
    }

    pub fn is_established(&self, region: RegionHandle) -> bool {
        self.state(region) == Some(RemotePresenceState::Established)
    }

    pub fn any_establishing(&self) -> bool {
        self.regions
            .values()
            .any(|s| *s == RemotePresenceState::Establishing)
    }

    pub fn regions(&self) -> impl Iterator<Item = RegionHandle> + '_ {
        self.regions.keys().copied()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

/// Avatars whose attachments must be rezzed when they next become root.
///
/// Marked when a presence arrives by login; consumed by the first
/// `make_root`. Marks expire after the configured TTL so a login that never
/// completes does not leak an entry.
#[derive(Debug)]
pub struct InitialRezRegistry {
    ttl: Duration,
    pending: Mutex<HashMap<AvatarId, Instant>>,
}

impl Default for InitialRezRegistry {
    fn default() -> Self {
        Self::new(INITIAL_REZ_TTL)
    }
}

impl InitialRezRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<AvatarId, Instant>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark(&self, avatar: AvatarId) {
        self.mark_at(avatar, Instant::now());
    }

    pub fn mark_at(&self, avatar: AvatarId, at: Instant) {
        tracing::debug!(%avatar, "initial attachment rez pending");
        self.pending().insert(avatar, at);
    }

    /// Consume the mark for `avatar`. Returns true only for a live mark.
    pub fn take(&self, avatar: AvatarId) -> bool {
        self.take_at(avatar, Instant::now())
    }

    pub fn take_at(&self, avatar: AvatarId, now: Instant) -> bool {
        match self.pending().remove(&avatar) {
            Some(marked) => now.saturating_duration_since(marked) <= self.ttl,
            None => false,
        }
    }

    /// Drop expired marks, returning how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|_, marked| now.saturating_duration_since(*marked) <= ttl);
        before - pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_mark_once() {
        let registry = InitialRezRegistry::default();
        let avatar = AvatarId::new();
        registry.mark(avatar);
        assert!(registry.take(avatar));
        assert!(!registry.take(avatar));
    }

    #[test]
    fn expired_mark_is_not_honoured() {
        let registry = InitialRezRegistry::new(Duration::from_secs(10));
        let avatar = AvatarId::new();
        let t0 = Instant::now();
        registry.mark_at(avatar, t0);
        assert!(!registry.take_at(avatar, t0 + Duration::from_secs(11)));
        assert!(registry.is_empty());
    }

    #[test]
    fn purge_drops_only_stale_marks() {
        let registry = InitialRezRegistry::new(Duration::from_secs(10));
        let t0 = Instant::now();
        let old = AvatarId::new();
        let fresh = AvatarId::new();
        registry.mark_at(old, t0);
        registry.mark_at(fresh, t0 + Duration::from_secs(8));

        assert_eq!(registry.purge_expired(t0 + Duration::from_secs(12)), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.take_at(fresh, t0 + Duration::from_secs(12)));
    }

    #[test]
    fn remote_presence_states() {
        let mut remote = RemotePresences::default();
        let r2 = RegionHandle::from_location(1001, 1000).unwrap();
        remote.set(r2, RemotePresenceState::Establishing);
        assert!(remote.any_establishing());
        assert!(!remote.is_established(r2));
        remote.set(r2, RemotePresenceState::Established);
        assert!(!remote.any_establishing());
        assert!(remote.is_established(r2));
    }
}
