//! Ephemeral dual-indexed registry of pending join requests.
//!
//! Each entry carries its own expiry instant. Lookups check it lazily, so an
//! expired entry is unreachable even before the background sweep removes it.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Telegram chat identifier (groups are negative, private chats positive).
pub type ChatId = i64;

/// Telegram user identifier.
pub type UserId = i64;

/// A join request waiting for proof of a forum account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Nonce the challenge was issued under
    pub nonce: String,
    pub user_id: UserId,
    /// Display name, for messages only
    pub user_name: String,
    /// Private chat used to talk to the requester
    pub chat_channel_id: ChatId,
    /// Group the user asked to join
    pub group_id: ChatId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key is already registered to a live request")]
    Occupied,
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Storage seam for correlation state.
///
/// Entries are write-once: there is no update, only register, read and
/// remove. Removing an absent entry is a no-op.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Register under a nonce. Fails if the nonce was ever seen and not yet swept.
    async fn register_by_nonce(&self, nonce: &str, request: PendingRequest) -> Result<(), StoreError>;

    /// Register under the requester's private channel. Fails if a live entry exists.
    async fn register_by_channel(
        &self,
        channel_id: ChatId,
        request: PendingRequest,
    ) -> Result<(), StoreError>;

    async fn lookup_by_nonce(&self, nonce: &str) -> Option<PendingRequest>;

    async fn lookup_by_channel(&self, channel_id: ChatId) -> Option<PendingRequest>;

    /// Atomically take a live entry. At most one caller receives it.
    async fn remove_by_nonce(&self, nonce: &str) -> Option<PendingRequest>;

    /// Remove the channel entry only if it belongs to `nonce`.
    async fn remove_by_channel(&self, channel_id: ChatId, nonce: &str) -> bool;

    /// Physically drop expired entries from both indices.
    async fn sweep_expired(&self) -> usize;

    /// Number of physically present entries across both indices.
    async fn len(&self) -> usize;

    /// Lifetime of a registered entry.
    fn ttl(&self) -> Duration;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Clone)]
struct TtlEntry {
    request: PendingRequest,
    expires_at: Instant,
}

impl TtlEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct TtlIndex<K: Eq + Hash> {
    entries: DashMap<K, TtlEntry>,
}

impl<K: Eq + Hash + Clone> TtlIndex<K> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn insert(&self, key: K, entry: TtlEntry, now: Instant, replace_expired: bool) -> Result<(), StoreError> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if replace_expired && occupied.get().is_expired(now) {
                    occupied.insert(entry);
                    Ok(())
                } else {
                    Err(StoreError::Occupied)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    fn get(&self, key: &K, now: Instant) -> Option<PendingRequest> {
        // Expired entries stay in place until swept or taken.
        let entry = self.entries.get(key)?;
        (!entry.is_expired(now)).then(|| entry.request.clone())
    }

    fn take(&self, key: &K, now: Instant) -> Option<PendingRequest> {
        let (_, entry) = self.entries.remove(key)?;
        (!entry.is_expired(now)).then_some(entry.request)
    }

    fn remove_if_nonce(&self, key: &K, nonce: &str) -> bool {
        self.entries
            .remove_if(key, |_, e| e.request.nonce == nonce)
            .is_some()
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory [`CorrelationStore`] backed by two `DashMap`s.
#[derive(Debug)]
pub struct InMemoryCorrelationStore {
    by_nonce: TtlIndex<String>,
    by_channel: TtlIndex<ChatId>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryCorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            by_nonce: TtlIndex::new(),
            by_channel: TtlIndex::new(),
            ttl,
            clock,
        }
    }

    fn entry(&self, request: PendingRequest, now: Instant) -> TtlEntry {
        TtlEntry {
            request,
            expires_at: now + self.ttl,
        }
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn register_by_nonce(&self, nonce: &str, request: PendingRequest) -> Result<(), StoreError> {
        let now = self.clock.now();
        // A nonce is never recycled, not even after it expired.
        self.by_nonce
            .insert(nonce.to_string(), self.entry(request, now), now, false)
    }

    async fn register_by_channel(
        &self,
        channel_id: ChatId,
        request: PendingRequest,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.by_channel
            .insert(channel_id, self.entry(request, now), now, true)
    }

    async fn lookup_by_nonce(&self, nonce: &str) -> Option<PendingRequest> {
        self.by_nonce.get(&nonce.to_string(), self.clock.now())
    }

    async fn lookup_by_channel(&self, channel_id: ChatId) -> Option<PendingRequest> {
        self.by_channel.get(&channel_id, self.clock.now())
    }

    async fn remove_by_nonce(&self, nonce: &str) -> Option<PendingRequest> {
        self.by_nonce.take(&nonce.to_string(), self.clock.now())
    }

    async fn remove_by_channel(&self, channel_id: ChatId, nonce: &str) -> bool {
        self.by_channel.remove_if_nonce(&channel_id, nonce)
    }

    async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.by_nonce.sweep(now) + self.by_channel.sweep(now)
    }

    async fn len(&self) -> usize {
        self.by_nonce.len() + self.by_channel.len()
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn request(nonce: &str) -> PendingRequest {
        PendingRequest {
            nonce: nonce.to_string(),
            user_id: 42,
            user_name: "alice".to_string(),
            chat_channel_id: 100,
            group_id: 7,
        }
    }

    fn store() -> (InMemoryCorrelationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryCorrelationStore::with_clock(TTL, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_register_and_lookup_both_indices() {
        let (store, _) = store();
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();
        store.register_by_channel(100, request("abc123")).await.unwrap();

        assert_eq!(store.lookup_by_nonce("abc123").await, Some(request("abc123")));
        assert_eq!(store.lookup_by_channel(100).await, Some(request("abc123")));
        assert_eq!(store.lookup_by_nonce("other").await, None);
        assert_eq!(store.lookup_by_channel(101).await, None);
    }

    #[tokio::test]
    async fn test_entries_unreachable_after_ttl() {
        let (store, clock) = store();
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();
        store.register_by_channel(100, request("abc123")).await.unwrap();

        clock.advance(TTL - Duration::from_secs(1));
        assert!(store.lookup_by_nonce("abc123").await.is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.lookup_by_nonce("abc123").await, None);
        assert_eq!(store.lookup_by_channel(100).await, None);
        assert_eq!(store.remove_by_nonce("abc123").await, None);
    }

    #[tokio::test]
    async fn test_live_keys_are_never_overwritten() {
        let (store, _) = store();
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();
        store.register_by_channel(100, request("abc123")).await.unwrap();

        assert_eq!(
            store.register_by_nonce("abc123", request("abc123")).await,
            Err(StoreError::Occupied)
        );
        assert_eq!(
            store.register_by_channel(100, request("def456")).await,
            Err(StoreError::Occupied)
        );
        assert_eq!(store.lookup_by_channel(100).await.unwrap().nonce, "abc123");
    }

    #[tokio::test]
    async fn test_expired_channel_can_be_reused_but_nonce_cannot() {
        let (store, clock) = store();
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();
        store.register_by_channel(100, request("abc123")).await.unwrap();
        clock.advance(TTL);

        assert!(store.register_by_channel(100, request("def456")).await.is_ok());
        assert_eq!(
            store.register_by_nonce("abc123", request("abc123")).await,
            Err(StoreError::Occupied)
        );
    }

    #[tokio::test]
    async fn test_remove_by_nonce_is_single_shot() {
        let (store, _) = store();
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();

        assert_eq!(store.remove_by_nonce("abc123").await, Some(request("abc123")));
        assert_eq!(store.remove_by_nonce("abc123").await, None);
        assert_eq!(store.lookup_by_nonce("abc123").await, None);
    }

    #[tokio::test]
    async fn test_remove_by_channel_checks_owner() {
        let (store, _) = store();
        store.register_by_channel(100, request("abc123")).await.unwrap();

        assert!(!store.remove_by_channel(100, "def456").await);
        assert!(store.lookup_by_channel(100).await.is_some());
        assert!(store.remove_by_channel(100, "abc123").await);
        assert!(!store.remove_by_channel(100, "abc123").await);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired() {
        let (store, clock) = store();
        store.register_by_nonce("old", request("old")).await.unwrap();
        store.register_by_channel(100, request("old")).await.unwrap();
        clock.advance(Duration::from_secs(300));
        store.register_by_nonce("new", request("new")).await.unwrap();

        clock.advance(Duration::from_secs(300));
        assert_eq!(store.sweep_expired().await, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.lookup_by_nonce("new").await.is_some());

        clock.advance(TTL);
        store.sweep_expired().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_takes_yield_one_winner() {
        let (store, _) = store();
        let store = Arc::new(store);
        store.register_by_nonce("abc123", request("abc123")).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.remove_by_nonce("abc123").await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
