//! QuoteCache - bounded TTL cache of resolved quotes
//!
//! Each symbol owns a slot behind its own async mutex. Callers hold the slot
//! while they fetch, so concurrent lookups for one symbol share a single
//! upstream call while different symbols proceed independently. Callers that
//! queued behind a fetch get its outcome, success or failure, without going
//! upstream again.

use chrono::Duration;
use lru::LruCache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::entities::quote::Quote;
use crate::domain::errors::QuoteError;
use crate::domain::services::clock::Clock;

/// Cached quote entry with timestamp
#[derive(Clone, Debug)]
struct CachedQuote {
    quote: Quote,
    cached_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct SlotState {
    cached: Option<CachedQuote>,
    last_error: Option<QuoteError>,
}

#[derive(Default)]
struct Slot {
    state: AsyncMutex<SlotState>,
    /// Completed fetches, successful or not
    fetches: AtomicU64,
}

pub struct QuoteCache {
    slots: Mutex<LruCache<String, Arc<Slot>>>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl QuoteCache {
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
            ttl,
            clock,
        }
    }

    /// Slot for `symbol`. Over capacity, the least recently used idle slots
    /// are evicted; a slot some caller still holds is never dropped.
    fn slot(&self, symbol: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(symbol) {
            return slot.clone();
        }
        let slot = Arc::new(Slot::default());
        slots.put(symbol.to_string(), slot.clone());

        while slots.len() > self.capacity {
            let idle = slots
                .iter()
                .rev()
                .find(|(_, slot)| Arc::strong_count(slot) == 1)
                .map(|(key, _)| key.clone());
            match idle {
                Some(key) => {
                    slots.pop(&key);
                }
                None => break,
            }
        }
        slot
    }

    /// Return the cached quote for `symbol` while it is younger than the TTL,
    /// otherwise run `fetch` and cache its result. Errors are handed to the
    /// callers already waiting on the slot but are not cached for later ones.
    pub async fn get_or_fetch<F, Fut>(&self, symbol: &str, fetch: F) -> Result<Quote, QuoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Quote, QuoteError>>,
    {
        let slot = self.slot(symbol);
        let seen = slot.fetches.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(cached) = state.cached.as_ref() {
            let age = self.clock.now() - cached.cached_at;
            if age < self.ttl {
                tracing::debug!("Quote cache hit for {} (age: {}ms)", symbol, age.num_milliseconds());
                return Ok(cached.quote.clone());
            }
        }

        if slot.fetches.load(Ordering::Acquire) != seen {
            if let Some(error) = state.last_error.clone() {
                tracing::debug!("Sharing failed lookup for {}: {}", symbol, error);
                return Err(error);
            }
        }

        // Expired entries are dropped before the refetch so a failure leaves nothing behind
        state.cached = None;

        let result = fetch().await;
        match &result {
            Ok(quote) => {
                state.cached = Some(CachedQuote {
                    quote: quote.clone(),
                    cached_at: self.clock.now(),
                });
                state.last_error = None;
            }
            Err(error) => state.last_error = Some(error.clone()),
        }
        slot.fetches.fetch_add(1, Ordering::Release);
        result
    }

    /// Number of symbols currently holding a slot
    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
