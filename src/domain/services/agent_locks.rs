//! Per-agent async mutexes serializing order placement within the process

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle locks are pruned once the map grows past this many agents
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct AgentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `agent_id`'s ledger
    pub async fn acquire(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds a reference, so nobody is waiting on it
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_agent_is_serialized() {
        let locks = Arc::new(AgentLocks::new());
        let guard = locks.acquire("agent-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("agent-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_agents_do_not_block() {
        let locks = AgentLocks::new();
        let _a = locks.acquire("agent-1").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("agent-2"))
            .await
            .expect("agent-2 should not wait on agent-1");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = AgentLocks::new();
        for i in 0..=PRUNE_THRESHOLD {
            drop(locks.acquire(&format!("agent-{}", i)).await);
        }
        let _held = locks.acquire("agent-last").await;
        assert_eq!(locks.len(), 1);
    }
}
