//! Shared cache of live block templates, keyed by template id.
//!
//! Entries stay alive as long as a peer may still submit a solution for
//! them: templates built on a superseded tip survive a grace period after
//! the tip change (mining devices lag), and submission never evicts.

use crate::mining::BlockTemplate;
use bitcoin::BlockHash;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// How long templates for an outdated tip remain answerable after the tip
/// moved on.
pub const STALE_TEMPLATE_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct CachedTemplate {
    pub template: Arc<dyn BlockTemplate>,
    pub prev_hash: BlockHash,
    /// Total template fees in satoshis.
    pub fees: i64,
}

struct CacheInner {
    entries: HashMap<u64, CachedTemplate>,
    best_prev_hash: Option<BlockHash>,
    last_tip_change: Instant,
}

/// Template store shared between the update thread (writer) and whoever
/// answers `RequestTransactionData` and `SubmitSolution`. The mutex is
/// held only for O(1) map operations.
pub struct TemplateCache {
    inner: Mutex<CacheInner>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                best_prev_hash: None,
                last_tip_change: Instant::now(),
            }),
        }
    }

    pub fn insert(&self, template_id: u64, entry: CachedTemplate) {
        self.inner
            .lock()
            .expect("cache lock")
            .entries
            .insert(template_id, entry);
    }

    pub fn get(&self, template_id: u64) -> Option<CachedTemplate> {
        self.inner
            .lock()
            .expect("cache lock")
            .entries
            .get(&template_id)
            .cloned()
    }

    pub fn remove(&self, template_id: u64) {
        self.inner
            .lock()
            .expect("cache lock")
            .entries
            .remove(&template_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn best_prev_hash(&self) -> Option<BlockHash> {
        self.inner.lock().expect("cache lock").best_prev_hash
    }

    /// Records a tip change, (re)starting the grace period for templates
    /// built on earlier tips.
    pub fn set_best_prev_hash(&self, prev_hash: BlockHash) {
        let mut inner = self.inner.lock().expect("cache lock");
        if inner.best_prev_hash != Some(prev_hash) {
            inner.best_prev_hash = Some(prev_hash);
            inner.last_tip_change = Instant::now();
        }
    }

    /// Evicts templates whose prev hash no longer matches the tip, once
    /// the grace period has passed. Returns how many entries went away.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock");
        let best = match inner.best_prev_hash {
            Some(best) => best,
            None => return 0,
        };
        if inner.last_tip_change.elapsed() < STALE_TEMPLATE_GRACE {
            return 0;
        }
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.prev_hash == best);
        before - inner.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{mock::MockMining, BlockCreateOptions, Mining};

    fn entry(mock: &MockMining) -> CachedTemplate {
        let template = mock
            .create_new_block(BlockCreateOptions::default())
            .unwrap();
        let prev_hash = template.get_block().header.prev_blockhash;
        CachedTemplate {
            template,
            prev_hash,
            fees: 0,
        }
    }

    #[test]
    fn lookup_round_trip() {
        let mock = MockMining::new();
        let cache = TemplateCache::new();
        cache.insert(1, entry(&mock));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        cache.remove(1);
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_respects_grace_period() {
        let mock = MockMining::new();
        let cache = TemplateCache::new();
        let stale = entry(&mock);
        let stale_prev = stale.prev_hash;
        cache.insert(1, stale);
        cache.set_best_prev_hash(stale_prev);

        // Tip moves: nothing is evicted inside the grace period.
        let new_tip = mock.trigger_new_tip();
        cache.set_best_prev_hash(new_tip.hash);
        assert_eq!(cache.prune(), 0);
        assert_eq!(cache.len(), 1);
    }
}
