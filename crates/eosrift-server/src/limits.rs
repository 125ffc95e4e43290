//! Per-token concurrent tunnel limit

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Counts active tunnels per token id.
#[derive(Default, Clone)]
pub struct TunnelLimiter {
    active: Arc<Mutex<HashMap<i64, usize>>>,
}

/// RAII permit for one active tunnel. Dropping it releases the slot.
pub struct TunnelPermit {
    active: Option<Arc<Mutex<HashMap<i64, usize>>>>,
    token_id: i64,
}

impl TunnelLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim a tunnel slot. Zero `max_active` or an unknown token
    /// means unlimited; the returned permit is then a no-op.
    pub fn try_acquire(&self, token_id: i64, max_active: usize) -> Option<TunnelPermit> {
        if max_active == 0 || token_id <= 0 {
            return Some(TunnelPermit {
                active: None,
                token_id: 0,
            });
        }

        let mut active = self.active.lock().unwrap();
        let count = active.entry(token_id).or_insert(0);
        if *count >= max_active {
            return None;
        }
        *count += 1;

        Some(TunnelPermit {
            active: Some(Arc::clone(&self.active)),
            token_id,
        })
    }

    #[cfg(test)]
    fn active_count(&self, token_id: i64) -> usize {
        self.active
            .lock()
            .unwrap()
            .get(&token_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for TunnelPermit {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let mut active = active.lock().unwrap();
        match active.get_mut(&self.token_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(&self.token_id);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_and_released() {
        let limiter = TunnelLimiter::new();

        let first = limiter.try_acquire(7, 2).unwrap();
        let second = limiter.try_acquire(7, 2).unwrap();
        assert!(limiter.try_acquire(7, 2).is_none());
        assert_eq!(limiter.active_count(7), 2);

        drop(second);
        assert_eq!(limiter.active_count(7), 1);
        let third = limiter.try_acquire(7, 2).unwrap();

        drop(first);
        drop(third);
        assert_eq!(limiter.active_count(7), 0);
    }

    #[test]
    fn test_unlimited_and_unknown_tokens() {
        let limiter = TunnelLimiter::new();

        // max_active 0 = unlimited
        for _ in 0..10 {
            let permit = limiter.try_acquire(7, 0).unwrap();
            std::mem::forget(permit);
        }
        assert_eq!(limiter.active_count(7), 0);

        // unknown token ids are not tracked
        assert!(limiter.try_acquire(0, 1).is_some());
        assert!(limiter.try_acquire(-3, 1).is_some());
    }

    #[test]
    fn test_independent_tokens() {
        let limiter = TunnelLimiter::new();
        let _a = limiter.try_acquire(1, 1).unwrap();
        assert!(limiter.try_acquire(2, 1).is_some());
        assert!(limiter.try_acquire(1, 1).is_none());
    }
}
