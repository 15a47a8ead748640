//! [`CornerLightCache`] – partial updates of a cube's four corner lights.
//!
//! The device only accepts all four corners at once. Clients may send the
//! all-zero sentinel (or nothing) for a corner they do not want to change;
//! the cache fills such slots with the last value that was applied.
//!
//! Slots hold the raw wire value so the merged set can be decoded
//! exactly like a fresh request.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use botlink_hal::CUBE_CORNER_COUNT;
use serde_json::Value;

/// Per-corner raw light values; `None` means nothing known.
pub type CornerSet = [Option<Value>; CUBE_CORNER_COUNT];

/// `true` for the "leave this corner unchanged" marker, a value object
/// whose `value` is `[0, 0, 0]`.
pub fn is_sentinel(v: &Value) -> bool {
    match v.get("value").and_then(Value::as_array) {
        Some(rgb) => rgb.len() == 3 && rgb.iter().all(|c| c.as_f64() == Some(0.0)),
        None => false,
    }
}

/// Last applied corner lights, keyed by cube id.
#[derive(Debug, Default)]
pub struct CornerLightCache {
    devices: Mutex<HashMap<u32, CornerSet>>,
}

impl CornerLightCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<u32, CornerSet>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `requested` (up to four positional corner values) with the
    /// cached corners of `device_id`.
    ///
    /// A supplied, non-null, non-sentinel value wins. A sentinel is replaced
    /// by the cached value when there is one, and kept otherwise (it decodes
    /// to an off light). Missing or null slots fall back to the cache.
    pub fn apply_corner_update(&self, device_id: u32, requested: &[Value]) -> CornerSet {
        let cached = self.snapshot(device_id).unwrap_or_default();
        std::array::from_fn(|i| match requested.get(i) {
            Some(v) if !v.is_null() => {
                if is_sentinel(v) && cached[i].is_some() {
                    cached[i].clone()
                } else {
                    Some(v.clone())
                }
            }
            _ => cached[i].clone(),
        })
    }

    /// Persist `applied` as the state of `device_id`. Only call this after
    /// the device accepted the update.
    pub fn commit(&self, device_id: u32, applied: CornerSet) {
        self.devices().insert(device_id, applied);
    }

    pub fn snapshot(&self, device_id: u32) -> Option<CornerSet> {
        self.devices().get(&device_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn light(r: u8, g: u8, b: u8) -> Value {
        json!({"__type": "light", "value": [r, g, b]})
    }

    fn zero() -> Value {
        light(0, 0, 0)
    }

    #[test]
    fn sentinel_detection() {
        assert!(is_sentinel(&zero()));
        assert!(is_sentinel(&json!({"__cozmo_type": "light", "value": [0.0, 0, 0]})));
        assert!(!is_sentinel(&light(0, 0, 1)));
        assert!(!is_sentinel(&json!([0, 0, 0])));
    }

    #[test]
    fn sentinel_keeps_cached_corners() {
        let cache = CornerLightCache::new();
        let (a, b, c, d, e) = (light(1, 0, 0), light(2, 0, 0), light(3, 0, 0), light(4, 0, 0), light(5, 0, 0));
        cache.commit(7, [Some(a.clone()), Some(b.clone()), Some(c), Some(d.clone())]);

        let applied = cache.apply_corner_update(7, &[zero(), zero(), e.clone(), zero()]);
        assert_eq!(applied, [Some(a), Some(b), Some(e), Some(d)]);
    }

    #[test]
    fn failed_apply_leaves_cache_untouched() {
        let cache = CornerLightCache::new();
        let before = [Some(light(1, 1, 1)), Some(light(2, 2, 2)), Some(light(3, 3, 3)), Some(light(4, 4, 4))];
        cache.commit(1, before.clone());

        // Merge without committing, as the dispatcher does on action_failed.
        let _ = cache.apply_corner_update(1, &[zero(), zero(), light(9, 9, 9), zero()]);
        assert_eq!(cache.snapshot(1), Some(before));
    }

    #[test]
    fn empty_cache_keeps_sentinel_and_leaves_missing_slots_empty() {
        let cache = CornerLightCache::new();
        let applied = cache.apply_corner_update(2, &[zero(), Value::Null]);
        assert_eq!(applied, [Some(zero()), None, None, None]);
        assert!(cache.snapshot(2).is_none());
    }

    #[test]
    fn missing_slots_fall_back_to_cache() {
        let cache = CornerLightCache::new();
        let a = light(10, 0, 0);
        cache.commit(3, [None, None, None, Some(a.clone())]);
        let applied = cache.apply_corner_update(3, &[light(1, 2, 3)]);
        assert_eq!(applied, [Some(light(1, 2, 3)), None, None, Some(a)]);
    }

    #[test]
    fn devices_are_independent() {
        let cache = CornerLightCache::new();
        cache.commit(1, [Some(light(1, 0, 0)), None, None, None]);
        assert!(cache.snapshot(2).is_none());
        let applied = cache.apply_corner_update(2, &[zero()]);
        assert_eq!(applied[0], Some(zero()));
    }
}
