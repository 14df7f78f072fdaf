// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the response cache.
//!
//! Random get/set sequences are replayed against the cache and against a
//! plain recency list, which must agree on every lookup.

#[cfg(test)]
mod proptest {
    use crate::cache::{CacheConfig, ResponseCache};
    use crate::test::{expired_meta, live_meta, status_info};
    use crate::types::StatusInfo;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Get(u8),
        Set(u8, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16).prop_map(Op::Get),
            (0u8..16, any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
        ]
    }

    fn value(v: u32) -> StatusInfo {
        status_info(&v.to_string(), live_meta())
    }

    /// Keys ordered from least to most recently accessed, with values.
    #[derive(Default)]
    struct Model {
        order: Vec<(u8, u32)>,
    }

    impl Model {
        fn get(&mut self, k: u8) -> Option<u32> {
            let i = self.order.iter().position(|(x, _)| *x == k)?;
            let entry = self.order.remove(i);
            self.order.push(entry);
            Some(entry.1)
        }

        fn set(&mut self, k: u8, v: u32, size: usize) {
            if let Some(i) = self.order.iter().position(|(x, _)| *x == k) {
                self.order.remove(i);
            } else if self.order.len() >= size {
                self.order.remove(0);
            }
            self.order.push((k, v));
        }
    }

    proptest! {
        /// Property: the cache never holds more than its configured size
        #[test]
        fn prop_size_is_bounded(
            size in 1usize..8,
            ops in prop::collection::vec(op_strategy(), 0..64),
        ) {
            let cache: ResponseCache<u8, StatusInfo> =
                ResponseCache::new(CacheConfig { disabled: false, size });
            for op in ops {
                match op {
                    Op::Get(k) => { let _ = cache.get(&k); }
                    Op::Set(k, v) => cache.set(k, value(v)),
                }
                prop_assert!(cache.len() <= size);
            }
        }

        /// Property: eviction always removes the least recently accessed key
        #[test]
        fn prop_evicts_least_recently_used(
            size in 1usize..8,
            ops in prop::collection::vec(op_strategy(), 0..64),
        ) {
            let cache: ResponseCache<u8, StatusInfo> =
                ResponseCache::new(CacheConfig { disabled: false, size });
            let mut model = Model::default();
            for op in ops {
                match op {
                    Op::Get(k) => {
                        let got = cache
                            .get(&k)
                            .map(|s| s.router_id.parse::<u32>().expect("id"));
                        prop_assert_eq!(got, model.get(k));
                    }
                    Op::Set(k, v) => {
                        cache.set(k, value(v));
                        model.set(k, v, size);
                    }
                }
            }
            prop_assert_eq!(cache.len(), model.order.len());
        }

        /// Property: a lapsed response is never returned, whatever else
        /// the cache holds
        #[test]
        fn prop_lapsed_is_absent(
            keys in prop::collection::vec(0u8..16, 1..16),
        ) {
            let cache: ResponseCache<u8, StatusInfo> =
                ResponseCache::new(CacheConfig { disabled: false, size: 16 });
            for k in &keys {
                cache.set(*k, status_info("lapsed", expired_meta()));
            }
            for k in &keys {
                prop_assert!(cache.get(k).is_none());
            }
            prop_assert!(cache.expire() > 0);
            prop_assert!(cache.is_empty());
        }
    }
}
