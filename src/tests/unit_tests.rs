mod hash_table {
    use std::collections::HashMap;
    use std::panic::{RefUnwindSafe, UnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use proptest::prelude::*;
    use rand::Rng;
    use tokio::sync::Barrier as AsyncBarrier;

    use crate::hash::hash_key;
    use crate::{Builder, Error, Group, HashTable, ProbeCount, Sequential};

    static_assertions::assert_impl_all!(HashTable<u64, u64>: Send, Sync);
    static_assertions::assert_impl_all!(HashTable<u16, u32, 4>: Send, Sync);
    static_assertions::assert_impl_all!(Builder<u64, u64>: Send);
    static_assertions::assert_impl_all!(ProbeCount: Send, Sync, RefUnwindSafe, UnwindSafe);
    static_assertions::assert_impl_all!(Error: Send, Sync, Copy, std::error::Error);

    /// Returns the first `count` keys whose candidate buckets satisfy `pred`.
    fn keys_with<const LEN: usize>(
        table: &HashTable<u64, u64, LEN>,
        count: usize,
        pred: impl Fn(usize, usize) -> bool,
    ) -> Vec<u64> {
        (1_u64..)
            .filter(|key| {
                let pair = table.bucket_pair(*key);
                pred(pair.primary, pair.secondary)
            })
            .take(count)
            .collect()
    }

    /// Returns the number of slots holding the key.
    fn occurrences<const LEN: usize>(table: &HashTable<u64, u64, LEN>, key: u64) -> usize {
        let mut count = 0;
        table.for_each(|k, _| count += usize::from(k == key));
        count
    }

    #[test]
    fn capacity() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 0);
        assert_eq!(table.num_buckets(), 2);
        assert_eq!(table.capacity(), 8);

        let table: HashTable<u64, u64, 4> = HashTable::with_seed(9, 0);
        assert_eq!(table.num_buckets(), 3);
        assert_eq!(table.capacity(), 12);

        let table: HashTable<u64, u64> = HashTable::with_seed(0, 0);
        assert_eq!(table.num_buckets(), 1);
        assert_eq!(table.capacity(), 16);
        assert!(table.is_empty());

        assert_eq!(HashTable::<u32, u32, 4>::LOAD_CUTOFF, 3);
        assert_eq!(HashTable::<u32, u32, 16>::LOAD_CUTOFF, 12);
        assert_eq!(HashTable::<u32, u32, 64>::LOAD_CUTOFF, 48);
    }

    #[test]
    fn upsert_query_remove() {
        let table: HashTable<u64, u64> = HashTable::new(1024);
        let group = Sequential::<16>::new();
        for key in 1..=512 {
            assert!(table.upsert(&group, key, key * 2));
        }
        assert_eq!(table.len(), 512);
        for key in 1..=512 {
            assert_eq!(table.query(&group, key), Some(key * 2));
            assert!(table.contains(&group, key));
        }
        assert!(table.query(&group, 513).is_none());

        for key in (1..=512).filter(|k| k % 2 == 0) {
            assert!(table.remove(&group, key));
            assert!(!table.remove(&group, key));
        }
        assert_eq!(table.len(), 256);
        for key in 1..=512 {
            assert_eq!(table.query(&group, key).is_some(), key % 2 == 1);
        }
    }

    #[test]
    fn upsert_replaces() {
        let table: HashTable<u32, u32> = HashTable::new(64);
        let group = Sequential::<4>::new();
        assert!(table.upsert(&group, 9, 1));
        assert!(table.upsert(&group, 9, 2));
        assert_eq!(table.query(&group, 9), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn deletion_visibility() {
        let table: HashTable<u64, u64> = HashTable::new(64);
        let group = Sequential::<16>::new();
        assert!(table.upsert(&group, 42, 1));
        assert!(table.remove(&group, 42));
        assert!(table.query(&group, 42).is_none());
        assert!(table.upsert(&group, 42, 2));
        assert_eq!(table.query(&group, 42), Some(2));
        assert_eq!(occurrences(&table, 42), 1);
    }

    #[test]
    fn load_balance() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 0x1234);
        let group = Sequential::<4>::new();
        let keys = keys_with(&table, 4, |primary, secondary| primary == 0 && secondary == 1);

        // The primary bucket takes entries until it reaches the cutoff.
        for (i, key) in keys.iter().enumerate() {
            assert!(table.upsert(&group, *key, 100 * (i as u64 + 1)));
        }
        for key in &keys[..3] {
            assert_eq!(table.locate(*key), Some(0));
        }
        assert_eq!(table.locate(keys[3]), Some(1));
        assert_eq!(table.occupancy(0), 3);
        assert_eq!(table.occupancy(1), 1);

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.query(&group, *key), Some(100 * (i as u64 + 1)));
        }
    }

    #[test]
    fn tombstone_reuse() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 0xdead_beef);
        let group = Sequential::<2>::new();

        let mut stored = Vec::new();
        let rejected = (1_u64..=9)
            .find(|key| {
                if table.upsert(&group, *key, *key) {
                    stored.push(*key);
                    false
                } else {
                    true
                }
            })
            .unwrap();
        assert!(!table.contains(&group, rejected));
        assert_eq!(table.insert(&group, rejected, 0), Err(Error::TableFull));

        let pair = table.bucket_pair(rejected);
        let victim = *stored
            .iter()
            .find(|key| table.locate(**key) == Some(pair.primary))
            .unwrap();
        assert!(table.remove(&group, victim));
        assert_eq!(table.occupancy(pair.primary), 3);

        assert!(table.upsert(&group, rejected, 7));
        assert_eq!(table.locate(rejected), Some(pair.primary));
        assert_eq!(table.occupancy(pair.primary), 4);
        assert_eq!(table.query(&group, rejected), Some(7));
        assert_eq!(table.len(), stored.len());
    }

    #[test]
    fn update_in_secondary() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 99);
        let group = Sequential::<4>::new();
        let key = keys_with(&table, 1, |primary, secondary| primary == 0 && secondary == 1)[0];
        let fillers: Vec<u64> = keys_with(&table, 4, |primary, _| primary == 0)
            .into_iter()
            .filter(|k| *k != key)
            .take(3)
            .collect();
        for filler in &fillers {
            assert!(table.upsert(&group, *filler, 0));
            assert_eq!(table.locate(*filler), Some(0));
        }
        assert!(table.upsert(&group, key, 1));
        assert_eq!(table.locate(key), Some(1));

        // The primary bucket drops below the cutoff, yet the key must stay unique.
        assert!(table.remove(&group, fillers[0]));
        assert!(table.upsert(&group, key, 2));
        assert_eq!(occurrences(&table, key), 1);
        assert_eq!(table.locate(key), Some(1));
        assert_eq!(table.query(&group, key), Some(2));
        assert_eq!(table.insert(&group, key, 3), Err(Error::Occupied));
    }

    #[test]
    fn single_bucket_full() {
        let table: HashTable<u16, u16, 4> = HashTable::with_seed(4, 5);
        let group = Sequential::<4>::new();
        assert_eq!(table.num_buckets(), 1);
        for key in 1..=4 {
            assert!(table.insert(&group, key, key).is_ok());
        }
        assert!(!table.upsert(&group, 5, 5));
        assert_eq!(table.insert(&group, 5, 5), Err(Error::TableFull));

        // Existing keys can still be updated.
        assert!(table.upsert(&group, 4, 40));
        assert_eq!(table.query(&group, 4), Some(40));

        assert!(table.remove(&group, 1));
        assert!(table.upsert(&group, 5, 5));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn reserved_keys() {
        let table: HashTable<u32, u32> = Builder::new(64).tombstone_offset(8).build().unwrap();
        let group = Sequential::<16>::new();
        assert_eq!(table.insert(&group, 0, 1), Err(Error::ReservedKey));
        assert_eq!(table.insert(&group, u32::MAX - 8, 1), Err(Error::ReservedKey));
        assert_eq!(table.insert(&group, u32::MAX - 9, 1), Err(Error::ReservedKey));
        assert!(table.insert(&group, u32::MAX, 1).is_ok());
        assert!(table.insert(&group, u32::MAX - 7, 2).is_ok());
        assert!(table.insert(&group, u32::MAX - 10, 3).is_ok());
        assert_eq!(table.len(), 3);

        assert!(table.remove(&group, u32::MAX));
        assert!(table.query(&group, u32::MAX).is_none());
        assert_eq!(table.len(), 2);

        let result: Result<HashTable<u16, u16>, Error> =
            Builder::new(64).tombstone_offset(u64::from(u16::MAX) - 1).build();
        assert_eq!(
            result.err(),
            Some(Error::InvalidTombstoneOffset(u64::from(u16::MAX) - 1))
        );
    }

    #[test]
    fn remove_exact() {
        let table: HashTable<u64, u64> = HashTable::new(64);
        let group = Sequential::<16>::new();
        assert!(!table.remove_exact(&group, 1, 1));
        assert!(table.upsert(&group, 1, 1));
        assert!(!table.remove_exact(&group, 1, 2));
        assert_eq!(table.query(&group, 1), Some(1));
        assert!(table.remove_exact(&group, 1, 1));
        assert!(table.is_empty());
    }

    #[test]
    fn unlocked() {
        let table: HashTable<u64, u64> = HashTable::new(256);
        let group = Sequential::<8>::new();
        for key in 1..=100 {
            assert!(table.upsert_unlocked(&group, key, key));
        }
        for key in 1..=100 {
            assert!(table.upsert_unlocked(&group, key, key + 1));
        }
        for key in (1..=100).step_by(3) {
            assert!(table.remove_unlocked(&group, key));
            assert!(!table.remove_unlocked(&group, key));
        }
        for key in 1..=100 {
            let expected = (key % 3 != 1).then_some(key + 1);
            assert_eq!(table.query(&group, key), expected);
        }
    }

    #[test]
    fn clear_and_reseed() {
        let mut table: HashTable<u64, u64, 8> = HashTable::with_seed(128, 1);
        let group = Sequential::<8>::new();
        assert!(table.upsert_all(&group, (1..=64).map(|k| (k, k))));
        assert_eq!(table.len(), 64);

        table.clear();
        assert!(table.is_empty());
        assert!(table.query(&group, 1).is_none());
        assert!(table.upsert(&group, 1, 1));

        table.reseed(2);
        assert_eq!(table.seed(), 2);
        assert!(table.is_empty());
        assert!(table.upsert_all(&group, (1..=64).map(|k| (k, k + 1))));
        let keys: Vec<u64> = (1..=64).collect();
        let values = table.query_all(&group, &keys);
        assert!(values.iter().zip(&keys).all(|(v, k)| *v == Some(k + 1)));
    }

    #[test]
    fn upsert_all_partial() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(4, 3);
        let group = Sequential::<4>::new();
        assert!(!table.upsert_all(&group, (1..=6).map(|k| (k, k))));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn replace_exact() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(4, 21);
        let group = Sequential::<4>::new();
        for key in 1..=4 {
            assert!(table.upsert(&group, key, key * 10));
        }
        assert!(!table.upsert(&group, 5, 50));

        // The old pair must match exactly.
        assert!(!table.replace_exact(&group, 5, 50, 2, 21));
        assert!(!table.replace_exact(&group, 5, 50, 6, 60));
        // The new key must be absent.
        assert!(!table.replace_exact(&group, 3, 31, 2, 20));
        assert_eq!(table.query(&group, 3), Some(30));
        assert_eq!(table.query(&group, 2), Some(20));

        assert!(table.replace_exact(&group, 5, 50, 2, 20));
        assert!(table.query(&group, 2).is_none());
        assert_eq!(table.query(&group, 5), Some(50));
        assert_eq!(table.locate(5), Some(0));
        assert_eq!(table.occupancy(0), 4);
        assert_eq!(table.len(), 4);

        // The slot stays reusable through the regular paths.
        assert!(table.remove(&group, 5));
        assert!(table.upsert(&group, 2, 22));
        assert_eq!(table.query(&group, 2), Some(22));
    }

    #[test]
    fn upsert_exact() {
        let table: HashTable<u32, u32, 4> = HashTable::with_seed(4, 8);
        let group = Sequential::<2>::new();
        for key in 1..=4 {
            assert!(table.upsert(&group, key, key));
        }

        // A present key is updated and the old pair is left alone.
        assert!(table.upsert_exact(&group, 3, 33, 1, 1));
        assert_eq!(table.query(&group, 3), Some(33));
        assert_eq!(table.query(&group, 1), Some(1));

        assert!(table.upsert_exact(&group, 9, 90, 1, 1));
        assert!(table.query(&group, 1).is_none());
        assert_eq!(table.query(&group, 9), Some(90));
        assert!(!table.upsert_exact(&group, 10, 100, 1, 1));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn replace_across_primaries() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 0xabc);
        let group = Sequential::<4>::new();
        // The old key has another primary bucket, so two locks are taken.
        let old_key = keys_with(&table, 1, |primary, _| primary == 1)[0];
        let key = keys_with(&table, 1, |primary, secondary| primary == 0 && secondary == 1)[0];
        let fillers = keys_with(&table, 4, |primary, secondary| primary == 0 && secondary == 0);
        for filler in &fillers {
            assert!(table.upsert(&group, *filler, 0));
        }
        assert!(table.upsert(&group, old_key, 7));
        assert_eq!(table.locate(old_key), Some(1));

        assert!(table.replace_exact(&group, key, 8, old_key, 7));
        assert_eq!(table.locate(key), Some(1));
        assert!(table.query(&group, old_key).is_none());
        assert_eq!(table.query(&group, key), Some(8));

        // Both locks were released.
        assert!(table.remove(&group, key));
        assert!(table.upsert(&group, old_key, 9));
    }

    #[test]
    fn find_random() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 4);
        let group = Sequential::<4>::new();
        assert!(table.find_random(&group, 1, 0).is_none());

        let key = keys_with(&table, 1, |primary, secondary| primary == 0 && secondary == 1)[0];
        // Three residents per bucket always fit.
        let mut residents = keys_with(&table, 3, |primary, secondary| {
            primary == 0 && secondary == 0
        });
        residents.extend(keys_with(&table, 3, |primary, secondary| {
            primary == 1 && secondary == 1
        }));
        for resident in &residents {
            assert!(table.upsert(&group, *resident, *resident + 1));
        }

        let mut seen = HashMap::new();
        for salt in 0..256 {
            let (victim, value) = table.find_random(&group, key, salt).unwrap();
            assert_eq!(value, victim + 1);
            assert!(table.locate(victim).is_some());
            *seen.entry(victim).or_insert(0) += 1;
        }
        assert!(seen.len() > 1);

        // Removed pairs are never returned.
        for resident in &residents[1..] {
            table.remove(&group, *resident);
        }
        for salt in 0..16 {
            assert_eq!(
                table.find_random(&group, key, salt),
                Some((residents[0], residents[0] + 1))
            );
        }
    }

    #[test]
    fn find_smaller_hash() {
        let seed = 0x77;
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, seed);
        let group = Sequential::<4>::new();
        assert!(table.find_smaller_hash(&group, 1).is_none());
        for key in 1..=6 {
            // Keys that do not fit are simply absent from both sides of the comparison.
            table.upsert(&group, key, key * 2);
        }
        assert!(!table.is_empty());

        for key in 7..=64_u64 {
            let pair = table.bucket_pair(key);
            let mut expected: Option<(u64, u64)> = None;
            table.for_each(|k, _| {
                let bucket = table.locate(k);
                if bucket == Some(pair.primary) || bucket == Some(pair.secondary) {
                    let hash = hash_key(k, seed);
                    if hash < hash_key(key, seed)
                        && expected.map_or(true, |(_, min)| hash < min)
                    {
                        expected = Some((k, hash));
                    }
                }
            });
            assert_eq!(
                table.find_smaller_hash(&group, key),
                expected.map(|(k, _)| (k, k * 2))
            );
        }
    }

    #[test]
    fn lane_width_independent() {
        fn placement<G: Group>(group: &G) -> Vec<(u64, Option<usize>)> {
            let table: HashTable<u64, u64, 16> = HashTable::with_seed(512, 0xfeed);
            for key in 1..=200 {
                assert!(table.upsert(group, key, key));
            }
            for key in (1..=200).step_by(7) {
                assert!(table.remove(group, key));
            }
            for key in 201..=230 {
                assert!(table.upsert(group, key, key));
            }
            (1..=230).map(|key| (key, table.locate(key))).collect()
        }

        let expected = placement(&Sequential::<16>::new());
        assert_eq!(placement(&Sequential::<1>::new()), expected);
        assert_eq!(placement(&Sequential::<3>::new()), expected);
        assert_eq!(placement(&Sequential::<64>::new()), expected);
    }

    #[test]
    fn probe_counter() {
        let probes = Arc::new(ProbeCount::default());
        let table: HashTable<u64, u64> = Builder::new(256)
            .probe_counter(probes.clone())
            .build()
            .unwrap();
        let group = Sequential::<16>::new();
        assert_eq!(probes.get(), 0);
        assert!(table.upsert(&group, 1, 1));
        let after_upsert = probes.get();
        assert!(after_upsert > 0);
        assert_eq!(table.query(&group, 1), Some(1));
        let after_query = probes.get();
        assert!(after_query > after_upsert);
        assert_eq!(probes.reset(), after_query);
        assert_eq!(probes.get(), 0);
    }

    #[test]
    fn debug() {
        let table: HashTable<u64, u64, 8> = HashTable::with_seed(64, 5);
        let debug = format!("{table:?}");
        assert!(debug.contains("num_buckets: 8"));
        assert!(debug.contains("seed: 5"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn par_upsert_query() {
        let table: HashTable<u64, u64, 32> = HashTable::new(1 << 15);
        let pairs: Vec<(u64, u64)> = (1..=16384).map(|k| (k, k ^ 0xFF)).collect();
        assert!(table.par_upsert::<Sequential<32>>(&pairs, 8));
        assert_eq!(table.len(), pairs.len());

        let keys: Vec<u64> = (1..=20000).collect();
        let values = table.par_query::<Sequential<8>>(&keys, 5);
        for (key, value) in keys.iter().zip(values) {
            assert_eq!(value, (*key <= 16384).then_some(key ^ 0xFF));
        }
        assert!(table.par_query::<Sequential<8>>(&[], 4).is_empty());
        assert!(table.par_upsert::<Sequential<8>>(&[], 0));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn par_upsert_partial() {
        let table: HashTable<u64, u64, 4> = HashTable::with_seed(8, 3);
        let pairs: Vec<(u64, u64)> = (1..=64).map(|k| (k, k)).collect();
        assert!(!table.par_upsert::<Sequential<4>>(&pairs, 4));
        assert_eq!(table.len(), 8);
    }

    #[cfg(debug_assertions)]
    #[cfg_attr(miri, ignore)]
    #[test]
    #[should_panic(expected = "is reserved")]
    fn par_upsert_worker_panic() {
        let table: HashTable<u64, u64> = HashTable::with_seed(64, 3);
        let pairs: [(u64, u64); 4] = [(1, 1), (2, 2), (0, 3), (4, 4)];
        table.par_upsert::<Sequential<16>>(&pairs, 4);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn replace_during_reads() {
        // The bucket is kept full; the writer keeps evicting the oldest key for a new one.
        let table: Arc<HashTable<u64, u64, 8>> = Arc::new(HashTable::with_seed(8, 2));
        let group = Sequential::<8>::new();
        for key in 1..=8 {
            assert!(table.upsert(&group, key, key << 32));
        }

        let running = Arc::new(AtomicUsize::new(1));
        let reader = {
            let table = table.clone();
            let running = running.clone();
            thread::spawn(move || {
                let group = Sequential::<2>::new();
                while running.load(Relaxed) != 0 {
                    for key in 1..=1024 {
                        if let Some(value) = table.query(&group, key) {
                            assert_eq!(value >> 32, key);
                        }
                    }
                    table.for_each(|key, value| assert_eq!(value >> 32, key));
                }
            })
        };

        for key in 9..=1024_u64 {
            let old_key = key - 8;
            assert!(table.replace_exact(&group, key, key << 32, old_key, old_key << 32));
        }
        running.store(0, Relaxed);
        reader.join().unwrap();

        assert_eq!(table.len(), 8);
        for key in 1017..=1024 {
            assert_eq!(table.query(&group, key), Some(key << 32));
        }
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn concurrent_insert_disjoint() {
        let num_threads = 8;
        let per_thread = 4096_u64;
        let num_keys = per_thread * num_threads as u64;
        // Exactly enough slots for a 75% load factor.
        let capacity = (num_keys as usize * 4 + 2) / 3;
        let table: Arc<HashTable<u64, u64>> = Arc::new(HashTable::with_seed(capacity, 11));
        assert!(num_keys as usize * 4 <= table.capacity() * 3);
        let barrier = Arc::new(Barrier::new(num_threads));
        let handles: Vec<_> = (0..num_threads as u64)
            .map(|thread_id| {
                let table = table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let group = Sequential::<16>::new();
                    barrier.wait();
                    for key in (thread_id * per_thread + 1)..=((thread_id + 1) * per_thread) {
                        assert!(table.upsert(&group, key, key + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let group = Sequential::<16>::new();
        assert_eq!(table.len(), num_keys as usize);
        for key in 1..=num_keys {
            assert_eq!(table.query(&group, key), Some(key + 1));
        }
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_same_keys() {
        let num_tasks = 8;
        let key_space = 64_u64;
        let table: Arc<HashTable<u64, u64, 8>> = Arc::new(HashTable::new(1024));
        let barrier = Arc::new(AsyncBarrier::new(num_tasks));
        let mut task_handles = Vec::with_capacity(num_tasks);
        for task_id in 0..num_tasks as u64 {
            let table = table.clone();
            let barrier = barrier.clone();
            task_handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let group = Sequential::<8>::new();
                for round in 0..2048 {
                    let key = (round * 7 + task_id) % key_space + 1;
                    if round % 3 == 0 {
                        table.remove(&group, key);
                    } else {
                        assert!(table.upsert(&group, key, (key << 32) | task_id));
                    }
                    if let Some(value) = table.query(&group, key) {
                        assert_eq!(value >> 32, key);
                    }
                }
            }));
        }
        for r in futures::future::join_all(task_handles).await {
            assert!(r.is_ok());
        }

        let mut seen = HashMap::new();
        table.for_each(|key, value| {
            assert_eq!(value >> 32, key);
            *seen.entry(key).or_insert(0) += 1;
        });
        assert!(seen.values().all(|count| *count == 1));
        assert_eq!(seen.len(), table.len());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn readers_during_churn() {
        let table: Arc<HashTable<u64, u64, 16>> = Arc::new(HashTable::new(4096));
        let stable_keys = 1..=512_u64;
        let group = Sequential::<16>::new();
        for key in stable_keys.clone() {
            assert!(table.upsert(&group, key, key * 10));
        }

        let num_readers = 4;
        let running = Arc::new(AtomicUsize::new(num_readers));
        let barrier = Arc::new(Barrier::new(num_readers + 1));
        let readers: Vec<_> = (0..num_readers)
            .map(|_| {
                let table = table.clone();
                let barrier = barrier.clone();
                let running = running.clone();
                let stable_keys = stable_keys.clone();
                thread::spawn(move || {
                    let group = Sequential::<4>::new();
                    barrier.wait();
                    for _ in 0..64 {
                        for key in stable_keys.clone() {
                            assert_eq!(table.query(&group, key), Some(key * 10));
                        }
                    }
                    running.fetch_sub(1, Relaxed);
                })
            })
            .collect();

        // Churn on other keys recycles tombstones in the buckets shared with the stable keys.
        barrier.wait();
        let mut rng = rand::rng();
        while running.load(Relaxed) != 0 {
            let key = rng.random_range(1000..3000_u64);
            if table.upsert(&group, key, key * 10) {
                assert_eq!(table.query(&group, key), Some(key * 10));
                assert!(table.remove(&group, key));
            }
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(table.len(), 512);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Upsert(u64, u64),
        Insert(u64, u64),
        Remove(u64),
        RemoveExact(u64, u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        let key = 1_u64..=24;
        prop_oneof![
            (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Upsert(k, v)),
            (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
            key.clone().prop_map(Op::Remove),
            (key, 0_u64..4).prop_map(|(k, v)| Op::RemoveExact(k, v)),
        ]
    }

    proptest! {
        #[cfg_attr(miri, ignore)]
        #[test]
        fn round_trip(key in 1_u64..u64::MAX - 1, value in any::<u64>(), seed in any::<u64>()) {
            let table: HashTable<u64, u64> = HashTable::with_seed(64, seed);
            let group = Sequential::<16>::new();
            prop_assert!(table.upsert(&group, key, value));
            prop_assert_eq!(table.query(&group, key), Some(value));
        }

        #[cfg_attr(miri, ignore)]
        #[test]
        fn upsert_idempotence(key in 1_u32..u32::MAX - 1, v1 in any::<u32>(), v2 in any::<u32>()) {
            let table: HashTable<u32, u32, 8> = HashTable::new(64);
            let group = Sequential::<8>::new();
            prop_assert!(table.upsert(&group, key, v1));
            prop_assert!(table.upsert(&group, key, v2));
            prop_assert_eq!(table.query(&group, key), Some(v2));
            prop_assert_eq!(table.len(), 1);
        }

        #[cfg_attr(miri, ignore)]
        #[test]
        fn model(ops in proptest::collection::vec(op(), 1..256), seed in any::<u64>()) {
            let table: HashTable<u64, u64, 4> = HashTable::with_seed(32, seed);
            let group = Sequential::<4>::new();
            let mut model = HashMap::new();
            for op in ops {
                match op {
                    Op::Upsert(k, v) => {
                        if table.upsert(&group, k, v) {
                            model.insert(k, v);
                        } else {
                            prop_assert!(!model.contains_key(&k));
                        }
                    }
                    Op::Insert(k, v) => match table.insert(&group, k, v) {
                        Ok(()) => prop_assert!(model.insert(k, v).is_none()),
                        Err(Error::Occupied) => prop_assert!(model.contains_key(&k)),
                        Err(Error::TableFull) => prop_assert!(!model.contains_key(&k)),
                        Err(error) => prop_assert!(false, "unexpected {error}"),
                    },
                    Op::Remove(k) => {
                        prop_assert_eq!(table.remove(&group, k), model.remove(&k).is_some());
                    }
                    Op::RemoveExact(k, v) => {
                        let expected = model.get(&k) == Some(&v);
                        prop_assert_eq!(table.remove_exact(&group, k, v), expected);
                        if expected {
                            model.remove(&k);
                        }
                    }
                }
                for k in 1..=24 {
                    prop_assert!(occurrences(&table, k) <= 1);
                }
            }
            prop_assert_eq!(table.len(), model.len());
            for (k, v) in &model {
                prop_assert_eq!(table.query(&group, *k), Some(*v));
            }
        }
    }
}
