//! The downstream consumer registry owned by a [`crate::transform::TransformStage`].
//!
//! Generalizes the teacher's name-keyed `StageRegistry` of stage factories
//! (previously in this file) into an `RwLock`-guarded map of connected
//! consumers keyed by [`StageId`], implementing the `connect` /
//! `disconnect` / `disconnect_all` / `swap` rules from spec.md §3 and
//! §4.3.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::sink::{ConsumerSink, StageId};

/// A mapping `stage_id -> consumer`, shared read for fan-out, exclusive
/// write for topology edits (spec.md §3).
pub struct ConsumerRegistry<O> {
    consumers: Arc<RwLock<HashMap<StageId, Arc<dyn ConsumerSink<O>>>>>,
}

impl<O> Clone for ConsumerRegistry<O> {
    fn clone(&self) -> Self {
        Self {
            consumers: self.consumers.clone(),
        }
    }
}

impl<O> Default for ConsumerRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> ConsumerRegistry<O> {
    pub fn new() -> Self {
        Self {
            consumers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Inserts `consumer` unless an entry already exists for its id, in
    /// which case the call is silently ignored. Callers that want to
    /// replace an existing entry should use [`ConsumerRegistry::swap`].
    pub fn connect(&self, consumer: Arc<dyn ConsumerSink<O>>) {
        let mut consumers = self.consumers.write().unwrap();
        consumers.entry(consumer.stage_id()).or_insert(consumer);
    }

    /// Removes the entry keyed by `consumer.stage_id()`. Absence is not an
    /// error.
    pub fn disconnect(&self, consumer: &Arc<dyn ConsumerSink<O>>) {
        let mut consumers = self.consumers.write().unwrap();
        consumers.remove(&consumer.stage_id());
    }

    /// Clears every entry.
    pub fn disconnect_all(&self) {
        let mut consumers = self.consumers.write().unwrap();
        consumers.clear();
    }

    /// Replaces `current` with `replacement`, per spec.md §4.3:
    ///
    /// - If `current` isn't registered, this is a no-op.
    /// - If the two ids match, `replacement` overwrites the entry in place.
    /// - If the ids differ and `replacement`'s id is free, `current` is
    ///   removed and `replacement` takes its place under its own id.
    /// - If the ids differ and both are already registered, nothing
    ///   changes; `current` is not silently dropped.
    pub fn swap(&self, current: &Arc<dyn ConsumerSink<O>>, replacement: Arc<dyn ConsumerSink<O>>) {
        let mut consumers = self.consumers.write().unwrap();
        let current_id = current.stage_id();
        let replacement_id = replacement.stage_id();

        if !consumers.contains_key(&current_id) {
            return;
        }

        if current_id == replacement_id {
            consumers.insert(current_id, replacement);
        } else if !consumers.contains_key(&replacement_id) {
            consumers.remove(&current_id);
            consumers.insert(replacement_id, replacement);
        }
        // Both present and distinct: leave the registry untouched.
    }

    /// Sends a clone of `item` to every registered consumer, holding only
    /// the shared read lock for the duration of the fan-out (spec.md §5).
    pub fn fan_out(&self, item: O)
    where
        O: Clone,
    {
        let consumers = self.consumers.read().unwrap();
        for consumer in consumers.values() {
            consumer.add_input(item.clone());
        }
    }

    /// A point-in-time snapshot of the registered consumers, used by
    /// `flush_all` to flush the subgraph connected at the moment the
    /// snapshot was taken (spec.md §4.3, §9).
    pub fn snapshot(&self) -> Vec<Arc<dyn ConsumerSink<O>>> {
        self.consumers.read().unwrap().values().cloned().collect()
    }

    /// Number of currently registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeConsumer {
        id: StageId,
        received: std::sync::Mutex<Vec<u32>>,
        flushing: AtomicBool,
        active: AtomicBool,
        flush_all_calls: AtomicU64,
    }

    impl FakeConsumer {
        fn new(id: StageId) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: std::sync::Mutex::new(Vec::new()),
                flushing: AtomicBool::new(false),
                active: AtomicBool::new(false),
                flush_all_calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ConsumerSink<u32> for FakeConsumer {
        fn stage_id(&self) -> StageId {
            self.id
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
        fn is_flushing(&self) -> bool {
            self.flushing.load(Ordering::SeqCst)
        }
        fn activate(&self) {
            self.active.store(true, Ordering::SeqCst);
        }
        async fn deactivate(&self) {
            self.active.store(false, Ordering::SeqCst);
        }
        async fn flush_one(&self) {
            self.flushing.store(false, Ordering::SeqCst);
        }
        async fn flush_all(&self) {
            self.flush_all_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn has_inputs(&self) -> bool {
            !self.received.lock().unwrap().is_empty()
        }
        fn add_input(&self, input: u32) {
            if self.is_flushing() {
                return;
            }
            self.received.lock().unwrap().push(input);
        }
    }

    #[test]
    fn connect_then_connect_same_id_keeps_first() {
        let registry = ConsumerRegistry::new();
        let first = FakeConsumer::new(2);
        let second = FakeConsumer::new(2);
        registry.connect(first.clone());
        registry.connect(second.clone());
        registry.fan_out(7);
        assert_eq!(*first.received.lock().unwrap(), vec![7]);
        assert!(second.received.lock().unwrap().is_empty());
    }

    #[test]
    fn disconnect_of_unconnected_consumer_is_a_noop() {
        let registry: ConsumerRegistry<u32> = ConsumerRegistry::new();
        let consumer = FakeConsumer::new(9);
        registry.disconnect(&(consumer as Arc<dyn ConsumerSink<u32>>));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn swap_with_same_id_replaces_target() {
        let registry = ConsumerRegistry::new();
        let c1 = FakeConsumer::new(2);
        let c2 = FakeConsumer::new(2);
        registry.connect(c1.clone());
        registry.swap(&(c1.clone() as Arc<dyn ConsumerSink<u32>>), c2.clone());
        registry.fan_out(5);
        assert!(c1.received.lock().unwrap().is_empty());
        assert_eq!(*c2.received.lock().unwrap(), vec![5]);
    }

    #[test]
    fn swap_with_distinct_ids_both_present_is_a_noop() {
        let registry = ConsumerRegistry::new();
        let c1 = FakeConsumer::new(2);
        let c3 = FakeConsumer::new(3);
        registry.connect(c1.clone());
        registry.connect(c3.clone());
        registry.swap(
            &(c1.clone() as Arc<dyn ConsumerSink<u32>>),
            c3.clone() as Arc<dyn ConsumerSink<u32>>,
        );
        assert_eq!(registry.len(), 2);
        registry.fan_out(1);
        assert_eq!(*c1.received.lock().unwrap(), vec![1]);
        assert_eq!(*c3.received.lock().unwrap(), vec![1]);
    }

    #[test]
    fn swap_with_distinct_ids_target_free_moves_entry() {
        let registry = ConsumerRegistry::new();
        let c1 = FakeConsumer::new(2);
        let c3 = FakeConsumer::new(3);
        registry.connect(c1.clone());
        registry.swap(
            &(c1.clone() as Arc<dyn ConsumerSink<u32>>),
            c3.clone() as Arc<dyn ConsumerSink<u32>>,
        );
        assert_eq!(registry.len(), 1);
        registry.fan_out(4);
        assert!(c1.received.lock().unwrap().is_empty());
        assert_eq!(*c3.received.lock().unwrap(), vec![4]);
    }

    #[test]
    fn disconnect_all_clears_registry() {
        let registry = ConsumerRegistry::new();
        registry.connect(FakeConsumer::new(1));
        registry.connect(FakeConsumer::new(2));
        registry.disconnect_all();
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn registry_never_holds_two_entries_for_one_id(
            ops in proptest::collection::vec(0u64..4, 0..200),
        ) {
            let registry: ConsumerRegistry<u32> = ConsumerRegistry::new();
            let consumers: Vec<_> = (0..4).map(FakeConsumer::new).collect();

            for (i, op) in ops.iter().enumerate() {
                let c = consumers[*op as usize].clone();
                match i % 3 {
                    0 => registry.connect(c),
                    1 => registry.disconnect(&(c as Arc<dyn ConsumerSink<u32>>)),
                    _ => {
                        let other = consumers[(*op as usize + 1) % 4].clone();
                        registry.swap(&(c as Arc<dyn ConsumerSink<u32>>), other);
                    }
                }
            }

            let snapshot = registry.snapshot();
            let mut ids: Vec<_> = snapshot.iter().map(|c| c.stage_id()).collect();
            ids.sort_unstable();
            let before = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), before);
        }
    }
}
