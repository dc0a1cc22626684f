// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-stream observer sets whose engine listeners follow their use.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ObserverSet, Subscription, SubscriptionChannel};

/// Pose of a tracked anchor relative to its reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTransform {
    pub translation: [f32; 3],
    /// Unit quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: f32,
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: 1.0,
        }
    }
}

struct Entry<T> {
    observers: Arc<ObserverSet<T>>,
    subscription: Option<Subscription>,
    registration_failed: bool,
}

/// Observer sets keyed by stream name.
///
/// [`synchronize`](Self::synchronize) keeps exactly one subscription per
/// stream that has observers and drops the ones nobody observes any more.
pub struct ObservableMap<T> {
    entries: HashMap<String, Entry<T>>,
}

impl<T> ObservableMap<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Observer set for `stream`, created empty on first use.
    pub fn get_or_create(&mut self, stream: &str) -> Arc<ObserverSet<T>> {
        let entry = self.entries.entry(stream.to_owned()).or_insert_with(|| Entry {
            observers: Arc::new(ObserverSet::new()),
            subscription: None,
            registration_failed: false,
        });
        Arc::clone(&entry.observers)
    }

    pub fn get(&self, stream: &str) -> Option<Arc<ObserverSet<T>>> {
        self.entries.get(stream).map(|e| Arc::clone(&e.observers))
    }

    pub fn is_subscribed(&self, stream: &str) -> bool {
        self.entries
            .get(stream)
            .is_some_and(|e| e.subscription.is_some())
    }

    /// Number of live subscriptions.
    pub fn subscribed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.subscription.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bring listener registrations in line with observer use.
    ///
    /// A stream whose registration fails is reported once and left
    /// unsubscribed until its observers go away and come back.
    pub fn synchronize(&mut self, channel: &SubscriptionChannel) {
        for (stream, entry) in &mut self.entries {
            match (entry.observers.is_used(), entry.subscription.is_some()) {
                (true, false) if !entry.registration_failed => {
                    match channel.subscribe(stream, Arc::clone(&entry.observers)) {
                        Ok(subscription) => entry.subscription = Some(subscription),
                        Err(e) => {
                            tracing::warn!("Stream '{}' disabled: {}", stream, e);
                            entry.registration_failed = true;
                        }
                    }
                }
                (false, true) => {
                    if let Some(subscription) = entry.subscription.take() {
                        subscription.unsubscribe();
                    }
                }
                (false, false) => entry.registration_failed = false,
                _ => {}
            }
        }
    }

    /// Unsubscribe every stream and forget all observer sets.
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(subscription) = entry.subscription {
                subscription.unsubscribe();
            }
        }
    }
}

impl<T> Default for ObservableMap<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
