//! Test utilities for exercising workers and controllers
//!
//! Provides a scriptable reconciler and a fatal sink that records reports.

use crate::fatal::{FatalEvent, FatalSink};
use crate::reconciler::Reconcile;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use workqueue::{ActionTag, ResourceKey};

/// Fatal sink that keeps every report
#[derive(Debug, Clone, Default)]
pub struct RecordingFatalSink {
    events: Arc<Mutex<Vec<FatalEvent>>>,
}

impl RecordingFatalSink {
    pub fn events(&self) -> Vec<FatalEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl FatalSink for RecordingFatalSink {
    fn report(&self, event: FatalEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug, Error)]
#[error("simulated failure for {0}")]
pub struct SimulatedError(pub String);

/// One recorded handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub action: ActionTag,
    pub key: ResourceKey,
    pub found: bool,
    /// `resourceVersion` of the object the handler received
    pub version: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    /// Remaining failures per key; `u32::MAX` fails forever
    failures: Mutex<HashMap<ResourceKey, u32>>,
    /// Remaining panics per key; `u32::MAX` panics forever
    panics: Mutex<HashMap<ResourceKey, u32>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
    completed: Mutex<Vec<ResourceKey>>,
    in_flight: Mutex<HashSet<ResourceKey>>,
    overlap: AtomicBool,
    /// Observable side effect: keys currently "applied" downstream
    applied: Mutex<HashSet<ResourceKey>>,
}

/// Reconciler whose behaviour per key is set up by the test
#[derive(Debug, Clone, Default)]
pub struct ScriptedReconciler {
    script: Arc<Script>,
}

impl ScriptedReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls for `key`
    pub fn fail(self, key: &str, times: u32) -> Self {
        self.script.failures.lock().unwrap().insert(ResourceKey::from(key), times);
        self
    }

    /// Fail every call for `key`
    pub fn fail_always(self, key: &str) -> Self {
        self.fail(key, u32::MAX)
    }

    /// Panic on the next call for `key`
    pub fn panic_once(self, key: &str) -> Self {
        self.script.panics.lock().unwrap().insert(ResourceKey::from(key), 1);
        self
    }

    /// Panic on every call for `key`
    pub fn panic_always(self, key: &str) -> Self {
        self.script.panics.lock().unwrap().insert(ResourceKey::from(key), u32::MAX);
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.script.delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|call| call.key.as_str() == key).collect()
    }

    pub fn completed(&self) -> Vec<ResourceKey> {
        self.script.completed.lock().unwrap().clone()
    }

    pub fn applied(&self) -> HashSet<ResourceKey> {
        self.script.applied.lock().unwrap().clone()
    }

    pub fn saw_overlap(&self) -> bool {
        self.script.overlap.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconcile<Pod> for ScriptedReconciler {
    type Error = SimulatedError;

    async fn reconcile(
        &self,
        action: ActionTag,
        key: &ResourceKey,
        object: Option<Arc<Pod>>,
    ) -> Result<(), Self::Error> {
        let script = &self.script;
        script.calls.lock().unwrap().push(Call {
            action,
            key: key.clone(),
            found: object.is_some(),
            version: object.as_ref().and_then(|pod| pod.metadata.resource_version.clone()),
        });
        if !script.in_flight.lock().unwrap().insert(key.clone()) {
            script.overlap.store(true, Ordering::SeqCst);
        }

        let delay = *script.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        script.in_flight.lock().unwrap().remove(key);

        if take_one(&mut script.panics.lock().unwrap(), key) {
            panic!("scripted panic for {}", key);
        }

        if take_one(&mut script.failures.lock().unwrap(), key) {
            return Err(SimulatedError(key.to_string()));
        }

        match object {
            Some(_) => script.applied.lock().unwrap().insert(key.clone()),
            None => script.applied.lock().unwrap().remove(key),
        };
        script.completed.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Consumes one scripted occurrence for `key`; `u32::MAX` never runs out
fn take_one(remaining: &mut HashMap<ResourceKey, u32>, key: &ResourceKey) -> bool {
    match remaining.get_mut(key) {
        Some(count) if *count > 0 => {
            if *count != u32::MAX {
                *count -= 1;
            }
            true
        }
        _ => false,
    }
}

/// Polls `condition` every few milliseconds until it holds or `limit` passes
pub async fn eventually(limit: Duration, condition: impl Fn() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
