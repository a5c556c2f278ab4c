//! Test fixtures for informer consumers.
//!
//! Available to this crate's tests and, through the `test-util` feature, to
//! downstream crates.

use crate::error::SourceError;
use crate::event::{EventHandler, WatchEvent};
use futures::Stream;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use workqueue::{ActionTag, ResourceKey};

/// Helper to create a test Pod
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Event source fed from a channel.
///
/// The stream ends once every sender has been dropped.
pub fn channel_source<K: Send + 'static>() -> (
    mpsc::UnboundedSender<Result<WatchEvent<K>, SourceError>>,
    impl Stream<Item = Result<WatchEvent<K>, SourceError>> + Send + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });
    (tx, stream)
}

/// Event handler that records every notification it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<(ActionTag, ResourceKey)>>>,
}

impl RecordingHandler {
    /// Notifications received so far, oldest first.
    pub fn events(&self) -> Vec<(ActionTag, ResourceKey)> {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Forgets the recorded notifications.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }
}

impl<K> EventHandler<K> for RecordingHandler {
    fn on_event(&self, action: ActionTag, key: &ResourceKey, _obj: &K) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((action, key.clone()));
    }
}
