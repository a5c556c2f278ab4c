//! Kubernetes event source.
//!
//! Wraps `kube_runtime::watcher` so the informer can consume it. The watcher
//! already performs the initial list, re-lists after a desync and retries
//! failed watches; errors are surfaced as [`SourceError::Watch`] and the
//! stream keeps going under the default backoff.

use crate::error::SourceError;
use crate::event::WatchEvent;
use futures::{Stream, StreamExt};
use kube::{Api, Resource};
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Maps a watcher event onto the informer's event model.
pub fn map_event<K>(event: watcher::Event<K>) -> WatchEvent<K> {
    match event {
        watcher::Event::Init => WatchEvent::Restarted,
        watcher::Event::InitApply(obj) => WatchEvent::Listed(obj),
        watcher::Event::InitDone => WatchEvent::Synced,
        watcher::Event::Apply(obj) => WatchEvent::Applied(obj),
        watcher::Event::Delete(obj) => WatchEvent::Deleted(obj),
    }
}

/// Watches `api` and yields informer events.
pub fn watch_stream<K>(
    api: Api<K>,
    config: watcher::Config,
) -> impl Stream<Item = Result<WatchEvent<K>, SourceError>> + Send
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .map(|result| result.map(map_event).map_err(SourceError::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::pod;
    use k8s_openapi::api::core::v1::Pod;

    #[test]
    fn test_map_event() {
        assert_eq!(map_event::<Pod>(watcher::Event::Init), WatchEvent::Restarted);
        assert_eq!(map_event::<Pod>(watcher::Event::InitDone), WatchEvent::Synced);
        assert_eq!(
            map_event(watcher::Event::InitApply(pod("ns", "a"))),
            WatchEvent::Listed(pod("ns", "a"))
        );
        assert_eq!(
            map_event(watcher::Event::Apply(pod("ns", "a"))),
            WatchEvent::Applied(pod("ns", "a"))
        );
        assert_eq!(
            map_event(watcher::Event::Delete(pod("ns", "a"))),
            WatchEvent::Deleted(pod("ns", "a"))
        );
    }
}
