//! Informer
//!
//! Keeps a local mirror of watched objects and turns a watch stream into
//! Added / Updated / Deleted notifications.
//!
//! - [`Store`]: thread-safe cache of the last observed state per [`ResourceKey`]
//! - [`WatchEvent`]: what an event source yields (initial listing, sync point,
//!   incremental changes)
//! - [`Informer`]: applies events to the store, classifies them and calls an
//!   [`EventHandler`] once the store write is done
//! - [`kube_source`]: event source backed by `kube_runtime::watcher`
//!
//! [`ResourceKey`]: workqueue::ResourceKey

pub mod error;
pub mod event;
pub mod informer;
pub mod key;
pub mod kube_source;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use error::{KeyError, SourceError};
pub use event::{EventHandler, WatchEvent};
pub use informer::{Informer, SyncHandle};
pub use key::key_for;
pub use store::Store;
