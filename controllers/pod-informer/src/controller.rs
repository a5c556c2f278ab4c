//! Main controller implementation.
//!
//! This module contains the `Controller` struct that connects to the cluster
//! and runs one watch-queue-reconcile loop for the configured resource type.

use crate::config::{Config, WatchResource};
use crate::error::ControllerError;
use crate::reconciler::LogReconciler;
use informer::kube_source::watch_stream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Api, Client, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main controller for the pod informer.
pub struct Controller {
    client: Client,
    config: Config,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Pod Informer Controller");

        // Create Kubernetes client
        let client = Client::try_default().await?;

        Ok(Self { client, config })
    }

    /// Runs the controller until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        match self.config.resource {
            WatchResource::Pods => self.run_for::<Pod>(shutdown).await,
            WatchResource::Services => self.run_for::<Service>(shutdown).await,
            WatchResource::Deployments => self.run_for::<Deployment>(shutdown).await,
        }
    }

    async fn run_for<K>(self, shutdown: CancellationToken) -> Result<(), ControllerError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let kind = self.config.resource.kind();
        info!("Watching {} in namespace {}", self.config.resource, self.config.namespace);

        let api: Api<K> = Api::namespaced(self.client, &self.config.namespace);
        let source = watch_stream(api, watcher::Config::default());

        let controller =
            reconcile_runtime::Controller::new(self.config.controller, LogReconciler::<K>::new(kind))?;
        controller.run(source, shutdown).await?;

        info!("Pod Informer Controller stopped");
        Ok(())
    }
}
