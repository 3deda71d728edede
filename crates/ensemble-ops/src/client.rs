//! Orchestration API client seam.
//!
//! [`ResourceClient`] is the narrow surface the operators consume: get, list,
//! create, patch, delete and a delete-observation watch, per resource kind.
//! [`KubeResourceClient`] implements it over `kube::Api`; the [`mock`] module
//! provides an in-memory implementation that records every call for test
//! assertions, so no operator logic ever needs a live cluster to be
//! exercised.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use ensemble_core::ResourceRef;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{OpsError, Result};

/// Per-kind access to the orchestration API.
///
/// Absence is a valid result for `get` and an empty sequence is a valid
/// result for `list`; neither is an error. Errors from the underlying API
/// surface verbatim as [`OpsError::Client`] with no retries at this layer.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Fetch one resource, or `None` if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List resources matching a label selector such as `key=value`.
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<K>>;

    /// Create a resource from a fully specified manifest.
    async fn create(&self, namespace: &str, resource: &K) -> Result<K>;

    /// Patch a resource toward the desired manifest.
    ///
    /// `cascading` selects whether dependent resources the platform manages
    /// on the caller's behalf may be recreated by the patch; the operators
    /// always pass `false` so per-replica resources are left untouched.
    async fn patch(&self, namespace: &str, name: &str, desired: &K, cascading: bool) -> Result<K>;

    /// Delete a resource. Deleting a resource that does not exist is a
    /// no-op, not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Start observing one resource for deletion.
    ///
    /// The returned watch must be created *before* the delete call it
    /// confirms, so the deletion event cannot be missed.
    fn watch_deleted(&self, namespace: &str, name: &str) -> DeleteWatch;
}

/// One-shot deletion signal scoped to a single resource.
///
/// Completes once the watched resource is observed deleted. The underlying
/// watch is closed deterministically when the signal is consumed or dropped,
/// regardless of outcome.
pub struct DeleteWatch {
    target: ResourceRef,
    rx: oneshot::Receiver<Result<()>>,
    task: Option<JoinHandle<()>>,
}

impl DeleteWatch {
    pub(crate) fn new(
        target: ResourceRef,
        rx: oneshot::Receiver<Result<()>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { target, rx, task }
    }

    /// Wait until the deletion is observed.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::WatchClosed`] if the watch ends before the
    /// deletion was confirmed.
    pub async fn deleted(mut self) -> Result<()> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OpsError::WatchClosed(self.target.clone())),
        }
    }
}

impl Drop for DeleteWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// [`ResourceClient`] implementation over the Kubernetes API.
pub struct KubeResourceClient<K> {
    client: Client,
    kind: &'static str,
    _marker: PhantomData<fn() -> K>,
}

impl<K> KubeResourceClient<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    /// Create a client for one resource kind. The kind string is only used
    /// for logging and error reporting.
    #[must_use]
    pub fn new(client: Client, kind: &'static str) -> Self {
        Self {
            client,
            kind,
            _marker: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K>
    where
        K: DeserializeOwned + Serialize + Clone + Debug,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + DeserializeOwned
        + Serialize
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let params = ListParams::default().labels(selector);
        Ok(self.api(namespace).list(&params).await?.items)
    }

    async fn create(&self, namespace: &str, resource: &K) -> Result<K> {
        let created = self
            .api(namespace)
            .create(&PostParams::default(), resource)
            .await?;
        info!(kind = self.kind, namespace, "created resource");
        Ok(created)
    }

    async fn patch(&self, namespace: &str, name: &str, desired: &K, cascading: bool) -> Result<K> {
        // Merge patches never cascade to dependents; the flag only matters
        // to mock implementations.
        let _ = cascading;
        let patched = self
            .api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(desired))
            .await?;
        debug!(kind = self.kind, namespace, name, "patched resource");
        Ok(patched)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind = self.kind, namespace, name, "deleted resource");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind = self.kind, namespace, name, "already absent on delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn watch_deleted(&self, namespace: &str, name: &str) -> DeleteWatch {
        let target = ResourceRef::new(self.kind, namespace, name);
        let api = self.api(namespace);
        let (tx, rx) = oneshot::channel();
        let watched = target.clone();
        let task = tokio::spawn(async move {
            let config = WatcherConfig::default().fields(&format!("metadata.name={}", watched.name));
            let stream = watcher(api, config);
            futures::pin_mut!(stream);
            let mut tx = Some(tx);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::Delete(_)) => {
                        debug!(target = %watched, "deletion observed");
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // The watcher reconnects on its own; only the stream
                        // ending counts as the watch closing.
                        debug!(target = %watched, error = %e, "watch error, retrying");
                    }
                }
            }
            warn!(target = %watched, "watch closed before deletion was observed");
            if let Some(tx) = tx.take() {
                let _ = tx.send(Err(OpsError::WatchClosed(watched.clone())));
            }
        });
        DeleteWatch::new(target, rx, Some(task))
    }
}

/// An in-memory client for testing operators without a cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::BTreeMap;

    use kube::ResourceExt;
    use parking_lot::Mutex;

    use super::{
        async_trait, oneshot, DeleteWatch, OpsError, PhantomData, ResourceClient, ResourceRef,
        Result,
    };

    /// One recorded API call, in invocation order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        /// `get` was invoked.
        Get {
            /// Namespace argument.
            namespace: String,
            /// Name argument.
            name: String,
        },
        /// `list` was invoked.
        List {
            /// Namespace argument.
            namespace: String,
            /// Selector argument.
            selector: String,
        },
        /// `create` was invoked.
        Create {
            /// Namespace argument.
            namespace: String,
            /// Name of the created resource.
            name: String,
        },
        /// `patch` was invoked.
        Patch {
            /// Namespace argument.
            namespace: String,
            /// Name argument.
            name: String,
            /// Whether cascading semantics were requested.
            cascading: bool,
        },
        /// `delete` was invoked.
        Delete {
            /// Namespace argument.
            namespace: String,
            /// Name argument.
            name: String,
        },
        /// `watch_deleted` was invoked.
        WatchDeleted {
            /// Namespace argument.
            namespace: String,
            /// Name argument.
            name: String,
        },
    }

    struct Inner<K> {
        resources: BTreeMap<(String, String), K>,
        calls: Vec<Call>,
        patches: Vec<K>,
        delete_watchers: Vec<(String, String, oneshot::Sender<Result<()>>)>,
    }

    /// A mock client that stores resources in memory and records calls.
    pub struct MockClient<K> {
        kind: &'static str,
        inner: Mutex<Inner<K>>,
        _marker: PhantomData<fn() -> K>,
    }

    impl<K> MockClient<K>
    where
        K: kube::Resource + Clone,
    {
        /// Create an empty mock for one resource kind.
        #[must_use]
        pub fn new(kind: &'static str) -> Self {
            Self {
                kind,
                inner: Mutex::new(Inner {
                    resources: BTreeMap::new(),
                    calls: Vec::new(),
                    patches: Vec::new(),
                    delete_watchers: Vec::new(),
                }),
                _marker: PhantomData,
            }
        }

        /// Seed a resource into the mock cluster state.
        pub fn insert(&self, namespace: &str, resource: K) {
            let name = resource.name_any();
            self.inner
                .lock()
                .resources
                .insert((namespace.to_string(), name), resource);
        }

        /// Fetch the current stored state of a resource.
        #[must_use]
        pub fn stored(&self, namespace: &str, name: &str) -> Option<K> {
            self.inner
                .lock()
                .resources
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        /// Every call recorded so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<Call> {
            self.inner.lock().calls.clone()
        }

        /// Every patch payload sent so far, in order.
        #[must_use]
        pub fn patches(&self) -> Vec<K> {
            self.inner.lock().patches.clone()
        }

        /// Names passed to `delete`, in order.
        #[must_use]
        pub fn deleted_names(&self) -> Vec<String> {
            self.inner
                .lock()
                .calls
                .iter()
                .filter_map(|c| match c {
                    Call::Delete { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect()
        }

        fn matches_selector(resource: &K, selector: &str) -> bool {
            let labels = resource.labels();
            selector.split(',').all(|clause| {
                clause
                    .split_once('=')
                    .is_some_and(|(k, v)| labels.get(k.trim()).is_some_and(|lv| lv == v.trim()))
            })
        }
    }

    #[async_trait]
    impl<K> ResourceClient<K> for MockClient<K>
    where
        K: kube::Resource + Clone + Send + Sync + 'static,
    {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Get {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
            Ok(inner
                .resources
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::List {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            });
            Ok(inner
                .resources
                .iter()
                .filter(|((ns, _), r)| ns == namespace && Self::matches_selector(r, selector))
                .map(|(_, r)| r.clone())
                .collect())
        }

        async fn create(&self, namespace: &str, resource: &K) -> Result<K> {
            let name = resource.name_any();
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Create {
                namespace: namespace.to_string(),
                name: name.clone(),
            });
            inner
                .resources
                .insert((namespace.to_string(), name), resource.clone());
            Ok(resource.clone())
        }

        async fn patch(
            &self,
            namespace: &str,
            name: &str,
            desired: &K,
            cascading: bool,
        ) -> Result<K> {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Patch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                cascading,
            });
            let key = (namespace.to_string(), name.to_string());
            if !inner.resources.contains_key(&key) {
                return Err(OpsError::Missing(ResourceRef::new(
                    self.kind, namespace, name,
                )));
            }
            inner.patches.push(desired.clone());
            inner.resources.insert(key, desired.clone());
            Ok(desired.clone())
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Delete {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
            inner
                .resources
                .remove(&(namespace.to_string(), name.to_string()));
            let mut remaining = Vec::new();
            for (ns, n, tx) in inner.delete_watchers.drain(..) {
                if ns == namespace && n == name {
                    let _ = tx.send(Ok(()));
                } else {
                    remaining.push((ns, n, tx));
                }
            }
            inner.delete_watchers = remaining;
            Ok(())
        }

        fn watch_deleted(&self, namespace: &str, name: &str) -> DeleteWatch {
            let (tx, rx) = oneshot::channel();
            let mut inner = self.inner.lock();
            inner.calls.push(Call::WatchDeleted {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
            inner
                .delete_watchers
                .push((namespace.to_string(), name.to_string(), tx));
            DeleteWatch::new(ResourceRef::new(self.kind, namespace, name), rx, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Call, MockClient};
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn mock_get_absent_is_none() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        assert!(client.get("ns", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mock_create_then_get() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        client.create("ns", &config_map("a", &[])).await.unwrap();
        assert!(client.get("ns", "a").await.unwrap().is_some());
        assert_eq!(
            client.calls()[0],
            Call::Create {
                namespace: "ns".to_string(),
                name: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn mock_list_filters_by_selector() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        client.insert("ns", config_map("a", &[("app", "x")]));
        client.insert("ns", config_map("b", &[("app", "y")]));
        client.insert("other", config_map("c", &[("app", "x")]));

        let found = client.list("ns", "app=x").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn mock_patch_absent_is_error() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        let err = client
            .patch("ns", "missing", &config_map("missing", &[]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::Missing(_)));
    }

    #[tokio::test]
    async fn mock_delete_fires_watch() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        client.insert("ns", config_map("a", &[]));
        let watch = client.watch_deleted("ns", "a");
        client.delete("ns", "a").await.unwrap();
        watch.deleted().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_mock_watch_reports_closed() {
        let client = MockClient::<ConfigMap>::new("ConfigMap");
        let watch = client.watch_deleted("ns", "a");
        drop(client);
        let err = watch.deleted().await.unwrap_err();
        assert!(matches!(err, OpsError::WatchClosed(_)));
    }
}
