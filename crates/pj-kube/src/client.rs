//! Cluster client: service status and pod resolution

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams};
use kube::Client;

use crate::error::ClusterError;

/// Identifies the workload to connect to
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    pub namespace: String,
    pub service: String,
    /// Explicit pod override. Without it the first pod matching the service
    /// selector is used, which is only as deterministic as the underlying
    /// listing.
    pub pod: Option<String>,
}

impl ClusterTarget {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            pod: None,
        }
    }

    pub fn with_pod(mut self, pod: Option<String>) -> Self {
        self.pod = pod;
        self
    }
}

/// Reachability of the target workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    NotFound,
}

/// Thin wrapper over the cluster control-plane API
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Connect using the ambient kubeconfig / in-cluster configuration
    pub async fn connect() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub(crate) fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Check whether the target service exists.
    ///
    /// Not-found is a status, not an error; anything else is a fatal
    /// cluster API error wrapping its cause.
    pub async fn service_status(
        &self,
        target: &ClusterTarget,
    ) -> Result<ServiceStatus, ClusterError> {
        match self.services(&target.namespace).get(&target.service).await {
            Ok(_) => Ok(ServiceStatus::Running),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(ServiceStatus::NotFound),
            Err(e) => Err(ClusterError::Api(e)),
        }
    }

    /// Resolve the target to a pod name.
    ///
    /// An explicit pod override wins; otherwise the service's label selector
    /// is listed and the first matching pod is taken.
    pub async fn resolve_pod(&self, target: &ClusterTarget) -> Result<String, ClusterError> {
        if let Some(pod) = &target.pod {
            return Ok(pod.clone());
        }

        let service = match self.services(&target.namespace).get(&target.service).await {
            Ok(service) => service,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(ClusterError::TargetNotFound {
                    namespace: target.namespace.clone(),
                    service: target.service.clone(),
                });
            }
            Err(e) => return Err(ClusterError::Api(e)),
        };

        let selector = service
            .spec
            .and_then(|spec| spec.selector)
            .unwrap_or_default();
        if selector.is_empty() {
            return Err(ClusterError::MissingSelector {
                service: target.service.clone(),
            });
        }

        let params = ListParams::default().labels(&selector_string(&selector));
        let pods = self.pods(&target.namespace).list(&params).await?;

        pods.items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .next()
            .ok_or_else(|| ClusterError::NoPodsForService {
                namespace: target.namespace.clone(),
                service: target.service.clone(),
            })
    }
}

/// Render a label selector map as the API's `k=v,k=v` list format
pub(crate) fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_string_joins_sorted_pairs() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "web".to_string());
        selector.insert("tier".to_string(), "frontend".to_string());
        assert_eq!(selector_string(&selector), "app=web,tier=frontend");
    }

    #[test]
    fn selector_string_single_pair() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "web".to_string());
        assert_eq!(selector_string(&selector), "app=web");
    }

    #[test]
    fn pod_override_wins() {
        let target = ClusterTarget::new("ns1", "web").with_pod(Some("web-7f9".to_string()));
        assert_eq!(target.pod.as_deref(), Some("web-7f9"));
    }
}
