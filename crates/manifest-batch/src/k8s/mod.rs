//! Kubernetes-backed collaborators for the builder.
//!
//! This module provides native Kubernetes API access using kube-rs: a
//! cluster connection, lazy API discovery, owner lookup and the
//! [`KubeApplier`](apply::KubeApplier).

pub mod apply;
pub mod client;
pub mod discovery;
pub mod owner;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
