//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.

pub mod discovery;
pub mod server;
pub mod store;

pub use discovery::{MockApiResource, MockDiscovery};
pub use server::{MockCluster, RecordedRequest, RunningMockCluster};
pub use store::ObjectStore;
