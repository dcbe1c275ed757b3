//! Mock Kubernetes API server for integration tests.
//!
//! Serves legacy discovery documents, readiness endpoints and CRUD over an
//! in-memory object store through a real HTTP listener, so clients built
//! from kubeconfig files or bearer tokens can talk to it unchanged.

pub mod discovery;
mod server;
mod store;

pub use discovery::{MockApiResource, MockDiscovery};
pub use server::{write_kubeconfig, MockCluster, RunningMockCluster};
