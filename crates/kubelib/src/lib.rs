//! Kubernetes cluster access for test automation.
//!
//! A [`Session`] resolves one authenticated transport configuration from
//! precedence-ordered inputs (in-cluster service account, bearer token +
//! API URL, kubeconfig file + context) and fans it out to a fixed set of
//! typed API-group clients. A [`DynamicResourceResolver`] bound to the same
//! session addresses arbitrary kinds by `(apiVersion, kind)` through
//! server discovery.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use kubelib::{ConfigureOptions, Session, Target};
//!
//! let session = Session::connect(
//! 	&ConfigureOptions::builder().context("k3d-k3d-cluster2").build(),
//! )
//! .await?;
//! let pods = session.resolver()?.resolve("v1", "Pod").await?;
//! let list = pods
//! 	.get(&Target::builder().namespace("default").label_selector("app=x").build())
//! 	.await?;
//! # Ok(())
//! # }
//! ```

pub mod dynamic;
pub mod env;
pub mod options;
pub mod registry;
pub mod session;
pub mod wait;

pub use dynamic::{
	DynamicError, DynamicResourceResolver, ResourceDescriptor, ResourceEvent, ResourceHandle,
	ResourceOrList, ResourceScope, Target, WatchOptions,
};
pub use env::HostEnvironment;
pub use no_proxy::NoProxy;
pub use options::ConfigureOptions;
pub use session::{
	ApiClients, ApiGroup, AuthMode, ClientConfiguration, Session, SessionError, TypedApiClient,
};
pub use wait::{PodPhase, PollOutcome, PollSettings};
