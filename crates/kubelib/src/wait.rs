//! Bounded polling for pod phases.

use std::{fmt, future::Future, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::dynamic::{DynamicError, DynamicResourceResolver, ResourceOrList, Target};

/// Interval and bound for a poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
	pub interval: Duration,
	pub timeout: Duration,
	/// Stops the loop early with [`PollOutcome::Cancelled`].
	pub cancel: CancellationToken,
}

impl PollSettings {
	pub fn new(interval: Duration, timeout: Duration) -> Self {
		Self {
			interval,
			timeout,
			cancel: CancellationToken::new(),
		}
	}

	#[must_use]
	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}
}

impl Default for PollSettings {
	fn default() -> Self {
		Self::new(Duration::from_secs(2), Duration::from_secs(60))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
	Ready(T),
	TimedOut,
	Cancelled,
}

/// Call `check` every `interval` until it yields a value.
///
/// Errors from `check` end the loop immediately. The check always runs at
/// least once, and once more at the deadline if the interval overshoots it.
pub async fn poll_until<T, E, F, Fut>(settings: &PollSettings, mut check: F) -> Result<PollOutcome<T>, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<Option<T>, E>>,
{
	let deadline = Instant::now() + settings.timeout;
	loop {
		if let Some(value) = check().await? {
			return Ok(PollOutcome::Ready(value));
		}

		let now = Instant::now();
		if now >= deadline {
			return Ok(PollOutcome::TimedOut);
		}
		let pause = settings.interval.min(deadline - now);
		tokio::select! {
			() = settings.cancel.cancelled() => return Ok(PollOutcome::Cancelled),
			() = tokio::time::sleep(pause) => {}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
	Pending,
	Running,
	Succeeded,
	Failed,
	Unknown,
}

impl PodPhase {
	pub fn is_terminal(self) -> bool {
		matches!(self, PodPhase::Succeeded | PodPhase::Failed | PodPhase::Unknown)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			PodPhase::Pending => "Pending",
			PodPhase::Running => "Running",
			PodPhase::Succeeded => "Succeeded",
			PodPhase::Failed => "Failed",
			PodPhase::Unknown => "Unknown",
		}
	}

	/// The phase of a group of pods, once every one of them is terminal.
	///
	/// `Failed` outranks `Unknown`, which outranks `Succeeded`.
	pub fn settle(phases: &[PodPhase]) -> Option<PodPhase> {
		if phases.is_empty() || !phases.iter().all(|p| p.is_terminal()) {
			return None;
		}
		[PodPhase::Failed, PodPhase::Unknown]
			.into_iter()
			.find(|worst| phases.contains(worst))
			.or(Some(PodPhase::Succeeded))
	}
}

impl fmt::Display for PodPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPhase(pub String);

impl fmt::Display for UnknownPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown pod phase `{}`", self.0)
	}
}

impl std::error::Error for UnknownPhase {}

impl FromStr for PodPhase {
	type Err = UnknownPhase;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.to_ascii_lowercase().as_str() {
			"pending" => PodPhase::Pending,
			"running" => PodPhase::Running,
			"succeeded" => PodPhase::Succeeded,
			"failed" => PodPhase::Failed,
			"unknown" => PodPhase::Unknown,
			_ => return Err(UnknownPhase(s.to_string())),
		})
	}
}

/// Poll `probe` until every reported pod is in a terminal phase.
///
/// `probe` returns the current phase of each matching pod. An empty set
/// fails with [`DynamicError::PodsNotFound`] without further polling.
pub async fn wait_for_terminal_phase<F, Fut>(
	namespace: &str,
	selector: &str,
	settings: &PollSettings,
	mut probe: F,
) -> Result<PodPhase, DynamicError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<Vec<PodPhase>, DynamicError>>,
{
	let outcome = poll_until(settings, || {
		let phases = probe();
		async move {
			let phases = phases.await?;
			if phases.is_empty() {
				return Err(DynamicError::PodsNotFound {
					namespace: namespace.to_string(),
					selector: selector.to_string(),
				});
			}
			debug!(?phases, "observed pod phases");
			Ok(PodPhase::settle(&phases))
		}
	})
	.await?;

	let what = || format!("pods `{selector}` in namespace `{namespace}` to finish");
	match outcome {
		PollOutcome::Ready(phase) => {
			info!(%phase, "pods finished");
			Ok(phase)
		}
		PollOutcome::TimedOut => Err(DynamicError::Timeout {
			what: what(),
			timeout: settings.timeout,
		}),
		PollOutcome::Cancelled => Err(DynamicError::Cancelled { what: what() }),
	}
}

impl DynamicResourceResolver {
	/// Wait until the pods matching `label_selector` reach a terminal phase.
	#[instrument(skip(self, settings))]
	pub async fn wait_for_pod_phase(
		&self,
		namespace: &str,
		label_selector: &str,
		settings: &PollSettings,
	) -> Result<PodPhase, DynamicError> {
		let pods = self.resolve("v1", "Pod").await?;
		let target = Target::builder()
			.namespace(namespace)
			.label_selector(label_selector)
			.build();

		wait_for_terminal_phase(namespace, label_selector, settings, || {
			let pods = pods.clone();
			let target = target.clone();
			async move {
				let items = match pods.get(&target).await? {
					ResourceOrList::List(list) => list.items,
					ResourceOrList::Object(object) => vec![object],
				};
				Ok(items
					.iter()
					.map(|pod| {
						pod.data
							.pointer("/status/phase")
							.and_then(serde_json::Value::as_str)
							.map_or(PodPhase::Pending, |phase| {
								phase.parse().unwrap_or(PodPhase::Unknown)
							})
					})
					.collect())
			}
		})
		.await
	}
}
