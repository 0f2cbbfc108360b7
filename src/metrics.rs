//! Login and key-set telemetry recorded through the `metrics` facade.

// crates.io
use metrics::Label;
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_LOGINS_TOTAL: &str = "jwt_auth_logins_total";
const METRIC_AUTH_URLS_TOTAL: &str = "jwt_auth_auth_urls_total";
const METRIC_KEYSET_REFRESH_TOTAL: &str = "jwt_auth_keyset_refresh_total";
const METRIC_KEYSET_REFRESH_DURATION: &str = "jwt_auth_keyset_refresh_duration_seconds";

/// Role label used until a caller-supplied role name resolves against the role store.
pub const UNKNOWN_ROLE: &str = "unknown";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
	std::sync::OnceLock::new();

/// Login flow a metric refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginFlow {
	/// Authorization-code callback.
	Oidc,
	/// Directly presented JWT.
	Jwt,
}
impl LoginFlow {
	fn as_str(self) -> &'static str {
		match self {
			LoginFlow::Oidc => "oidc",
			LoginFlow::Jwt => "jwt",
		}
	}
}

/// Coarse outcome of a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
	/// Identity produced.
	Success,
	/// Expected rejection of the caller's credentials.
	Rejected,
	/// Configuration or provider fault.
	Error,
}
impl LoginOutcome {
	/// Classify a login result.
	pub fn of<T>(result: &Result<T>) -> Self {
		match result {
			Ok(_) => LoginOutcome::Success,
			Err(err) => Self::of_error(err),
		}
	}

	/// Classify a login error.
	pub fn of_error(err: &Error) -> Self {
		if err.is_authentication_failure() { LoginOutcome::Rejected } else { LoginOutcome::Error }
	}

	fn as_str(self) -> &'static str {
		match self {
			LoginOutcome::Success => "success",
			LoginOutcome::Rejected => "rejected",
			LoginOutcome::Error => "error",
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static metrics_exporter_prometheus::PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record the outcome of a login attempt.
pub fn record_login(flow: LoginFlow, role: &str, outcome: LoginOutcome) {
	let mut labels = role_labels(flow, role);

	labels.push(Label::new("outcome", outcome.as_str()));

	metrics::counter!(METRIC_LOGINS_TOTAL, labels.iter()).increment(1);
}

/// Record an auth-URL request, tagging whether a URL was issued.
pub fn record_auth_url(role: &str, issued: bool) {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("role", role.to_owned()));
	labels.push(Label::new("outcome", if issued { "issued" } else { "refused" }));

	metrics::counter!(METRIC_AUTH_URLS_TOTAL, labels.iter()).increment(1);
}

/// Record a key-set fetch along with its latency.
pub fn record_keyset_refresh(success: bool, duration: Duration) {
	let status = if success { "success" } else { "error" };

	metrics::counter!(METRIC_KEYSET_REFRESH_TOTAL, "status" => status).increment(1);
	metrics::histogram!(METRIC_KEYSET_REFRESH_DURATION).record(duration.as_secs_f64());
}

fn role_labels(flow: LoginFlow, role: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(3);

	labels.push(Label::new("flow", flow.as_str()));
	labels.push(Label::new("role", role.to_owned()));

	labels
}
