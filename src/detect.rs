//! Detection of whether this process runs on Google Compute Engine.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::Client;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{
    METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE, METADATA_HOST_ENV, METADATA_IP,
    USER_AGENT_VALUE,
};

/// Internal hostname of the metadata server.
pub const METADATA_DNS_NAME: &str = "metadata.google.internal.";

/// Timeout for each network probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the second probe when the first one says "no" but
/// the local system looks like a GCE machine.
pub const HINT_GRACE: Duration = Duration::from_secs(5);

#[cfg(target_os = "linux")]
const DMI_PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";

static ON_GCE: OnceCell<bool> = OnceCell::const_new();

/// Reports whether this process is running on Google Compute Engine.
///
/// Detection runs once per process; every later call returns the first
/// answer, whatever token it is given. A cancelled first detection counts
/// as `false`.
///
/// `true` does not guarantee the metadata server is reachable or has every
/// key defined.
pub async fn on_gce(cancel: &CancellationToken) -> bool {
    *ON_GCE
        .get_or_init(|| async { Detector::from_env().detect(cancel).await })
        .await
}

/// Races an HTTP probe against a DNS probe of the metadata server.
///
/// Use [`on_gce`] for the memoized answer; `Detector` runs a fresh
/// detection every time and can be pointed at other endpoints.
#[derive(Debug, Clone)]
pub struct Detector {
    host_override: Option<String>,
    probe_url: String,
    dns_name: String,
    expected_ip: IpAddr,
    system_hint: Option<bool>,
    probe_timeout: Duration,
    hint_grace: Duration,
}

impl Detector {
    /// A detector probing the documented endpoints.
    pub fn new() -> Self {
        Self {
            host_override: None,
            probe_url: format!("http://{METADATA_IP}"),
            dns_name: METADATA_DNS_NAME.to_string(),
            expected_ip: IpAddr::from([169, 254, 169, 254]),
            system_hint: None,
            probe_timeout: PROBE_TIMEOUT,
            hint_grace: HINT_GRACE,
        }
    }

    /// A detector that trusts `GCE_METADATA_HOST` when it is set.
    pub fn from_env() -> Self {
        let host = std::env::var(METADATA_HOST_ENV).ok();
        Self::new().with_host_override(host)
    }

    /// A non-empty override asserts the platform without probing.
    pub fn with_host_override(mut self, host: Option<String>) -> Self {
        self.host_override = host;
        self
    }

    pub fn with_probe_url(mut self, url: &str) -> Self {
        self.probe_url = url.to_string();
        self
    }

    pub fn with_dns_name(mut self, name: &str) -> Self {
        self.dns_name = name.to_string();
        self
    }

    pub fn with_expected_ip(mut self, ip: IpAddr) -> Self {
        self.expected_ip = ip;
        self
    }

    /// Fix the local hint instead of reading system information.
    pub fn with_system_hint(mut self, hint: bool) -> Self {
        self.system_hint = Some(hint);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_hint_grace(mut self, grace: Duration) -> Self {
        self.hint_grace = grace;
        self
    }

    /// Run one detection. Probe failures count as "no"; nothing is surfaced.
    pub async fn detect(&self, cancel: &CancellationToken) -> bool {
        if self.host_override.as_deref().is_some_and(|h| !h.is_empty()) {
            debug!("metadata host override set, assuming GCE");
            return true;
        }

        let probes = cancel.child_token();
        let _stop_probes = probes.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel(2);

        {
            let probes = probes.clone();
            let tx = tx.clone();
            let url = self.probe_url.clone();
            let timeout = self.probe_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    () = probes.cancelled() => {}
                    found = http_probe(&url, timeout) => {
                        debug!(found, "http probe finished");
                        let _ = tx.send(found).await;
                    }
                }
            });
        }
        {
            let probes = probes.clone();
            let name = self.dns_name.clone();
            let expected = self.expected_ip;
            let timeout = self.probe_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    () = probes.cancelled() => {}
                    found = dns_probe(&name, expected, timeout) => {
                        debug!(found, "dns probe finished");
                        let _ = tx.send(found).await;
                    }
                }
            });
        }

        let hint = self.system_hint.unwrap_or_else(system_info_suggests_gce);
        if !hint {
            // Nothing local says GCE: the first answer wins either way, so
            // non-GCE hosts do not pay for a slow probe.
            return next_vote(&mut rx, cancel).await;
        }

        if next_vote(&mut rx, cancel).await {
            return true;
        }
        tokio::select! {
            () = cancel.cancelled() => false,
            vote = tokio::time::timeout(self.hint_grace, rx.recv()) => {
                matches!(vote, Ok(Some(true)))
            }
        }
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

async fn next_vote(rx: &mut mpsc::Receiver<bool>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        vote = rx.recv() => vote.unwrap_or(false),
    }
}

/// The metadata server answers its root with `Metadata-Flavor: Google`.
async fn http_probe(url: &str, timeout: Duration) -> bool {
    let Ok(client) = Client::builder().timeout(timeout).build() else {
        return false;
    };
    match client.get(url).header(USER_AGENT, USER_AGENT_VALUE).send().await {
        Ok(response) => response
            .headers()
            .get(METADATA_FLAVOR_HEADER)
            .is_some_and(|v| v.as_bytes() == METADATA_FLAVOR_VALUE.as_bytes()),
        Err(err) => {
            debug!(error = %err, "http probe failed");
            false
        }
    }
}

async fn dns_probe(name: &str, expected: IpAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, tokio::net::lookup_host((name, 80))).await {
        Ok(Ok(mut addrs)) => addrs.any(|addr| addr.ip() == expected),
        Ok(Err(err)) => {
            debug!(error = %err, "dns probe failed");
            false
        }
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn system_info_suggests_gce() -> bool {
    std::fs::read_to_string(DMI_PRODUCT_NAME)
        .map(|name| matches!(name.trim(), "Google" | "Google Compute Engine"))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn system_info_suggests_gce() -> bool {
    false
}
