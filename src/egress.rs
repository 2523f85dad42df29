//! Egress identity rotation
//!
//! Wraps an external egress provider (the NordVPN CLI or OpenVPN child
//! processes) behind a trait, and drives it with a bounded
//! retry-with-settle loop. A new identity only counts once it is actually
//! observable: providers that cannot report connection state themselves
//! must produce a probed identity that differs from the previous one, since
//! some report success while traffic still leaves through the old path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{ErrorSinks, Metrics, RotatorError};

/// Attempts per rotation before the run is declared dead.
pub const MAX_ACQUISITION_ATTEMPTS: usize = 5;

/// Wait after a connect for the new identity to become observable.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// The active outbound identity after a successful rotation.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Country or profile name the provider connected through.
    pub label: String,
    /// Probed public address, when the provider exposes one.
    pub ip: Option<String>,
}

#[async_trait]
pub trait EgressProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Tear down the current identity, if any. Callers ignore failures
    /// here; a dead tunnel and no tunnel look the same to the next
    /// connect.
    async fn disconnect(&self) -> Result<(), RotatorError>;

    /// Bring up a new identity and return its label.
    async fn connect(&self) -> Result<String, RotatorError>;

    /// Observe the active public identity, if this provider can.
    async fn probe(&self) -> Option<String>;

    /// Whether a successful `connect` alone confirms the identity. When
    /// false, confirmation requires a probed value different from the
    /// previously observed one.
    fn reports_connection_state(&self) -> bool {
        false
    }
}

const NORDVPN_COUNTRIES: &[&str] = &[
    "Italy",
    "France",
    "Germany",
    "Spain",
    "United_States",
    "United_Kingdom",
    "Canada",
    "Brazil",
    "Sweden",
    "Australia",
];

/// Drives the `nordvpn` CLI. Identity is read back from `nordvpn status`.
pub struct NordVpnProvider;

impl NordVpnProvider {
    async fn run(args: &[&str]) -> Result<std::process::Output, RotatorError> {
        Command::new("nordvpn")
            .args(args)
            .output()
            .await
            .map_err(|e| RotatorError::Egress(format!("nordvpn {}: {e}", args.join(" "))))
    }
}

#[async_trait]
impl EgressProvider for NordVpnProvider {
    fn name(&self) -> &str {
        "nordvpn"
    }

    async fn disconnect(&self) -> Result<(), RotatorError> {
        let output = Self::run(&["disconnect"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RotatorError::Egress(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn connect(&self) -> Result<String, RotatorError> {
        let idx = rand::thread_rng().gen_range(0..NORDVPN_COUNTRIES.len());
        let country = NORDVPN_COUNTRIES[idx];
        let output = Self::run(&["connect", country]).await?;
        if output.status.success() {
            Ok(country.to_string())
        } else {
            Err(RotatorError::Egress(format!(
                "connect {country} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn probe(&self) -> Option<String> {
        let output = Self::run(&["status"]).await.ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("IP:"))
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    }
}

/// Spawns `openvpn` over a random `.ovpn` profile from a directory.
///
/// OpenVPN holds the tunnel as long as the child lives, so a live child
/// after the settle delay is taken as provider-reported success.
pub struct OpenVpnProvider {
    config_dir: PathBuf,
    child: Mutex<Option<Child>>,
}

impl OpenVpnProvider {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            child: Mutex::new(None),
        }
    }

    /// List the `.ovpn` profiles in the configured directory.
    pub fn list_profiles(config_dir: &std::path::Path) -> Result<Vec<PathBuf>, RotatorError> {
        let entries = std::fs::read_dir(config_dir)
            .map_err(|e| RotatorError::Egress(format!("{}: {e}", config_dir.display())))?;
        let profiles: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "ovpn").unwrap_or(false))
            .collect();
        Ok(profiles)
    }
}

#[async_trait]
impl EgressProvider for OpenVpnProvider {
    fn name(&self) -> &str {
        "openvpn"
    }

    async fn disconnect(&self) -> Result<(), RotatorError> {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<String, RotatorError> {
        let profiles = Self::list_profiles(&self.config_dir)?;
        if profiles.is_empty() {
            return Err(RotatorError::Egress(format!(
                "no .ovpn files found in '{}'",
                self.config_dir.display()
            )));
        }

        let idx = rand::thread_rng().gen_range(0..profiles.len());
        let profile = &profiles[idx];
        let child = Command::new("openvpn")
            .arg("--config")
            .arg(profile)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| RotatorError::Egress(format!("openvpn spawn failed: {e}")))?;

        *self.child.lock().await = Some(child);
        Ok(profile
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| profile.display().to_string()))
    }

    async fn probe(&self) -> Option<String> {
        None
    }

    fn reports_connection_state(&self) -> bool {
        true
    }
}

/// Bounded rotate-and-confirm loop over an [`EgressProvider`].
pub struct EgressRotator {
    provider: Arc<dyn EgressProvider>,
    rotation_delay: Duration,
    settle_delay: Duration,
    max_attempts: usize,
    last_ip: Mutex<Option<String>>,
    rotation_count: AtomicUsize,
    metrics: Arc<Metrics>,
    sinks: Arc<ErrorSinks>,
}

impl EgressRotator {
    pub fn new(
        provider: Arc<dyn EgressProvider>,
        rotation_delay: Duration,
        metrics: Arc<Metrics>,
        sinks: Arc<ErrorSinks>,
    ) -> Self {
        Self {
            provider,
            rotation_delay,
            settle_delay: SETTLE_DELAY,
            max_attempts: MAX_ACQUISITION_ATTEMPTS,
            last_ip: Mutex::new(None),
            rotation_count: AtomicUsize::new(0),
            metrics,
            sinks,
        }
    }

    /// Override the settle delay. Intended for tests.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn rotations(&self) -> usize {
        self.rotation_count.load(Ordering::Relaxed)
    }

    /// Release the old identity and acquire a confirmed new one.
    ///
    /// Exhausting the attempt bound is terminal for the run: the caller
    /// must persist state and exit non-zero rather than keep capturing
    /// through a stale identity.
    pub async fn rotate(&self) -> Result<Identity, RotatorError> {
        if !self.rotation_delay.is_zero() {
            sleep(self.rotation_delay).await;
        }

        for attempt in 1..=self.max_attempts {
            if let Err(e) = self.provider.disconnect().await {
                self.sinks
                    .ops_error(&format!("{} disconnect failed: {e}", self.provider.name()));
            }

            let label = match self.provider.connect().await {
                Ok(label) => label,
                Err(e) => {
                    warn!(
                        "{} connection attempt {}/{} failed: {e}",
                        self.provider.name(),
                        attempt,
                        self.max_attempts
                    );
                    self.sinks
                        .ops_error(&format!("{} connection error: {e}", self.provider.name()));
                    continue;
                }
            };

            sleep(self.settle_delay).await;

            if self.provider.reports_connection_state() {
                return Ok(self.confirm(label, None).await);
            }

            match self.provider.probe().await {
                Some(ip) => {
                    let changed = {
                        let last = self.last_ip.lock().await;
                        last.as_deref() != Some(ip.as_str())
                    };
                    if changed {
                        return Ok(self.confirm(label, Some(ip)).await);
                    }
                    warn!(
                        "{} reported success but identity is unchanged ({ip}); retrying",
                        self.provider.name()
                    );
                }
                None => {
                    warn!(
                        "{} connected to {label} but no identity was observable; retrying",
                        self.provider.name()
                    );
                }
            }
        }

        self.metrics.record_rotation(false);
        self.sinks.ops_error(&format!(
            "unable to acquire a fresh {} identity after {} attempts",
            self.provider.name(),
            self.max_attempts
        ));
        Err(RotatorError::EgressExhausted(self.max_attempts))
    }

    async fn confirm(&self, label: String, ip: Option<String>) -> Identity {
        if let Some(ip) = &ip {
            *self.last_ip.lock().await = Some(ip.clone());
        }
        let count = self.rotation_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.record_rotation(true);
        match &ip {
            Some(ip) => info!("Egress #{count}: {label}, IP {ip}"),
            None => info!("Egress #{count}: {label}"),
        }
        Identity { label, ip }
    }

    /// Drop the held identity, if any.
    pub async fn release(&self) {
        let _ = self.provider.disconnect().await;
    }
}
