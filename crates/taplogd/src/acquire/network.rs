//! Network identity acquisition: local interface first, one public echo
//! fallback.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use taplog_common::{AcquisitionResult, NetworkConfig, NetworkIdentity, NetworkOrigin};

use crate::platform::{LocalAddressSource, PublicAddressEcho};

pub struct NetworkAcquirer {
    config: NetworkConfig,
    local: Arc<dyn LocalAddressSource>,
    echo: Arc<dyn PublicAddressEcho>,
}

impl NetworkAcquirer {
    pub fn new(
        config: NetworkConfig,
        local: Arc<dyn LocalAddressSource>,
        echo: Arc<dyn PublicAddressEcho>,
    ) -> Self {
        Self {
            config,
            local,
            echo,
        }
    }

    pub async fn acquire(&self) -> AcquisitionResult<NetworkIdentity> {
        if let Some(address) = self.local.address_of(&self.config.interface) {
            return AcquisitionResult::Value(NetworkIdentity {
                address,
                origin: NetworkOrigin::LocalInterface {
                    interface: self.config.interface.clone(),
                },
            });
        }

        debug!(
            "no local address on {}; falling back to public echo",
            self.config.interface
        );

        let echo_timeout = Duration::from_secs_f64(self.config.echo_timeout_secs);
        match tokio::time::timeout(echo_timeout, self.echo.fetch()).await {
            Ok(Ok(address)) => AcquisitionResult::Value(NetworkIdentity {
                address,
                origin: NetworkOrigin::PublicEcho,
            }),
            Ok(Err(e)) => {
                warn!("public echo lookup failed: {}", e);
                AcquisitionResult::unavailable("no local address and echo lookup failed")
            }
            Err(_) => {
                warn!("public echo lookup timed out");
                AcquisitionResult::unavailable("no local address and echo lookup timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FakeLocalAddressSource, FakePublicAddressEcho};
    use std::sync::atomic::Ordering;

    fn config() -> NetworkConfig {
        NetworkConfig {
            interface: "wlan0".to_string(),
            echo_url: "http://echo.invalid".to_string(),
            echo_timeout_secs: 0.5,
        }
    }

    #[tokio::test]
    async fn local_interface_wins_without_touching_echo() {
        let echo = Arc::new(FakePublicAddressEcho::answering("203.0.113.9"));
        let acquirer = NetworkAcquirer::new(
            config(),
            Arc::new(FakeLocalAddressSource::with("wlan0", "192.168.1.20")),
            echo.clone(),
        );

        let identity = acquirer.acquire().await.into_value().expect("identity");
        assert_eq!(identity.address, "192.168.1.20");
        assert_eq!(
            identity.origin,
            NetworkOrigin::LocalInterface {
                interface: "wlan0".to_string()
            }
        );
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn echo_fallback_is_attempted_exactly_once() {
        let echo = Arc::new(FakePublicAddressEcho::answering("203.0.113.9"));
        let acquirer = NetworkAcquirer::new(
            config(),
            Arc::new(FakeLocalAddressSource::empty()),
            echo.clone(),
        );

        let identity = acquirer.acquire().await.into_value().expect("identity");
        assert_eq!(identity.address, "203.0.113.9");
        assert_eq!(identity.origin, NetworkOrigin::PublicEcho);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_unavailable_never_an_error() {
        let echo = Arc::new(FakePublicAddressEcho::failing());
        let acquirer = NetworkAcquirer::new(
            config(),
            Arc::new(FakeLocalAddressSource::empty()),
            echo.clone(),
        );

        let result = acquirer.acquire().await;
        assert_eq!(
            result.warning_reason().as_deref(),
            Some("no local address and echo lookup failed")
        );
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }
}
