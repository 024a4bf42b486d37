//! Network identity seams: local interface lookup and public echo fallback.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Local interface address lookup.
pub trait LocalAddressSource: Send + Sync {
    /// IPv4 address of the named interface, if it has one.
    fn address_of(&self, interface: &str) -> Option<String>;
}

/// Interface enumeration through getifaddrs.
pub struct NixLocalAddressSource;

impl LocalAddressSource for NixLocalAddressSource {
    fn address_of(&self, interface: &str) -> Option<String> {
        let addrs = nix::ifaddrs::getifaddrs().ok()?;
        for ifaddr in addrs {
            if ifaddr.interface_name != interface {
                continue;
            }
            let Some(address) = ifaddr.address else {
                continue;
            };
            if let Some(sin) = address.as_sockaddr_in() {
                let ip = std::net::Ipv4Addr::from(sin.ip());
                debug!("local address on {}: {}", interface, ip);
                return Some(ip.to_string());
            }
        }
        None
    }
}

/// One-shot public "echo my address" lookup.
#[async_trait]
pub trait PublicAddressEcho: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<String>;
}

/// Echo endpoint client; the endpoint returns the caller's address as plain
/// text.
pub struct HttpEcho {
    client: reqwest::Client,
    url: String,
}

impl HttpEcho {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PublicAddressEcho for HttpEcho {
    async fn fetch(&self) -> anyhow::Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let address = body.trim();
        if address.is_empty() {
            anyhow::bail!("echo endpoint returned an empty body");
        }
        Ok(address.to_string())
    }
}

/// Fixed-table local address source for tests.
pub struct FakeLocalAddressSource {
    interface: Option<String>,
    address: Option<String>,
}

impl FakeLocalAddressSource {
    pub fn with(interface: &str, address: &str) -> Self {
        Self {
            interface: Some(interface.to_string()),
            address: Some(address.to_string()),
        }
    }

    pub fn empty() -> Self {
        Self {
            interface: None,
            address: None,
        }
    }
}

impl LocalAddressSource for FakeLocalAddressSource {
    fn address_of(&self, interface: &str) -> Option<String> {
        if self.interface.as_deref() == Some(interface) {
            self.address.clone()
        } else {
            None
        }
    }
}

/// Scripted echo endpoint for tests, tracking how often it is hit.
pub struct FakePublicAddressEcho {
    answer: Option<String>,
    pub calls: AtomicUsize,
}

impl FakePublicAddressEcho {
    pub fn answering(address: &str) -> Self {
        Self {
            answer: Some(address.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PublicAddressEcho for FakePublicAddressEcho {
    async fn fetch(&self) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(address) => Ok(address.clone()),
            None => anyhow::bail!("echo endpoint unreachable"),
        }
    }
}
