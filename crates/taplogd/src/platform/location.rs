//! Location source and reverse geocoder seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taplog_common::PostalAddress;

/// One position fix delivered by a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub altitude_m: Option<f64>,
    pub measured_at: DateTime<Utc>,
}

pub type FixCallback = Box<dyn Fn(GeoFix) + Send + Sync>;
pub type StopFn = Box<dyn FnOnce() + Send>;

/// Live-update position source.
pub trait LocationSource: Send + Sync {
    /// Whether the platform location service is switched on at all.
    fn is_enabled(&self) -> bool;

    /// Start a live fix subscription; the returned closure stops it.
    fn subscribe(&self, on_fix: FixCallback) -> anyhow::Result<StopFn>;

    /// Most recent fix the platform retained from before this run, if any.
    fn last_known(&self) -> Option<GeoFix>;
}

/// Reverse geocoder; one lookup per successful fix.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> anyhow::Result<PostalAddress>;
}

/// Hosts without any positioning hardware report the service disabled.
pub struct DisabledLocationSource;

impl LocationSource for DisabledLocationSource {
    fn is_enabled(&self) -> bool {
        false
    }

    fn subscribe(&self, _on_fix: FixCallback) -> anyhow::Result<StopFn> {
        anyhow::bail!("no location hardware on this host")
    }

    fn last_known(&self) -> Option<GeoFix> {
        None
    }
}

/// Reverse geocoder backed by the public Nominatim endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    postcode: Option<String>,
    country: Option<String>,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self::with_base_url("https://nominatim.openstreetmap.org")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(concat!("taplog/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> anyhow::Result<PostalAddress> {
        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}",
            self.base_url, latitude, longitude
        );
        let response: NominatimResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let address = response
            .address
            .ok_or_else(|| anyhow::anyhow!("no address in geocoder response"))?;

        Ok(PostalAddress {
            street: address.road,
            locality: address.city.or(address.town).or(address.village),
            region: address.state,
            postcode: address.postcode,
            country: address.country,
        })
    }
}

/// Scripted location source for tests: emits the configured fixes at the
/// configured cadence after subscription, tracking subscribe/stop calls.
pub struct FakeLocationSource {
    enabled: bool,
    fixes: Vec<GeoFix>,
    interval: Duration,
    last_known: Mutex<Option<GeoFix>>,
    pub subscribe_calls: AtomicUsize,
    pub stopped: Arc<AtomicBool>,
}

impl FakeLocationSource {
    pub fn new(fixes: Vec<GeoFix>, interval: Duration) -> Self {
        Self {
            enabled: true,
            fixes,
            interval,
            last_known: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A source that is switched on but never produces a fix.
    pub fn silent() -> Self {
        Self::new(Vec::new(), Duration::from_millis(10))
    }

    pub fn with_last_known(self, fix: GeoFix) -> Self {
        *self.last_known.lock().unwrap() = Some(fix);
        self
    }

    pub fn fix(latitude: f64, longitude: f64, accuracy_m: f64) -> GeoFix {
        GeoFix {
            latitude,
            longitude,
            accuracy_m,
            altitude_m: None,
            measured_at: Utc::now(),
        }
    }
}

impl LocationSource for FakeLocationSource {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn subscribe(&self, on_fix: FixCallback) -> anyhow::Result<StopFn> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let fixes = self.fixes.clone();
        let interval = self.interval;
        let stopped = self.stopped.clone();
        let flag = stopped.clone();

        std::thread::spawn(move || {
            for fix in fixes {
                std::thread::sleep(interval);
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                on_fix(fix);
            }
        });

        Ok(Box::new(move || {
            stopped.store(true, Ordering::SeqCst);
        }))
    }

    fn last_known(&self) -> Option<GeoFix> {
        self.last_known.lock().unwrap().clone()
    }
}

/// Fixed-answer geocoder for tests.
pub struct FakeGeocoder {
    result: Option<PostalAddress>,
    pub calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn answering(address: PostalAddress) -> Self {
        Self {
            result: Some(address),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn sample_address() -> PostalAddress {
        PostalAddress {
            street: Some("Storgata 1".to_string()),
            locality: Some("Oslo".to_string()),
            region: None,
            postcode: Some("0155".to_string()),
            country: Some("Norway".to_string()),
        }
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse(&self, _latitude: f64, _longitude: f64) -> anyhow::Result<PostalAddress> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(address) => Ok(address.clone()),
            None => anyhow::bail!("geocoder unreachable"),
        }
    }
}
