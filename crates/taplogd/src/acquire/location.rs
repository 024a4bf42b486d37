//! Location acquisition: permission gate, live fix subscription, graceful
//! degradation, one reverse-geocode.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use taplog_common::{AcquisitionResult, LocationConfig, LocationReading};

use crate::op::{OpOutcome, OperationHandle};
use crate::platform::{
    GeoFix, Geocoder, LocationSource, PermissionKind, PermissionProvider, PermissionStatus,
};

pub struct LocationAcquirer {
    config: LocationConfig,
    permissions: Arc<dyn PermissionProvider>,
    source: Arc<dyn LocationSource>,
    geocoder: Arc<dyn Geocoder>,
}

impl LocationAcquirer {
    pub fn new(
        config: LocationConfig,
        permissions: Arc<dyn PermissionProvider>,
        source: Arc<dyn LocationSource>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            config,
            permissions,
            source,
            geocoder,
        }
    }

    pub async fn acquire(&self) -> AcquisitionResult<LocationReading> {
        match self.permissions.status(PermissionKind::Location) {
            PermissionStatus::Denied | PermissionStatus::Restricted => {
                return AcquisitionResult::unavailable("location permission denied");
            }
            PermissionStatus::NotDetermined => {
                return AcquisitionResult::unavailable("location permission not determined");
            }
            PermissionStatus::Granted => {}
        }
        if !self.source.is_enabled() {
            return AcquisitionResult::unavailable("location service disabled");
        }

        let threshold = self.config.accuracy.threshold_m();
        let wait = Duration::from_secs_f64(self.config.max_wait_secs);

        // Every fix that arrives is remembered so a timeout can fall back to
        // the freshest one instead of reporting nothing.
        let latest: Arc<Mutex<Option<GeoFix>>> = Arc::new(Mutex::new(None));
        let latest_in_callback = latest.clone();
        let source = self.source.clone();

        let handle = OperationHandle::start(wait, move |completer| {
            source.subscribe(Box::new(move |fix| {
                *latest_in_callback.lock().unwrap() = Some(fix.clone());
                if fix.accuracy_m <= threshold {
                    completer.complete(fix);
                }
            }))
        });

        let fix = match handle.wait().await {
            OpOutcome::Completed(fix) => fix,
            OpOutcome::Failed(reason) => return AcquisitionResult::unavailable(reason),
            OpOutcome::TimedOut | OpOutcome::Cancelled => {
                let seen = latest.lock().unwrap().take();
                match seen.or_else(|| self.fresh_last_known()) {
                    Some(fix) => {
                        warn!(
                            "no fix within {:.0} m in time; degrading to accuracy {:.0} m",
                            threshold, fix.accuracy_m
                        );
                        fix
                    }
                    None => return AcquisitionResult::TimedOut,
                }
            }
        };

        let mut reading = LocationReading {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_m: fix.accuracy_m,
            altitude_m: fix.altitude_m,
            fix_time: fix.measured_at,
            address: None,
        };

        // Exactly one geocode attempt; a failure costs only the address.
        match tokio::time::timeout(
            Duration::from_secs_f64(self.config.geocode_timeout_secs),
            self.geocoder.reverse(fix.latitude, fix.longitude),
        )
        .await
        {
            Ok(Ok(address)) => reading.address = Some(address),
            Ok(Err(e)) => warn!("reverse geocode failed: {}", e),
            Err(_) => warn!("reverse geocode timed out"),
        }

        AcquisitionResult::Value(reading)
    }

    /// Last-known fix, accepted only under the configured staleness bound.
    fn fresh_last_known(&self) -> Option<GeoFix> {
        let fix = self.source.last_known()?;
        let age = Utc::now().signed_duration_since(fix.measured_at);
        if age.num_seconds() <= self.config.staleness_secs as i64 {
            debug!("using last-known fix, {} s old", age.num_seconds());
            Some(fix)
        } else {
            debug!(
                "discarding last-known fix: {} s old exceeds {} s bound",
                age.num_seconds(),
                self.config.staleness_secs
            );
            None
        }
    }
}
