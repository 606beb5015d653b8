//! On-demand network scan reported to the companion app.

use super::reconnect::Mode;
use super::station::{AccessPoint, StationError};
use super::Inner;
use crate::ble::{Channel, ScanReport};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Pause between a failed scan and the radio reset that follows it.
const RESET_PAUSE: Duration = Duration::from_millis(200);

/// Scan, report, and put the station back the way it was.
///
/// A background association still in flight holds the radio, so it is forced
/// to the failed state for the duration of the scan and its flags are
/// restored afterwards.
pub(crate) async fn scan_worker(ctx: Arc<Inner>) {
    let _radio = ctx.radio.lock().await;
    info!("Scanning for WiFi networks");

    ctx.set_reconnect_mode(Mode::Suspended);
    let snapshot = ctx.flags.snapshot();
    let forced = ctx.flags.is_mid_join();
    if forced {
        warn!("Association in progress; aborting it for the scan");
        ctx.flags.set_failed();
    }
    if let Err(e) = ctx.station.disconnect() {
        debug!("Disconnect before scan: {}", e);
    }

    let report = match scan_with_retries(&ctx).await {
        Ok(access_points) => {
            let report = ScanReport::build(
                &access_points,
                ctx.config.scan_max_entries,
                ctx.config.scan_max_payload,
            );
            info!(
                "Scan found {} networks, reporting {}",
                access_points.len(),
                report.len()
            );
            report
        }
        Err(e) => {
            error!("WiFi scan failed: {}", e);
            ScanReport::error(e.to_string())
        }
    };

    if forced {
        ctx.flags.restore(snapshot);
    }
    ctx.set_reconnect_mode(Mode::Background);
    if snapshot.connected || forced {
        if let Err(e) = ctx.station.connect() {
            warn!("Reconnect after scan failed: {}", e);
        }
    }

    ctx.send(Channel::Command, &report.to_payload(), false);
}

async fn scan_with_retries(ctx: &Arc<Inner>) -> Result<Vec<AccessPoint>, StationError> {
    let attempts = ctx.config.scan_attempts.max(1);
    let mut last_error = StationError::Scan("ESP_FAIL".into());

    for attempt in 1..=attempts {
        let station = ctx.station.clone();
        match tokio::task::spawn_blocking(move || station.scan()).await {
            Ok(Ok(access_points)) => return Ok(access_points),
            Ok(Err(e)) => {
                warn!("Scan attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
            }
            Err(e) => {
                warn!("Scan attempt {}/{} aborted: {}", attempt, attempts, e);
                last_error = StationError::Scan(e.to_string());
            }
        }

        if attempt < attempts {
            time::sleep(RESET_PAUSE).await;
            if let Err(e) = ctx.station.stop() {
                debug!("Radio reset stop: {}", e);
            }
            if let Err(e) = ctx.station.start() {
                warn!("Radio reset start failed: {}", e);
            }
            time::sleep(RESET_PAUSE).await;
        }
    }

    Err(last_error)
}
