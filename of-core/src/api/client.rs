//! Device API client
//!
//! Wraps a [`Transport`] with the endpoint fallback and payload
//! normalization needed to drive every known OpenFAN firmware. Upstream
//! code never branches on firmware revision.
//!
//! The client is shared between the coordinator and all fan controllers of
//! a device. Its only mutable state is the last-written PWM per fan and the
//! discovered fan count, both safe for concurrent use.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::api::payload::{
    is_ok_response, parse_board_status, parse_multi_status, parse_single_status,
};
use crate::api::transport::{RawResponse, Transport};
use crate::constants::{endpoints, limits, timing};
use crate::data::BoardStatus;
use crate::error::{OpenFanError, Result};

/// HTTP client for one OpenFAN board
pub struct DeviceClient {
    transport: Arc<dyn Transport>,
    /// PWM last written per fan; status endpoints do not always echo it
    last_pwm: Mutex<HashMap<u8, u8>>,
    /// Only ever grows
    fan_count: AtomicUsize,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("base_url", &self.transport.base_url())
            .field("fan_count", &self.fan_count())
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            last_pwm: Mutex::new(HashMap::new()),
            fan_count: AtomicUsize::new(1),
        }
    }

    /// Seed the fan count, e.g. from a stored config
    pub fn with_fan_count(self, fan_count: usize) -> Self {
        self.fan_count.fetch_max(fan_count, Ordering::Relaxed);
        self
    }

    pub fn host(&self) -> &str {
        self.transport.base_url()
    }

    /// Number of fans seen so far (at least 1)
    pub fn fan_count(&self) -> usize {
        self.fan_count.load(Ordering::Relaxed)
    }

    /// Last PWM written to a fan, 0 if never written
    pub fn last_pwm(&self, index: u8) -> u8 {
        self.last_pwm.lock().get(&index).copied().unwrap_or(0)
    }

    fn record_pwm(&self, index: u8, value: u8) {
        self.last_pwm.lock().insert(index, value);
    }

    fn note_fan(&self, index: u8) {
        self.fan_count
            .fetch_max(usize::from(index) + 1, Ordering::Relaxed);
    }

    // ========================================================================
    // HTTP helpers
    // ========================================================================

    /// GET with the request ceiling applied
    async fn request(&self, path: &str) -> Result<RawResponse> {
        let resp = tokio::time::timeout(timing::REQUEST_TIMEOUT, self.transport.get(path))
            .await
            .map_err(|_| OpenFanError::Timeout {
                path: path.to_string(),
            })??;
        debug!(
            "OpenFAN {} GET {} -> {} {}",
            self.host(),
            path,
            resp.status,
            resp.text.trim()
        );
        Ok(resp)
    }

    /// GET that requires a JSON object body
    async fn request_json(&self, path: &str) -> Result<Value> {
        let resp = self.request(path).await?;
        if resp.is_http_error() {
            return Err(OpenFanError::Http {
                path: path.to_string(),
                status: resp.status,
                body: resp.text,
            });
        }
        match resp.json() {
            Some(body @ Value::Object(_)) => Ok(body),
            _ => Err(OpenFanError::NonJson {
                path: path.to_string(),
            }),
        }
    }

    /// GET a write endpoint; HTTP errors and unrecognized bodies fail
    async fn request_ack(&self, path: &str) -> Result<()> {
        let resp = self.request(path).await?;
        if resp.is_http_error() {
            return Err(OpenFanError::Http {
                path: path.to_string(),
                status: resp.status,
                body: resp.text,
            });
        }
        if !is_ok_response(resp.json().as_ref(), &resp.text) {
            return Err(OpenFanError::protocol(
                path,
                format!("unrecognized acknowledgement {:?}", resp.text.trim()),
            ));
        }
        Ok(())
    }

    /// GET a switch endpoint; only HTTP errors fail
    async fn request_switch(&self, path: &str, what: &str) -> Result<()> {
        let resp = self.request(path).await?;
        if resp.is_http_error() {
            return Err(OpenFanError::Http {
                path: path.to_string(),
                status: resp.status,
                body: resp.text,
            });
        }
        if !is_ok_response(resp.json().as_ref(), &resp.text) {
            debug!(
                "OpenFAN {}: {} set non-OK body: {}",
                self.host(),
                what,
                resp.text.trim()
            );
        }
        Ok(())
    }

    // ========================================================================
    // Fan status and PWM
    // ========================================================================

    /// RPM for every fan the board reports
    ///
    /// Tries the multi-fan endpoint, then the legacy single-fan one. If both
    /// fail the last error is returned. Errors that are not per-request
    /// failures stop the fallback.
    pub async fn get_status_all(&self) -> Result<BTreeMap<u8, u32>> {
        let mut last_err = None;
        for path in [endpoints::STATUS_ALL, endpoints::STATUS_SINGLE] {
            match self.request_json(path).await {
                Ok(body) => {
                    if path == endpoints::STATUS_ALL {
                        let rpms = parse_multi_status(&body);
                        if let Some(max_index) = rpms.keys().max() {
                            self.note_fan(*max_index);
                            return Ok(rpms);
                        }
                    }
                    // Single-fan shape, possibly served on the multi path
                    let (rpm, pwm) = parse_single_status(&body);
                    self.note_fan(0);
                    self.record_pwm(0, pwm);
                    return Ok(BTreeMap::from([(0, rpm)]));
                }
                Err(e) if e.is_transient() => {
                    debug!(
                        "OpenFAN {}: get_status_all via {} failed: {}",
                        self.host(),
                        path,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| OpenFanError::generic("no status endpoint tried")))
    }

    /// Set one fan's PWM, trying each known endpoint shape in order
    ///
    /// The value is clamped to 0-100 and cached on success.
    pub async fn set_pwm_index(&self, index: u8, percent: u8) -> Result<()> {
        let value = percent.min(limits::PWM_MAX);
        let mut last_err = None;
        for path in endpoints::set_pwm_candidates(index, value) {
            match self.request_ack(&path).await {
                Ok(()) => {
                    self.record_pwm(index, value);
                    self.note_fan(index);
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!(
                        "OpenFAN {}: set_pwm_index via {} failed: {}",
                        self.host(),
                        path,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| OpenFanError::generic("no PWM endpoint tried")))
    }

    /// Set every fan to the same PWM
    pub async fn set_pwm_all(&self, percent: u8) -> Result<()> {
        let value = percent.min(limits::PWM_MAX);
        self.request_ack(&endpoints::set_pwm_all(value)).await?;
        let fans = self.fan_count().max(1);
        let mut cache = self.last_pwm.lock();
        for index in 0..fans.min(usize::from(limits::MAX_FAN_INDEX) + 1) {
            cache.insert(index as u8, value);
        }
        Ok(())
    }

    /// Set a fan's target RPM
    pub async fn set_rpm_index(&self, index: u8, rpm: u32) -> Result<()> {
        self.request_ack(&endpoints::set_rpm(index, rpm)).await?;
        self.note_fan(index);
        Ok(())
    }

    // ========================================================================
    // LED and supply voltage
    // ========================================================================

    /// LED and 12V flags; requires a JSON body
    pub async fn get_openfan_status(&self) -> Result<BoardStatus> {
        let body = self.request_json(endpoints::OPENFAN_STATUS).await?;
        parse_board_status(&body).ok_or_else(|| {
            OpenFanError::protocol(endpoints::OPENFAN_STATUS, "status container is not an object")
        })
    }

    pub async fn led_set(&self, enabled: bool) -> Result<()> {
        let path = if enabled {
            endpoints::LED_ENABLE
        } else {
            endpoints::LED_DISABLE
        };
        self.request_switch(path, "LED").await
    }

    /// Switch the fan supply between 12V and 5V
    ///
    /// The request always carries `confirm=true`; callers gate this on an
    /// explicit operator confirmation.
    pub async fn set_voltage_12v(&self, enabled: bool) -> Result<()> {
        let path = if enabled {
            endpoints::VOLTAGE_HIGH
        } else {
            endpoints::VOLTAGE_LOW
        };
        self.request_switch(path, "voltage").await
    }
}
