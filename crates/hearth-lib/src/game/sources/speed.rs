//! Latency and throughput probes for version sources.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Upper bound on bytes read by the sample transfer
pub const SAMPLE_BYTES: usize = 256 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestResult {
    pub ping_ms: Option<u64>,
    #[serde(rename = "speedMBps")]
    pub speed_mbps: Option<f64>,
    pub is_available: bool,
    pub tested_at: DateTime<Utc>,
}

impl SpeedTestResult {
    pub fn unavailable() -> Self {
        Self {
            ping_ms: None,
            speed_mbps: None,
            is_available: false,
            tested_at: Utc::now(),
        }
    }
}

/// Time a lightweight request, then a small sample transfer.
///
/// Any HTTP answer to the ping counts as reachable; only transport failures
/// mark the source unavailable. A failed sample keeps the ping but leaves the
/// throughput unknown.
pub async fn measure(ping: RequestBuilder, sample: RequestBuilder) -> SpeedTestResult {
    let started = Instant::now();
    let ping_ms = match ping.send().await {
        Ok(_) => started.elapsed().as_millis() as u64,
        Err(e) => {
            log::debug!("[speed] Ping failed: {}", e);
            return SpeedTestResult::unavailable();
        }
    };

    let speed_mbps = match sample_throughput(sample).await {
        Ok(speed) => speed,
        Err(e) => {
            log::debug!("[speed] Sample transfer failed: {}", e);
            None
        }
    };

    SpeedTestResult {
        ping_ms: Some(ping_ms),
        speed_mbps,
        is_available: true,
        tested_at: Utc::now(),
    }
}

async fn sample_throughput(sample: RequestBuilder) -> Result<Option<f64>, reqwest::Error> {
    let started = Instant::now();
    let response = sample.send().await?;
    if !response.status().is_success() {
        log::debug!("[speed] Sample request answered {}", response.status());
        return Ok(None);
    }

    let mut received: usize = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        received += chunk?.len();
        if received >= SAMPLE_BYTES {
            break;
        }
    }

    if received == 0 {
        return Ok(None);
    }
    let secs = started.elapsed().as_secs_f64().max(0.001);
    Ok(Some((received as f64 / 1024.0 / 1024.0) / secs))
}
