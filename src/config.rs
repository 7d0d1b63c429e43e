use anyhow::{bail, Context};
use chrono::FixedOffset;
use std::str::FromStr;
use std::time::Duration;

use crate::actors::RelaySettings;
use crate::domain::delivery::{GeoPoint, Location};
use crate::domain::timing::Cutoffs;
use crate::fulfillment::EngineSettings;

// ============================================================================
// Configuration - read from the environment (and `.env` via dotenvy)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Scylla,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scylla" | "scylladb" => Ok(StorageBackend::Scylla),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => bail!("unknown STORAGE_BACKEND {:?} (expected scylla or memory)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageBackend,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    pub http_bind: String,
    pub metrics_port: u16,
    pub service_offset: FixedOffset,
    pub cutoffs: Cutoffs,
    pub kitchen: Location,
    pub outbox_poll_interval: Duration,
    pub outbox_max_attempts: i32,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be valid: {}", name, e)),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let offset_minutes: i32 = parsed("SERVICE_UTC_OFFSET_MINUTES", 0)?;
        let service_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("SERVICE_UTC_OFFSET_MINUTES out of range: {}", offset_minutes))?;

        let cutoffs = Cutoffs {
            lunch_hour: parsed("LUNCH_CUTOFF_HOUR", Cutoffs::default().lunch_hour)?,
            dinner_hour: parsed("DINNER_CUTOFF_HOUR", Cutoffs::default().dinner_hour)?,
        };
        if cutoffs.lunch_hour > 23 || cutoffs.dinner_hour > 23 {
            bail!("cutoff hours must be between 0 and 23");
        }

        let coordinates = match (var("KITCHEN_LAT"), var("KITCHEN_LNG")) {
            (Some(lat), Some(lng)) => Some(GeoPoint {
                lat: lat.trim().parse().context("KITCHEN_LAT must be a number")?,
                lng: lng.trim().parse().context("KITCHEN_LNG must be a number")?,
            }),
            (None, None) => None,
            _ => bail!("KITCHEN_LAT and KITCHEN_LNG must be set together"),
        };

        let outbox_max_attempts: i32 = parsed("OUTBOX_MAX_ATTEMPTS", 5)?;
        if outbox_max_attempts < 1 {
            bail!("OUTBOX_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            storage: parsed("STORAGE_BACKEND", StorageBackend::Scylla)?,
            scylla_nodes: var("SCYLLA_NODES")
                .unwrap_or_else(|| "127.0.0.1:9042".to_string())
                .split(',')
                .map(|node| node.trim().to_string())
                .filter(|node| !node.is_empty())
                .collect(),
            scylla_keyspace: var("SCYLLA_KEYSPACE").unwrap_or_else(|| "meal_fulfillment".to_string()),
            http_bind: var("HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            metrics_port: parsed("METRICS_PORT", 9090)?,
            service_offset,
            cutoffs,
            kitchen: Location {
                address: var("KITCHEN_ADDRESS").unwrap_or_else(|| "Central Kitchen".to_string()),
                coordinates,
            },
            outbox_poll_interval: Duration::from_secs(parsed("OUTBOX_POLL_INTERVAL_SECS", 5)?),
            outbox_max_attempts,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cutoffs: self.cutoffs,
            kitchen: self.kitchen.clone(),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            poll_interval: self.outbox_poll_interval,
            max_attempts: self.outbox_max_attempts,
            ..RelaySettings::default()
        }
    }
}
