//! GeoIP lookup using a MaxMind GeoLite2/GeoIP2 City database
//!
//! The recorder treats the lookup as an unreliable collaborator: any error
//! becomes an all-"Unknown" [`GeoInfo`] and the event is stored anyway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{GeoInfo, UNKNOWN};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("no geolocation database configured")]
    Unavailable,
    #[error("no location data for {0}")]
    NotFound(IpAddr),
    #[error("lookup failed for {ip}: {reason}")]
    Lookup { ip: IpAddr, reason: String },
}

/// Resolves an IP address to a coarse location.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoInfo, GeoError>;
}

/// Memory-mapped MaxMind City database
#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Open the City database at `city_path`; `None` yields a service whose
    /// every lookup reports [`GeoError::Unavailable`].
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = match city_path {
            Some(path) => {
                let reader = unsafe { Reader::open_mmap(path) }
                    .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
                Some(Arc::new(reader))
            }
            None => None,
        };

        Ok(Self { city_reader })
    }

    fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        let reader = self.city_reader.as_ref().ok_or(GeoError::Unavailable)?;

        let result = reader.lookup(ip).map_err(|e| GeoError::Lookup {
            ip,
            reason: e.to_string(),
        })?;
        let city = result
            .decode::<geoip2::City>()
            .map_err(|e| GeoError::Lookup {
                ip,
                reason: e.to_string(),
            })?
            .ok_or(GeoError::NotFound(ip))?;

        let or_unknown = |value: Option<&str>| value.unwrap_or(UNKNOWN).to_string();

        Ok(GeoInfo {
            country: or_unknown(city.country.names.english.or(city.country.iso_code)),
            city: or_unknown(city.city.names.english),
            region: or_unknown(
                city.subdivisions
                    .first()
                    .and_then(|subdivision| subdivision.names.english),
            ),
            timezone: or_unknown(city.location.time_zone),
        })
    }
}

#[async_trait]
impl GeoLocator for GeoIpService {
    async fn locate(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        // Private and loopback ranges are never in the database
        if is_non_routable(ip) {
            return Err(GeoError::NotFound(ip));
        }
        self.lookup(ip)
    }
}

fn is_non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
