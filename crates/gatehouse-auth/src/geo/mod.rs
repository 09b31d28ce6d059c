//! Coarse IP geolocation for audit enrichment.
//!
//! ## Resolution Order
//!
//! ```text
//! ip → non-routable? → TTL cache → offline database
//!          ↓ yes          ↓ hit        ↓ non-empty result is cached
//!        empty          location     location
//! ```
//!
//! Loopback, private, link-local and unspecified addresses never reach the
//! cache or the database. Failed or empty lookups are not cached, so a
//! database loaded after startup is not shadowed by earlier misses.

pub mod maxmind;

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ipnetwork::Ipv6Network;
use parking_lot::RwLock;

use crate::config::GeoConfig;
use crate::error::AuthorityResult;

pub use maxmind::MaxMindDatabase;

/// City and country of an address; both empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub city: String,
    pub country: String,
}

impl GeoLocation {
    pub fn is_empty(&self) -> bool {
        self.city.is_empty() && self.country.is_empty()
    }

    /// `"City, Country"`, or whichever part is known.
    pub fn display(&self) -> String {
        match (self.city.is_empty(), self.country.is_empty()) {
            (false, false) => format!("{}, {}", self.city, self.country),
            (false, true) => self.city.clone(),
            (true, false) => self.country.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Raw database answer with every localized name variant.
#[derive(Debug, Clone, Default)]
pub struct GeoRecord {
    pub city_names: BTreeMap<String, String>,
    pub country_names: BTreeMap<String, String>,
    pub country_code: Option<String>,
}

impl GeoRecord {
    /// English names; the country falls back to its ISO code, the city has
    /// no fallback.
    pub fn localized(&self) -> GeoLocation {
        let city = self.city_names.get("en").cloned().unwrap_or_default();
        let country = self
            .country_names
            .get("en")
            .cloned()
            .or_else(|| self.country_code.clone())
            .unwrap_or_default();
        GeoLocation { city, country }
    }
}

/// Offline geolocation database.
pub trait GeoDatabase: Send + Sync {
    /// `Ok(None)` when the address is not in the database.
    fn lookup(&self, ip: IpAddr) -> AuthorityResult<Option<GeoRecord>>;
}

struct CachedLocation {
    location: GeoLocation,
    cached_at: Instant,
}

/// Geolocation cache statistics.
#[derive(Debug, Clone, Default)]
pub struct GeoStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Resolves IP addresses to locations through a TTL cache.
pub struct GeoResolver {
    database: RwLock<Option<Arc<dyn GeoDatabase>>>,
    cache: DashMap<String, CachedLocation>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GeoResolver {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            database: RwLock::new(None),
            cache: DashMap::new(),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Builds a resolver and opens the configured database, if any.
    ///
    /// A database that cannot be opened is logged and skipped; the resolver
    /// then answers every lookup with an empty location.
    pub fn from_config(config: &GeoConfig) -> Self {
        let resolver = Self::new(config.cache_ttl(), config.cache_max_entries);
        if let Some(path) = &config.database_path {
            match MaxMindDatabase::open(path) {
                Ok(db) => {
                    tracing::info!(path = %path.display(), "Geolocation database loaded");
                    resolver.load_database(Arc::new(db));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Geolocation disabled");
                }
            }
        }
        resolver
    }

    /// Installs (or replaces) the offline database.
    pub fn load_database(&self, database: Arc<dyn GeoDatabase>) {
        *self.database.write() = Some(database);
    }

    pub fn has_database(&self) -> bool {
        self.database.read().is_some()
    }

    /// Resolves `ip` to a location; empty when unknown or non-routable.
    pub fn resolve(&self, ip: &str) -> GeoLocation {
        let ip = ip.trim();
        if is_non_routable(ip) {
            return GeoLocation::default();
        }

        if let Some(entry) = self.cache.get(ip) {
            if entry.cached_at.elapsed() <= self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.location.clone();
            }
            drop(entry);
            self.cache.remove(ip);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let Ok(addr) = ip.parse::<IpAddr>() else {
            return GeoLocation::default();
        };
        // Clone the handle so the lock is not held during the lookup.
        let Some(database) = self.database.read().clone() else {
            return GeoLocation::default();
        };

        let location = match database.lookup(addr) {
            Ok(Some(record)) => record.localized(),
            Ok(None) => return GeoLocation::default(),
            Err(e) => {
                tracing::debug!(error = %e, "Geolocation lookup failed");
                return GeoLocation::default();
            }
        };
        if location.is_empty() {
            return location;
        }

        self.cache.insert(
            ip.to_string(),
            CachedLocation {
                location: location.clone(),
                cached_at: Instant::now(),
            },
        );
        if self.cache.len() > self.max_entries {
            self.cleanup_expired();
            self.evict_oldest();
        }
        location
    }

    /// Drops the oldest entries until the cache is back within its bound.
    fn evict_oldest(&self) {
        let excess = self.cache.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, String)> = self
            .cache
            .iter()
            .map(|entry| (entry.cached_at, entry.key().clone()))
            .collect();
        by_age.sort_unstable_by_key(|(cached_at, _)| *cached_at);
        for (_, key) in by_age.into_iter().take(excess) {
            self.cache.remove(&key);
        }
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.cache.retain(|_, entry| {
            if entry.cached_at.elapsed() > self.ttl {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn stats(&self) -> GeoStats {
        GeoStats {
            size: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

static PRIVATE_V6: LazyLock<Vec<Ipv6Network>> = LazyLock::new(|| {
    // unique-local, link-local
    ["fc00::/7", "fe80::/10"]
        .iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect()
});

/// Whether `ip` can never carry meaningful geolocation.
///
/// Input that does not parse as an address is classified by its textual
/// prefix.
pub fn is_non_routable(ip: &str) -> bool {
    let ip = ip.trim();
    match ip.parse::<IpAddr>() {
        Ok(addr) => is_non_routable_addr(addr),
        Err(_) => has_private_prefix(ip),
    }
}

fn is_non_routable_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_non_routable_addr(IpAddr::V4(v4));
            }
            v6.is_loopback() || v6.is_unspecified() || in_private_v6(v6)
        }
    }
}

fn in_private_v6(v6: Ipv6Addr) -> bool {
    PRIVATE_V6.iter().any(|net| net.contains(v6))
}

fn has_private_prefix(ip: &str) -> bool {
    let lower = ip.to_ascii_lowercase();
    let lower = lower.trim_start_matches('[');
    if lower.is_empty() || lower.starts_with("localhost") {
        return true;
    }
    if ["10.", "127.", "192.168.", "169.254.", "0.0.0.0"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    // IPv6 prefixes only apply to text shaped like an IPv6 address.
    let looks_v6 = lower.chars().take(5).any(|c| c == ':');
    if looks_v6
        && ["::1", "fe80:", "fc", "fd"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    // 172.16.0.0/12
    lower
        .strip_prefix("172.")
        .and_then(|rest| rest.split('.').next())
        .and_then(|octet| octet.parse::<u8>().ok())
        .is_some_and(|octet| (16..=31).contains(&octet))
}
