//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gatehouse_auth::audit::{AuditRecord, AuditStore, ContactStore};
use gatehouse_auth::cache::{CounterOutcome, FastCache};
use gatehouse_auth::error::{CacheError, CacheResult, StoreError, StoreResult};
use gatehouse_auth::geo::{GeoDatabase, GeoRecord};
use gatehouse_auth::{AuthorityResult, Principal, SessionStore};

/// Session table with expiry and soft deletion, counting every query.
#[derive(Default)]
pub struct MockSessionStore {
    sessions: Mutex<HashMap<String, (Principal, Instant)>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockSessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, token: &str, principal: Principal, ttl: Duration) {
        self.sessions
            .lock()
            .unwrap()
            .insert(token.to_string(), (principal, Instant::now() + ttl));
    }

    /// Adds a session whose expiry is already in the past.
    pub fn insert_expired(&self, token: &str, principal: Principal) {
        let past = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        self.sessions
            .lock()
            .unwrap()
            .insert(token.to_string(), (principal, past));
    }

    pub fn remove(&self, token: &str) {
        self.sessions.lock().unwrap().remove(token);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn find_active(&self, token: &str) -> StoreResult<Option<Principal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(token)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(principal, _)| *principal))
    }
}

/// Audit sink that records every row, or fails every write.
#[derive(Default)]
pub struct RecordingAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl RecordingAuditStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for RecordingAuditStore {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("audit table is locked"));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Identity → contact table, counting every query.
#[derive(Default)]
pub struct MockContactStore {
    contacts: Mutex<HashMap<u32, String>>,
    calls: AtomicUsize,
}

impl MockContactStore {
    pub fn with(entries: &[(u32, &str)]) -> Arc<Self> {
        let store = Self::default();
        {
            let mut contacts = store.contacts.lock().unwrap();
            for (id, contact) in entries {
                contacts.insert(*id, contact.to_string());
            }
        }
        Arc::new(store)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactStore for MockContactStore {
    async fn find_contact(&self, identity_id: u32) -> StoreResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contacts.lock().unwrap().get(&identity_id).cloned())
    }
}

/// Fast cache whose every call fails, counting the attempts.
#[derive(Default)]
pub struct FailingFastCache {
    calls: AtomicUsize,
}

impl FailingFastCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::pool("connection refused"))
    }
}

#[async_trait]
impl FastCache for FailingFastCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        self.fail()
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        self.fail()
    }

    async fn delete(&self, _keys: &[String]) -> CacheResult<u64> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        self.fail()
    }

    async fn persist(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn incr_within_limit(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> CacheResult<CounterOutcome> {
        self.fail()
    }

    async fn set_add_aligned(&self, _key: &str, _member: &str, _ttl: Duration) -> CacheResult<()> {
        self.fail()
    }

    async fn set_remove_and_prune(&self, _key: &str, _member: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn set_members(&self, _key: &str) -> CacheResult<Vec<String>> {
        self.fail()
    }

    async fn set_len(&self, _key: &str) -> CacheResult<u64> {
        self.fail()
    }

    async fn ping(&self) -> CacheResult<()> {
        self.fail()
    }
}

/// Geolocation database answering every address with one record.
pub struct CountingGeoDatabase {
    record: GeoRecord,
    calls: AtomicUsize,
}

impl CountingGeoDatabase {
    pub fn new(city: &str, country: &str) -> Arc<Self> {
        let mut record = GeoRecord::default();
        if !city.is_empty() {
            record.city_names.insert("en".to_string(), city.to_string());
        }
        if !country.is_empty() {
            record
                .country_names
                .insert("en".to_string(), country.to_string());
        }
        Arc::new(Self {
            record,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeoDatabase for CountingGeoDatabase {
    fn lookup(&self, _ip: IpAddr) -> AuthorityResult<Option<GeoRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.record.clone()))
    }
}

/// `tracing` writer collecting formatted output in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Installs a thread-local subscriber writing plain-text lines into the
/// returned buffer. Keep the guard alive for the duration of the test.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
