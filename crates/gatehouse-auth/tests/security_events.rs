mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingGeoDatabase, MockContactStore, RecordingAuditStore, capture_logs};
use gatehouse_auth::audit::{
    AuditStore, ContactCache, ContactResolver, ContactStore, MAX_FIELD_LEN, SecurityEvent,
    SecurityEventEmitter, SecurityEventKind,
};
use gatehouse_auth::config::AuditConfig;
use gatehouse_auth::geo::{GeoDatabase, GeoResolver};

fn emitter_with(
    store: Option<Arc<dyn AuditStore>>,
    geo_db: Option<Arc<dyn GeoDatabase>>,
    contacts: Option<Arc<dyn ContactStore>>,
    config: &AuditConfig,
) -> SecurityEventEmitter {
    let geo = GeoResolver::new(Duration::from_secs(60), 100);
    if let Some(db) = geo_db {
        geo.load_database(db);
    }
    let contacts = ContactResolver::new(ContactCache::new(10), contacts, Duration::from_secs(1));
    SecurityEventEmitter::new(store, Arc::new(geo), Arc::new(contacts), config)
}

#[tokio::test]
async fn console_line_is_single_sanitized_line() {
    let (logs, _guard) = capture_logs();
    let emitter = SecurityEventEmitter::console_only();

    emitter
        .emit(
            SecurityEvent::new(SecurityEventKind::LoginFailure)
                .identity(42)
                .contact("user@example.com\r\nFORGED ENTRY")
                .ip("198.51.100.1")
                .user_agent("agent\tone")
                .message("bad password\n2024-01-01 INFO admin logged in")
                .detail("attempt", 3)
                .detail("note", "secret-detail-value\nINJECTED"),
        )
        .await;

    let output = logs.contents();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 1, "{output}");

    let line = lines[0];
    assert!(line.contains("WARN"));
    assert!(line.contains("security"));
    assert!(line.contains("bad password 2024-01-01 INFO admin logged in"));
    assert!(line.contains("kind=\"login_failure\""));
    assert!(line.contains("identity_id=42"));
    assert!(line.contains("detail_count=2"));
    assert!(!line.contains("secret-detail-value"));
    assert!(!line.contains('\t'));
}

#[tokio::test]
async fn successful_events_log_at_info() {
    let (logs, _guard) = capture_logs();
    SecurityEventEmitter::console_only()
        .emit(SecurityEvent::new(SecurityEventKind::Logout).message("bye"))
        .await;
    assert!(logs.contents().contains(" INFO "));
}

#[tokio::test]
async fn persisted_record_keeps_details_and_location() {
    let store = RecordingAuditStore::new();
    let geo = CountingGeoDatabase::new("Berlin", "Germany");
    let emitter = emitter_with(
        Some(store.clone()),
        Some(geo.clone()),
        None,
        &AuditConfig::default(),
    );

    emitter
        .emit(
            SecurityEvent::new(SecurityEventKind::UnauthorizedAccess)
                .ip("8.8.8.8")
                .user_agent("curl/8")
                .message("session rejected")
                .detail("reason", "not_found")
                .detail("endpoint", "/api/items"),
        )
        .await;

    let records = store.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, SecurityEventKind::UnauthorizedAccess);
    assert_eq!(record.location, "Berlin, Germany");
    assert_eq!(record.details["reason"], "not_found");
    assert_eq!(record.details["endpoint"], "/api/items");
    assert_eq!(record.identity_id, None);
    assert_eq!(geo.calls(), 1);
}

#[tokio::test]
async fn private_ip_gets_empty_location() {
    let store = RecordingAuditStore::new();
    let geo = CountingGeoDatabase::new("Berlin", "Germany");
    let emitter = emitter_with(
        Some(store.clone()),
        Some(geo.clone()),
        None,
        &AuditConfig::default(),
    );

    emitter
        .emit(SecurityEvent::new(SecurityEventKind::Logout).ip("192.168.1.10"))
        .await;

    assert_eq!(store.records()[0].location, "");
    assert_eq!(geo.calls(), 0);
}

#[tokio::test]
async fn country_only_location() {
    let store = RecordingAuditStore::new();
    let emitter = emitter_with(
        Some(store.clone()),
        Some(CountingGeoDatabase::new("", "France")),
        None,
        &AuditConfig::default(),
    );

    emitter
        .emit(SecurityEvent::new(SecurityEventKind::LoginSuccess).ip("2.2.2.2"))
        .await;
    assert_eq!(store.records()[0].location, "France");
}

#[tokio::test]
async fn long_fields_are_truncated_before_persisting() {
    let store = RecordingAuditStore::new();
    let emitter = emitter_with(Some(store.clone()), None, None, &AuditConfig::default());

    emitter
        .emit(
            SecurityEvent::new(SecurityEventKind::SuspiciousActivity)
                .message("m".repeat(500))
                .user_agent("u".repeat(201)),
        )
        .await;

    let record = &store.records()[0];
    assert_eq!(record.message.chars().count(), MAX_FIELD_LEN + 3);
    assert!(record.message.ends_with("..."));
    assert!(record.user_agent.ends_with("..."));
}

#[tokio::test]
async fn contact_is_resolved_once_and_cached() {
    let store = RecordingAuditStore::new();
    let contacts = MockContactStore::with(&[(7, "seven@example.com")]);
    let emitter = emitter_with(
        Some(store.clone()),
        None,
        Some(contacts.clone()),
        &AuditConfig::default(),
    );

    for _ in 0..2 {
        emitter
            .emit(SecurityEvent::new(SecurityEventKind::LoginSuccess).identity(7))
            .await;
    }
    // An explicit contact wins over the lookup
    emitter
        .emit(
            SecurityEvent::new(SecurityEventKind::Logout)
                .identity(7)
                .contact("override@example.com"),
        )
        .await;

    let records = store.records();
    assert_eq!(records[0].contact, "seven@example.com");
    assert_eq!(records[1].contact, "seven@example.com");
    assert_eq!(records[2].contact, "override@example.com");
    assert_eq!(contacts.calls(), 1);
}

#[tokio::test]
async fn console_only_events_skip_contact_lookup() {
    let (logs, _guard) = capture_logs();
    let contacts = MockContactStore::with(&[(7, "seven@example.com")]);
    let emitter = emitter_with(None, None, Some(contacts.clone()), &AuditConfig::default());

    emitter
        .emit(
            SecurityEvent::new(SecurityEventKind::LoginFailure)
                .identity(7)
                .message("bad password"),
        )
        .await;

    let output = logs.contents();
    assert!(output.contains("bad password"));
    assert!(output.contains("identity_id=7"));
    assert!(!output.contains("seven@example.com"));
    assert_eq!(contacts.calls(), 0);
}

#[tokio::test]
async fn persistence_failure_is_swallowed_and_logged() {
    let (logs, _guard) = capture_logs();
    let emitter = emitter_with(
        Some(RecordingAuditStore::failing()),
        None,
        None,
        &AuditConfig::default(),
    );

    emitter
        .emit(SecurityEvent::new(SecurityEventKind::PermissionDenied).message("denied"))
        .await;

    let output = logs.contents();
    assert!(output.contains("denied"));
    assert!(output.contains("Failed to persist security event"));
}

#[tokio::test]
async fn persist_disabled_skips_durable_sink() {
    let store = RecordingAuditStore::new();
    let config = AuditConfig {
        persist: false,
        ..AuditConfig::default()
    };
    let emitter = emitter_with(Some(store.clone()), None, None, &config);

    emitter
        .emit(SecurityEvent::new(SecurityEventKind::LoginSuccess))
        .await;

    assert!(!emitter.persists());
    assert!(store.records().is_empty());
}
