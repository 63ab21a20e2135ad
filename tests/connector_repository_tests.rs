//! Integration tests for ConnectorRepository.

use anyhow::Result;
use chrono::Utc;
use connector_sync::domain::{ConfigurableField, ConnectorStatus, Scheduling};
use connector_sync::error::StoreError;
use connector_sync::repositories::ConnectorRepository;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{connector_state, setup_test_db_arc};

#[tokio::test]
async fn create_and_get_round_trips_the_record() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());

    let mut state = connector_state("conn-1", Some("example"));
    state.scheduling = Some(Scheduling {
        enabled: true,
        interval: "0 0 * * * ?".to_string(),
    });
    state.sync_now = true;
    repo.create(&state).await?;

    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.name, "Connector conn-1");
    assert_eq!(loaded.index_name, "search-conn-1");
    assert_eq!(loaded.service_type.as_deref(), Some("example"));
    assert_eq!(loaded.status(), ConnectorStatus::Created);
    assert_eq!(loaded.scheduling, state.scheduling);
    assert!(loaded.sync_now);
    assert!(loaded.sync_status.is_none());
    Ok(())
}

#[tokio::test]
async fn get_missing_connector_returns_none() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());

    assert!(repo.get("nope").await?.is_none());
    assert!(matches!(
        repo.heartbeat("nope", None).await,
        Err(StoreError::ConnectorNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn save_of_unknown_connector_fails() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());

    let result = repo.save(&connector_state("ghost", None)).await;
    assert!(matches!(result, Err(StoreError::ConnectorNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn configuration_with_missing_default_needs_configuration() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", Some("example")))
        .await?;

    let fields = vec![
        ConfigurableField::new("Host", "host").with_default("localhost"),
        ConfigurableField::new("API token", "token"),
    ];
    let updated = repo.update_configuration("conn-1", &fields).await?;
    assert_eq!(updated.status(), ConnectorStatus::NeedsConfiguration);

    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.status(), ConnectorStatus::NeedsConfiguration);
    assert_eq!(loaded.config_value("host"), Some("localhost"));
    assert_eq!(loaded.config_value("token"), None);
    assert_eq!(loaded.configuration["token"].label, "API token");
    assert!(loaded.last_seen_at.is_some());
    assert!(!loaded.status_allows_sync());
    Ok(())
}

#[tokio::test]
async fn configuration_with_all_defaults_is_configured() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", Some("example")))
        .await?;

    let fields = vec![ConfigurableField::new("Example Field", "foo").with_default("bar")];
    repo.update_configuration("conn-1", &fields).await?;

    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.status(), ConnectorStatus::Configured);
    assert_eq!(loaded.config_value("foo"), Some("bar"));
    Ok(())
}

#[tokio::test]
async fn update_status_enforces_error_message() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", None)).await?;

    let result = repo
        .update_status("conn-1", ConnectorStatus::Error, None)
        .await;
    assert!(matches!(result, Err(StoreError::State(_))));

    repo.update_status("conn-1", ConnectorStatus::Error, Some("boom".to_string()))
        .await?;
    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.status(), ConnectorStatus::Error);
    assert_eq!(loaded.error(), Some("boom"));

    repo.update_status("conn-1", ConnectorStatus::Connected, Some("ignored".to_string()))
        .await?;
    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.status(), ConnectorStatus::Connected);
    assert!(loaded.error().is_none());
    Ok(())
}

#[tokio::test]
async fn heartbeat_records_health() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", None)).await?;
    repo.update_status("conn-1", ConnectorStatus::Configured, None)
        .await?;

    let before = Utc::now();
    let failed = repo
        .heartbeat("conn-1", Some("connection refused".to_string()))
        .await?;
    assert_eq!(failed.status(), ConnectorStatus::Error);
    assert_eq!(failed.error(), Some("connection refused"));
    assert!(failed.last_seen_at.is_some_and(|seen| seen >= before));

    let healthy = repo.heartbeat("conn-1", None).await?;
    assert_eq!(healthy.status(), ConnectorStatus::Connected);
    assert!(healthy.error().is_none());
    Ok(())
}

#[tokio::test]
async fn heartbeat_does_not_move_unconfigured_connector() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", None)).await?;

    let state = repo
        .heartbeat("conn-1", Some("connection refused".to_string()))
        .await?;
    assert_eq!(state.status(), ConnectorStatus::Created);
    assert!(state.last_seen_at.is_some());
    Ok(())
}

#[tokio::test]
async fn update_service_type_persists() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    repo.create(&connector_state("conn-1", None)).await?;

    repo.update_service_type("conn-1", "example").await?;

    let loaded = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(loaded.service_type.as_deref(), Some("example"));
    Ok(())
}
