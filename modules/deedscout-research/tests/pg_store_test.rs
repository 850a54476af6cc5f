//! Integration tests for PgJobStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use deedscout_common::{Job, JobStatus, TaskStatus};
use deedscout_research::{JobStore, PgJobStore};

/// Get a migrated store, or skip if no test DB is available.
async fn test_store() -> Option<PgJobStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgJobStore::new(pool.clone());
    store.migrate().await.ok()?;

    sqlx::query("TRUNCATE research_jobs")
        .execute(&pool)
        .await
        .ok()?;

    Some(store)
}

#[tokio::test]
async fn save_then_load_round_trips_payload() {
    let Some(store) = test_store().await else {
        return;
    };
    let mut job = Job::new(vec!["1 Main St".into(), "2 Main St".into()]);
    job.tasks[0].status = TaskStatus::Running;
    store.save(&job).await.unwrap();

    let loaded = store.load(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.tasks[0].status, TaskStatus::Running);
    assert_eq!(loaded.total_addresses, 2);
}

#[tokio::test]
async fn older_snapshot_does_not_overwrite_newer() {
    let Some(store) = test_store().await else {
        return;
    };
    let mut job = Job::new(vec!["1 Main St".into()]);
    let stale = job.clone();
    job.status = JobStatus::Completed;
    job.updated_at = job.updated_at + Duration::seconds(5);

    store.save(&job).await.unwrap();
    store.save(&stale).await.unwrap();

    let loaded = store.load(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
}

#[tokio::test]
async fn missing_job_loads_none() {
    let Some(store) = test_store().await else {
        return;
    };
    assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    assert!(store.is_connected().await);
}
