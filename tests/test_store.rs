//! Integration tests for the SQLite detection store.
//!
//! Tests cover:
//! - Records survive closing and reopening the database
//! - Corrections are persisted and keep the creation time
//! - Unknown ids
//! - Concurrent corrections of one record, in memory and in SQLite

mod common;

use assert_matches::assert_matches;
use palmread::core::store::{HandInfo, ImageRef, NewDetection, StoreError};
use palmread::models::LineSet;

use common::*;

fn image_ref(name: &str) -> ImageRef {
    ImageRef {
        file_name: name.to_string(),
        url: format!("/images/{}", name),
    }
}

fn new_detection(lines: LineSet) -> NewDetection {
    NewDetection {
        source_image: image_ref("a.jpg"),
        clean_image: image_ref("a_clean.png"),
        annotated_image: image_ref("a_annotated.png"),
        hand_info: HandInfo {
            label: Handedness::Left,
            score: 0.9,
            is_open: true,
        },
        palm_size: 640.0,
        lines,
    }
}

#[tokio::test]
async fn test_record_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("palmread.db");
    let lines = LineSet::from_payload(&corrected_lines()).map_err(anyhow::Error::msg)?;

    let store = SqliteStore::open(&path).await?;
    let created = store.create(new_detection(lines)).await?;
    store.close().await;

    let reopened = SqliteStore::open(&path).await?;
    let loaded = reopened.get(&created.data_id).await?;
    assert_eq!(loaded, created);
    reopened.close().await;
    Ok(())
}

#[tokio::test]
async fn test_update_lines_persists() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("nested").join("palmread.db");

    let store = SqliteStore::open(&path).await?;
    let created = store.create(new_detection(LineSet::empty())).await?;
    let corrected = LineSet::from_payload(&corrected_lines()).map_err(anyhow::Error::msg)?;
    let updated = store.update_lines(&created.data_id, corrected.clone()).await?;
    store.close().await;

    let reopened = SqliteStore::open(&path).await?;
    let loaded = reopened.get(&created.data_id).await?;
    assert_eq!(loaded.lines, corrected);
    assert_eq!(loaded.lines, updated.lines);
    assert_eq!(loaded.created_at, created.created_at);
    assert!(loaded.updated_at >= created.updated_at);
    assert_eq!(loaded.annotated_image, created.annotated_image);
    reopened.close().await;
    Ok(())
}

#[tokio::test]
async fn test_sqlite_unknown_id() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let store = SqliteStore::open(dir.path().join("palmread.db")).await?;

    let missing = DataId::new();
    assert_matches!(store.get(&missing).await, Err(StoreError::NotFound(id)) if id == missing);
    assert_matches!(
        store.update_lines(&missing, LineSet::empty()).await,
        Err(StoreError::NotFound(_))
    );
    store.close().await;
    Ok(())
}

/// Two corrections of one record racing each other: both succeed and the stored lines
/// are exactly one of the two results, never a mix.
async fn race_corrections<R: DetectionRepository>(store: &R) -> anyhow::Result<()> {
    let created = store.create(new_detection(LineSet::empty())).await?;
    let first = LineSet::from_payload(&corrected_lines()).map_err(anyhow::Error::msg)?;
    let second = LineSet::from_payload(&payload(&[
        ("life_line", vec![vec![[100.0, 100.0], [120.0, 180.0], [150.0, 260.0]]]),
        ("heart_line", vec![]),
        ("head_line", vec![vec![[90.0, 140.0], [200.0, 170.0]]]),
    ]))
    .map_err(anyhow::Error::msg)?;

    let (a, b) = tokio::join!(
        store.update_lines(&created.data_id, first),
        store.update_lines(&created.data_id, second),
    );
    let (a, b) = (a?, b?);
    assert_ne!(a.lines, b.lines);

    let stored = store.get(&created.data_id).await?;
    assert!(
        stored.lines == a.lines || stored.lines == b.lines,
        "stored lines match neither correction: {:?}",
        stored.lines
    );
    assert_eq!(stored.annotated_image, created.annotated_image);
    assert_eq!(stored.created_at, created.created_at);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_corrections_in_memory() -> anyhow::Result<()> {
    race_corrections(&MemoryStore::new()).await
}

#[tokio::test]
async fn test_concurrent_corrections_in_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let store = SqliteStore::open(dir.path().join("palmread.db")).await?;
    race_corrections(&store).await?;
    store.close().await;
    Ok(())
}
