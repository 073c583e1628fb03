//! Tests for the capture buffer

use super::*;
use crate::config::CaptureConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn enabled_config(dir: &TempDir) -> CaptureConfig {
    CaptureConfig {
        enabled: true,
        output_dir: dir.path().to_path_buf(),
        duration: Duration::ZERO,
        asset_cache_dir: dir.path().join("cache"),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_latest_state_tracks_last_capture_per_key() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));

    for i in 0..5 {
        buffer
            .capture("lift_state", json!({"lift_name": "lift_a", "floor": i}), Some("lift_a"), "gateway")
            .await;
        buffer
            .capture("lift_state", json!({"lift_name": "lift_b", "floor": 10 + i}), Some("lift_b"), "gateway")
            .await;
    }

    assert_eq!(buffer.latest("lift_state", "lift_a").await.unwrap()["floor"], 4);
    assert_eq!(buffer.latest("lift_state", "lift_b").await.unwrap()["floor"], 14);

    let stats = buffer.stats().await;
    assert_eq!(stats.message_count, 10);
    assert_eq!(stats.data_types["lift_state"], 10);
    assert_eq!(stats.unique_counts["lift_state"], 2);
}

#[tokio::test]
async fn test_unkeyed_capture_only_appends_history() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));

    buffer.capture("alarm", json!({"level": 3}), None, "internal").await;

    assert_eq!(buffer.history("alarm").await.len(), 1);
    assert!(!buffer.stats().await.unique_counts.contains_key("alarm"));
}

#[tokio::test]
async fn test_disabled_capture_is_noop() {
    let buffer = CaptureBuffer::disabled();
    for _ in 0..100 {
        buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    }
    let stats = buffer.stats().await;
    assert!(!stats.enabled);
    assert_eq!(stats.message_count, 0);
    assert_eq!(buffer.save(None).await.unwrap(), None);
}

#[tokio::test]
async fn test_stopped_capture_is_ignored() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    buffer.stop();
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    assert_eq!(buffer.stats().await.message_count, 1);
}

#[tokio::test]
async fn test_door_scenario_round_trips_through_file() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));

    buffer
        .capture("door_state", json!({"mode": "open"}), Some("door_1"), "gateway")
        .await;
    buffer
        .capture("door_state", json!({"mode": "closed"}), Some("door_1"), "gateway")
        .await;

    let path = buffer.save(None).await.unwrap().expect("first save writes");
    let file = CaptureFile::load(&path).await.unwrap();

    assert_eq!(file.latest_states["door_state"]["door_1"]["mode"], "closed");
    let history = &file.history["door_state"];
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].data["mode"], "open");
    assert_eq!(history[1].data["mode"], "closed");
    assert_eq!(history[0].source, "gateway");
    assert!(history[0].parsed_timestamp() <= history[1].parsed_timestamp());

    assert_eq!(file.metadata.total_messages, 2);
    assert_eq!(file.metadata.data_types, vec!["door_state".to_string()]);
    assert_eq!(file.sample_format["doors"][0]["mode"], "closed");
}

#[tokio::test]
async fn test_save_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    buffer.capture("task_state", json!({"booking": {"id": "t"}}), Some("t"), "internal").await;

    let first = buffer.save(None).await.unwrap();
    let second = buffer.save(None).await.unwrap();
    assert!(first.is_some());
    assert_eq!(second, None);

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
        .collect();
    assert_eq!(files.len(), 1);
    assert!(buffer.stats().await.saved);
}

#[tokio::test]
async fn test_empty_session_finalizes_without_file() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    assert_eq!(buffer.save(None).await.unwrap(), None);
    assert!(buffer.stats().await.saved);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failed_write_releases_claim() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;

    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let bad = blocker.join("session.json");

    assert!(buffer.save(Some(&bad)).await.is_err());
    assert!(!buffer.stats().await.saved);

    let good = dir.path().join("session.json");
    assert_eq!(buffer.save(Some(&good)).await.unwrap(), Some(good.clone()));
    assert!(good.exists());
}

#[tokio::test]
async fn test_concurrent_captures_are_all_recorded() {
    let dir = TempDir::new().unwrap();
    let buffer = Arc::new(CaptureBuffer::new(enabled_config(&dir)));

    let mut handles = Vec::new();
    for edge in 0..16 {
        let buffer = Arc::clone(&buffer);
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("door_{}", edge);
                buffer
                    .capture("door_state", json!({"edge": edge, "seq": i}), Some(&key), "gateway")
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = buffer.stats().await;
    assert_eq!(stats.message_count, 800);
    assert_eq!(stats.unique_counts["door_state"], 16);
    for edge in 0..16 {
        let latest = buffer.latest("door_state", &format!("door_{}", edge)).await.unwrap();
        assert_eq!(latest["seq"], 49);
    }
}

#[tokio::test]
async fn test_building_map_assets_are_saved_alongside() {
    let dir = TempDir::new().unwrap();
    let config = enabled_config(&dir);
    std::fs::create_dir_all(config.asset_cache_dir.join("building")).unwrap();
    std::fs::write(config.asset_cache_dir.join("building/L1.png"), b"image").unwrap();
    let buffer = CaptureBuffer::new(config);

    let map = json!({
        "name": "site",
        "levels": [{"name": "L1", "images": [{"data": "http://gw:8000/cache/building/L1.png"}]}]
    });
    buffer.capture("building_map", map, Some("site"), "gateway").await;

    let path = buffer.save(Some(&dir.path().join("run1.json"))).await.unwrap().unwrap();
    let file = CaptureFile::load(&path).await.unwrap();

    assert_eq!(file.metadata.captured_images, vec!["L1.png".to_string()]);
    assert_eq!(file.metadata.images_dir.as_deref(), Some("run1_images"));
    assert_eq!(
        file.latest_states["building_map"]["site"]["levels"][0]["images"][0][CAPTURED_FILE_TAG],
        "L1.png"
    );
    assert!(dir.path().join("run1_images/L1.png").exists());
}

#[tokio::test]
async fn test_capture_assets_records_without_history() {
    let dir = TempDir::new().unwrap();
    let config = enabled_config(&dir);
    std::fs::create_dir_all(config.asset_cache_dir.join("building")).unwrap();
    std::fs::write(config.asset_cache_dir.join("building/L2.png"), b"image").unwrap();
    let buffer = CaptureBuffer::new(config);

    let map = json!({"levels": [{"images": [{"data": "http://gw:8000/cache/building/L2.png"}]}]});
    let tagged = buffer.capture_assets(map).await;
    assert_eq!(tagged["levels"][0]["images"][0][CAPTURED_FILE_TAG], "L2.png");
    assert_eq!(buffer.stats().await.message_count, 0);

    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    let path = buffer.save(Some(&dir.path().join("run2.json"))).await.unwrap().unwrap();
    let file = CaptureFile::load(&path).await.unwrap();
    assert_eq!(file.metadata.captured_images, vec!["L2.png".to_string()]);
    assert!(dir.path().join("run2_images/L2.png").exists());
}

#[tokio::test]
async fn test_clear_resets_tables() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    let before = buffer.stats().await.start_time;

    buffer.clear().await;

    let stats = buffer.stats().await;
    assert_eq!(stats.message_count, 0);
    assert!(stats.data_types.is_empty());
    assert!(stats.unique_counts.is_empty());
    assert!(stats.start_time >= before);
}

#[tokio::test(start_paused = true)]
async fn test_duration_timer_stops_and_saves() {
    let dir = TempDir::new().unwrap();
    let config = CaptureConfig {
        duration: Duration::from_secs(60),
        ..enabled_config(&dir)
    };
    let buffer = Arc::new(CaptureBuffer::new(config));
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;

    let timer = buffer.spawn_duration_timer().expect("timer armed");
    timer.await.unwrap();

    assert!(buffer.is_stopped());
    assert!(buffer.stats().await.saved);

    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;
    assert_eq!(buffer.stats().await.message_count, 1);

    // The exit hook after the timer is a no-op.
    assert_eq!(buffer.shutdown().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timer_and_saves_once() {
    let dir = TempDir::new().unwrap();
    let config = CaptureConfig {
        duration: Duration::from_secs(3600),
        ..enabled_config(&dir)
    };
    let buffer = Arc::new(CaptureBuffer::new(config));
    buffer.capture("door_state", json!({}), Some("d"), "gateway").await;

    let timer = buffer.spawn_duration_timer().expect("timer armed");
    let saved = buffer.shutdown().await.unwrap();
    assert!(saved.is_some());

    timer.await.unwrap();
    assert!(!buffer.is_stopped());
    assert_eq!(buffer.save(None).await.unwrap(), None);
}

#[tokio::test]
async fn test_saved_session_is_final() {
    let dir = TempDir::new().unwrap();
    let buffer = CaptureBuffer::new(enabled_config(&dir));
    buffer.capture("door_state", json!({"mode": "open"}), Some("d"), "gateway").await;

    let path = buffer.shutdown().await.unwrap().expect("session written");

    for _ in 0..1000 {
        buffer
            .capture("door_state", json!({"mode": "closed"}), Some("d"), "gateway")
            .await;
    }

    let stats = buffer.stats().await;
    assert_eq!(stats.message_count, 1);
    assert_eq!(buffer.history("door_state").await.len(), 1);
    assert_eq!(buffer.latest("door_state", "d").await.unwrap()["mode"], "open");

    let file = CaptureFile::load(&path).await.unwrap();
    assert_eq!(file.metadata.total_messages, 1);
}

#[tokio::test]
async fn test_zero_duration_disables_timer() {
    let dir = TempDir::new().unwrap();
    let buffer = Arc::new(CaptureBuffer::new(enabled_config(&dir)));
    assert!(buffer.spawn_duration_timer().is_none());
}

#[tokio::test]
async fn test_start_fails_when_output_dir_cannot_be_created() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let config = CaptureConfig {
        output_dir: blocker.join("out"),
        ..enabled_config(&dir)
    };
    let err = CaptureBuffer::start(config).await.unwrap_err();
    assert!(matches!(err, crate::error::FleetReplayError::Capture(_)));
}
