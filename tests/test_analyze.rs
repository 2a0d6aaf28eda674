//! Integration tests for hand analysis.
//!
//! Tests cover:
//! - Local interpretation is deterministic and reflects corrections
//! - Remote interpretation and whole-request fallback on remote failure
//! - Unknown ids

mod common;

use assert_matches::assert_matches;
use palmread::analysis::interpret::NOT_DETECTED;
use palmread::core::store::StoreError;

use common::*;

/// Detect on the synthetic palm, then replace its lines with [`corrected_lines`].
async fn corrected_detection(service: &TestService) -> anyhow::Result<DataId> {
    let detected = service.detect(palm_png()).await?;
    service.correct(&detected.data_id, &corrected_lines()).await?;
    Ok(detected.data_id)
}

fn assert_all_present(reading: &HandReading) {
    for kind in LineKind::ALL {
        let line = reading.get(kind);
        if line.is_not_detected() {
            assert_eq!(line.feature, NOT_DETECTED);
            assert!(line.reading.is_none());
        } else {
            assert!(!line.feature.is_empty(), "{} has no feature", kind);
            assert!(line.reading.as_deref().is_some_and(|r| !r.is_empty()));
        }
    }
}

#[tokio::test]
async fn test_local_analysis_is_idempotent() -> anyhow::Result<()> {
    let service = make_service(Some(open_hand()), None);
    let detected = service.detect(palm_png()).await?;

    let first = service.analyze_hand(&detected.data_id).await?;
    let second = service.analyze_hand(&detected.data_id).await?;
    assert_eq!(first, second);
    assert_eq!(first.mode, InterpretationMode::Local);
    assert_all_present(&first);

    // A line without segments always reads as not detected
    for kind in LineKind::ALL {
        if detected.lines[&kind].is_empty() {
            assert!(first.get(kind).is_not_detected());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_analysis_reflects_correction() -> anyhow::Result<()> {
    let service = make_service(Some(open_hand()), None);
    let data_id = corrected_detection(&service).await?;

    let reading = service.analyze_hand(&data_id).await?;
    assert_eq!(
        reading.heart_line,
        local_reading(LineKind::Heart, FeatureTag::ShortBroken)
    );
    assert!(reading.head_line.is_not_detected());
    assert!(!reading.life_line.is_not_detected());
    assert_all_present(&reading);
    Ok(())
}

#[tokio::test]
async fn test_remote_failure_falls_back_to_local() -> anyhow::Result<()> {
    let model = MockModel::new(MockBehavior::Fail);
    let failing = make_service(Some(open_hand()), Some(model.clone()));
    let data_id = corrected_detection(&failing).await?;

    let reading = failing.analyze_hand(&data_id).await?;
    assert_eq!(model.calls(), 1);
    assert_eq!(reading.mode, InterpretationMode::Local);

    // Same record through a local-only service gives the same readings
    let record = failing.record(&data_id).await?;
    let local = make_service(Some(open_hand()), None);
    let local_record = local.store().create(palmread::core::store::NewDetection {
        source_image: record.source_image.clone(),
        clean_image: record.clean_image.clone(),
        annotated_image: record.annotated_image.clone(),
        hand_info: record.hand_info,
        palm_size: record.palm_size,
        lines: record.lines.clone(),
    })
    .await?;
    let expected = local.analyze_hand(&local_record.data_id).await?;
    assert_eq!(reading, expected);
    Ok(())
}

#[tokio::test]
async fn test_remote_cooldown_after_failure() -> anyhow::Result<()> {
    let model = MockModel::new(MockBehavior::Fail);
    let service = make_service(Some(open_hand()), Some(model.clone()));
    let data_id = corrected_detection(&service).await?;

    service.analyze_hand(&data_id).await?;
    let again = service.analyze_hand(&data_id).await?;
    assert_eq!(again.mode, InterpretationMode::Local);
    // Still cooling down, the remote model is not called a second time
    assert_eq!(model.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_remote_reading() -> anyhow::Result<()> {
    let reply = r#"```json
{
  "life_line": {"feature": "Gentle arc", "reading": "Steady energy."},
  "heart_line": {"feature": "Interrupted", "reading": "Feelings come in waves."}
}
```"#;
    let model = MockModel::new(MockBehavior::Reply(reply.to_string()));
    let service = make_service(Some(open_hand()), Some(model.clone()));
    let data_id = corrected_detection(&service).await?;

    let reading = service.analyze_hand(&data_id).await?;
    assert_eq!(reading.mode, InterpretationMode::Remote);
    assert_eq!(reading.life_line.feature, "Gentle arc");
    assert_eq!(reading.heart_line.reading.as_deref(), Some("Feelings come in waves."));
    assert!(reading.head_line.is_not_detected());
    assert_eq!(model.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_incomplete_remote_reply_is_discarded() -> anyhow::Result<()> {
    let reply = r#"{"life_line": {"feature": "Gentle arc", "reading": "Steady energy."}}"#;
    let model = MockModel::new(MockBehavior::Reply(reply.to_string()));
    let service = make_service(Some(open_hand()), Some(model.clone()));
    let data_id = corrected_detection(&service).await?;

    let reading = service.analyze_hand(&data_id).await?;
    assert_eq!(reading.mode, InterpretationMode::Local);
    assert_eq!(
        reading.heart_line,
        local_reading(LineKind::Heart, FeatureTag::ShortBroken)
    );
    Ok(())
}

#[tokio::test]
async fn test_no_detected_lines_skip_remote() -> anyhow::Result<()> {
    let model = MockModel::new(MockBehavior::Fail);
    let service = make_service(Some(open_hand()), Some(model.clone()));
    let detected = service.detect(palm_png()).await?;
    let empty = payload(&[("life_line", vec![]), ("heart_line", vec![]), ("head_line", vec![])]);
    service.correct(&detected.data_id, &empty).await?;

    let reading = service.analyze_hand(&detected.data_id).await?;
    assert_eq!(model.calls(), 0);
    for kind in LineKind::ALL {
        assert_eq!(*reading.get(kind), LineReading::not_detected());
    }
    Ok(())
}

#[tokio::test]
async fn test_analyze_unknown_id() {
    let service = make_service(Some(open_hand()), None);
    let err = service.analyze_hand(&DataId::new()).await.unwrap_err();
    assert_matches!(err, ServiceError::Store(StoreError::NotFound(_)));
    assert_eq!(err.to_body().error_code, 4004);
}
