// ==========================================
// ThresholdApi 集成测试
// ==========================================


use rejection_analysis::api::ApiError;
use rejection_analysis::domain::threshold::ThresholdConfig;
use rejection_analysis::domain::types::{InspectionType, Severity};
use test_helpers::*;

fn config(name: &str, product: Option<&str>, threshold: f64) -> ThresholdConfig {
    ThresholdConfig {
        name: name.to_string(),
        inspection_type: InspectionType::Lot,
        product_ref_no: product.map(str::to_string),
        item_group: None,
        threshold_pct: threshold,
        warning_pct: None,
        critical_pct: None,
        is_active: true,
    }
}

#[tokio::test]
async fn test_resolve_优先级() {
    let (_tmp, state) = create_seeded_state().expect("无法创建测试环境");
    let api = &state.threshold_api;

    api.save_threshold_config(config("RTC-GLOBAL", None, 4.0)).await.unwrap();
    api.save_threshold_config(config("RTC-T5117", Some("T5117"), 7.0)).await.unwrap();

    let product = api
        .resolve_threshold(&InspectionType::Lot, Some("T5117"), None)
        .await
        .unwrap();
    assert_eq!(product.threshold_pct, 7.0);
    // 未填写的预警/严重阈值取系统默认
    assert_eq!(product.warning_pct, Some(3.0));
    assert_eq!(product.critical_pct, Some(10.0));

    let other = api
        .resolve_threshold(&InspectionType::Lot, Some("T9999"), None)
        .await
        .unwrap();
    assert_eq!(other.threshold_pct, 4.0);

    let incoming = api
        .resolve_threshold(&InspectionType::Incoming, None, None)
        .await
        .unwrap();
    assert_eq!(incoming.threshold_pct, 5.0);

    assert_eq!(
        api.classify_rate(8.0, &InspectionType::Lot, Some("T5117")).await.unwrap(),
        Severity::Exceeded
    );
    assert_eq!(
        api.classify_rate(12.0, &InspectionType::Lot, None).await.unwrap(),
        Severity::Critical
    );
}

#[tokio::test]
async fn test_save_重复作用域与无效阈值() {
    let (_tmp, state) = create_seeded_state().expect("无法创建测试环境");
    let api = &state.threshold_api;

    api.save_threshold_config(config("RTC-1", Some("T5117"), 5.0)).await.unwrap();

    let err = api
        .save_threshold_config(config("RTC-2", Some("T5117"), 6.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BusinessRuleViolation(_)));

    // 同名配置可更新
    api.save_threshold_config(config("RTC-1", Some("T5117"), 6.0)).await.unwrap();
    let stored = api.list_threshold_configs(&InspectionType::Lot).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].threshold_pct, 6.0);

    let mut invalid = config("RTC-3", None, 5.0);
    invalid.warning_pct = Some(6.0);
    let err = api.save_threshold_config(invalid).await.unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

#[tokio::test]
async fn test_classify_高主阈值不借用较低的严重阈值() {
    let (_tmp, state) = create_seeded_state().expect("无法创建测试环境");
    let api = &state.threshold_api;

    api.save_threshold_config(config("RTC-HIGH", None, 15.0)).await.unwrap();

    let levels = api
        .resolve_threshold(&InspectionType::Lot, None, None)
        .await
        .unwrap();
    assert_eq!(levels.threshold_pct, 15.0);
    assert_eq!(levels.critical_pct, None);

    // 12% 低于主阈值，只到预警
    assert_eq!(
        api.classify_rate(12.0, &InspectionType::Lot, None).await.unwrap(),
        Severity::Warning
    );
    assert_eq!(
        api.classify_rate(16.0, &InspectionType::Lot, None).await.unwrap(),
        Severity::Exceeded
    );
}
