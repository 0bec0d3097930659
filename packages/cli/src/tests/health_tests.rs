use crate::api::health::health_check;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let result = health_check().await;
    assert!(result.is_ok());

    let json = result.unwrap();
    let value = json.0;

    assert_eq!(
        value.get("status").and_then(|v| v.as_str()),
        Some("healthy")
    );
    assert_eq!(
        value.get("service").and_then(|v| v.as_str()),
        Some("previewbox")
    );
    assert_eq!(
        value.get("version").and_then(|v| v.as_str()),
        Some(env!("CARGO_PKG_VERSION"))
    );
}

#[tokio::test]
async fn test_health_check_timestamp() {
    let result = health_check().await.unwrap();
    let value = result.0;

    let timestamp = value.get("timestamp").and_then(|v| v.as_i64());

    assert!(timestamp.is_some());
    // Timestamp should be reasonable (after year 2020)
    assert!(timestamp.unwrap() > 1577836800); // Jan 1, 2020
}
