use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use mockito::Matcher;

use unitvisor_core::{SourceError, SourceProvider};
use unitvisor_sources::{ObjectStoreSource, S3ClientOptions};

fn options(server: &mockito::ServerGuard) -> S3ClientOptions {
    S3ClientOptions {
        region: Some("us-east-1".into()),
        endpoint_url: Some(server.url()),
        access_key_id: Some("test-key".into()),
        secret_key: Some("test-secret".into()),
    }
}

#[tokio::test]
async fn reads_objects_under_prefix_path_style() {
    let mut server = mockito::Server::new_async().await;
    let index = server
        .mock("GET", "/units/python/index")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("last-modified", "Wed, 01 May 2024 12:00:00 GMT")
        .with_body("sales.py\n")
        .create_async()
        .await;
    let unit = server
        .mock("GET", "/units/python/sales.py")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("last-modified", "Thu, 02 May 2024 08:30:00 GMT")
        .with_body("print('sales')")
        .create_async()
        .await;

    let source = ObjectStoreSource::connect("units", "python/", &options(&server)).await;
    assert_eq!(source.prefix(), "python");
    assert_eq!(source.list_unit_names().await.unwrap(), vec!["sales.py"]);
    assert_eq!(source.read_unit("sales.py").await.unwrap(), "print('sales')");
    assert_eq!(
        source.data_age().await,
        Some(Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap())
    );

    index.assert_async().await;
    unit.assert_async().await;
}

#[tokio::test]
async fn missing_object_reports_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/units/index")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_header("content-type", "application/xml")
        .with_body(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
        )
        .create_async()
        .await;

    let source = ObjectStoreSource::connect("units", "", &options(&server)).await;
    let err = source.list_unit_names().await.unwrap_err();
    assert_matches!(err, SourceError::Http { status: 404, ref url } if url == "s3://units/index");
    assert!(err.is_unavailable());
}
