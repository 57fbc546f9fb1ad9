use assert_matches::assert_matches;
use mockito::Matcher;

use unitvisor_core::{SourceError, SourceProvider};
use unitvisor_sources::{ForgeKind, RemoteRepositorySource};

fn source_for(server: &mockito::ServerGuard, token: Option<&str>) -> RemoteRepositorySource {
    RemoteRepositorySource::new(
        &format!("{}/owner/repo", server.url()),
        "python",
        "main",
        token.map(str::to_string),
        Some(ForgeKind::GitLab),
    )
    .unwrap()
}

#[tokio::test]
async fn fetches_listing_and_units_with_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let index = server
        .mock("GET", "/owner/repo/-/raw/main/python/index")
        .match_header("authorization", "Bearer glpat-test")
        .with_status(200)
        .with_body("# units\nsales.py\nextra.py\n")
        .create_async()
        .await;
    let unit = server
        .mock("GET", "/owner/repo/-/raw/main/python/sales.py")
        .match_header("authorization", "Bearer glpat-test")
        .with_status(200)
        .with_body("print('hi')")
        .create_async()
        .await;

    let source = source_for(&server, Some("glpat-test"));
    assert_eq!(
        source.raw_base(),
        format!("{}/owner/repo/-/raw/main", server.url())
    );
    assert_eq!(
        source.list_unit_names().await.unwrap(),
        vec!["sales.py", "extra.py"]
    );
    assert_eq!(source.read_unit("sales.py").await.unwrap(), "print('hi')");
    assert_eq!(source.data_age().await, None);

    index.assert_async().await;
    unit.assert_async().await;
}

#[tokio::test]
async fn anonymous_requests_carry_no_authorization() {
    let mut server = mockito::Server::new_async().await;
    let index = server
        .mock("GET", "/owner/repo/-/raw/main/python/index")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("a.py\n")
        .create_async()
        .await;

    let source = source_for(&server, None);
    assert_eq!(source.list_unit_names().await.unwrap(), vec!["a.py"]);
    index.assert_async().await;
}

#[tokio::test]
async fn blank_token_is_treated_as_absent() {
    let mut server = mockito::Server::new_async().await;
    let index = server
        .mock("GET", "/owner/repo/-/raw/main/python/index")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("a.py\n")
        .create_async()
        .await;

    let source = source_for(&server, Some("  "));
    source.list_unit_names().await.unwrap();
    index.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/owner/repo/-/raw/main/python/index")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/owner/repo/-/raw/main/python/broken.py")
        .with_status(500)
        .create_async()
        .await;

    let source = source_for(&server, None);
    let err = source.list_unit_names().await.unwrap_err();
    assert_matches!(err, SourceError::Http { status: 404, ref url } if url.ends_with("/python/index"));
    assert!(err.is_unavailable());

    let err = source.read_unit("broken.py").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn unreachable_host_is_unavailable() {
    let source = RemoteRepositorySource::new(
        "http://127.0.0.1:9/owner/repo",
        "python",
        "main",
        None,
        Some(ForgeKind::Gitea),
    )
    .unwrap();
    let err = source.list_unit_names().await.unwrap_err();
    assert_matches!(err, SourceError::Unavailable { .. });
}
