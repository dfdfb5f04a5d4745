//! Integration tests for downloads and HTML helpers.
//!
//! These tests verify the full download flow with mock HTTP servers.

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::time::Duration;

use paced_session::{DownloadError, DownloadOptions, ErrorPolicy, Session, SessionConfig};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_session() -> Session {
    let config = SessionConfig::default()
        .with_min_request_gap(Duration::ZERO)
        .with_retries(0)
        .with_backoff_factor(0.0);
    Session::new(config).expect("session should build")
}

/// Mounts GET and HEAD responders for a file endpoint.
async fn mount_file(server: &MockServer, route: &str, template: ResponseTemplate) {
    for verb in ["GET", "HEAD"] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(template.clone())
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_download_to_directory_uses_content_disposition_filename() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(
        &server,
        "/api/export",
        ResponseTemplate::new(200)
            .insert_header("Content-Type", "application/pdf")
            .insert_header(
                "Content-Disposition",
                r#"attachment; filename="quarterly-report.pdf""#,
            )
            .set_body_bytes(b"PDF bytes".to_vec()),
    )
    .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let session = test_session();

    let saved = session
        .download(
            &format!("{}/api/export", server.uri()),
            dir.path(),
            &DownloadOptions::default(),
        )
        .await
        .expect("download should succeed")
        .expect("file should be written");

    assert_eq!(saved, dir.path().join("quarterly-report.pdf"));
    assert_eq!(std::fs::read(&saved).expect("read file"), b"PDF bytes");
}

#[tokio::test]
async fn test_download_to_directory_falls_back_to_url_segment() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(
        &server,
        "/files/My+Data%20Set.csv",
        ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"),
    )
    .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let session = test_session();

    let saved = session
        .download(
            &format!("{}/files/My+Data%20Set.csv", server.uri()),
            dir.path(),
            &DownloadOptions::default(),
        )
        .await
        .expect("download should succeed")
        .expect("file should be written");

    assert_eq!(saved, dir.path().join("My Data Set.csv"));
}

#[tokio::test]
async fn test_download_to_file_path_writes_exact_target() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("custom.bin");
    let session = test_session();

    let saved = session
        .download(
            &format!("{}/blob", server.uri()),
            &target,
            &DownloadOptions::default(),
        )
        .await
        .expect("download should succeed")
        .expect("file should be written");

    assert_eq!(saved, target);
    assert_eq!(std::fs::metadata(&target).expect("metadata").len(), 64 * 1024);
}

#[tokio::test]
async fn test_confirm_downloadable_skips_html_pages() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("HEAD"))
        .and(path("/article"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let session = test_session();
    let url = format!("{}/article", server.uri());

    assert!(!session.downloadable(&url).await.expect("HEAD should succeed"));

    let result = session
        .download(
            &url,
            dir.path(),
            &DownloadOptions::default().confirm_downloadable(true),
        )
        .await
        .expect("skipping is not an error");
    assert!(result.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_downloadable() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("HEAD"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = test_session();
    assert!(
        session
            .downloadable(&format!("{}/raw", server.uri()))
            .await
            .expect("HEAD should succeed")
    );
}

#[tokio::test]
async fn test_download_failure_surfaces_request_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("gone.bin");
    let session = test_session();

    let error = session
        .download(
            &format!("{}/gone", server.uri()),
            &target,
            &DownloadOptions::default(),
        )
        .await
        .expect_err("exhausted retries should fail");

    assert!(matches!(error, DownloadError::Request(ref e) if e.is_retry_exhausted()));
    assert!(!target.exists(), "no file should be left behind");
}

#[tokio::test]
async fn test_filename_from_url_prefers_header() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("HEAD"))
        .and(path("/dl/123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Disposition", "attachment; filename=slides.pptx"),
        )
        .mount(&server)
        .await;

    let session = test_session();
    let name = session
        .filename_from_url(&format!("{}/dl/123", server.uri()))
        .await
        .expect("HEAD should succeed");
    assert_eq!(name, "slides.pptx");
}

// ==================== HTML ====================

const CATALOG: &str = r#"<html><head><title>Catalog</title></head><body>
<ul><li class="item">Alpha</li><li class="item">Beta</li></ul>
</body></html>"#;

#[tokio::test]
async fn test_soup_selects_element_texts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/catalog"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(CATALOG),
        )
        .mount(&server)
        .await;

    let session = test_session();
    let soup = session
        .soup(&format!("{}/catalog", server.uri()))
        .await
        .expect("soup should succeed");

    assert_eq!(soup.status().as_u16(), 200);
    assert_eq!(soup.title().as_deref(), Some("Catalog"));
    assert_eq!(soup.select("li.item").expect("valid selector"), vec!["Alpha", "Beta"]);
}

#[tokio::test]
async fn test_bulk_soup_keeps_order_and_records_failures() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    for (route, title) in [("/one", "One"), ("/two", "Two")] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><head><title>{title}</title></head></html>")),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = SessionConfig::default()
        .with_min_request_gap(Duration::ZERO)
        .with_retries(0)
        .with_error_policy(ErrorPolicy::Record);
    let session = Session::new(config).expect("session should build");
    let urls = vec![
        format!("{}/two", server.uri()),
        format!("{}/down", server.uri()),
        format!("{}/one", server.uri()),
    ];

    let soups = session.bulk_soup(&urls).await.expect("record mode never aborts");

    let titles: Vec<Option<String>> = soups
        .iter()
        .map(|soup| soup.as_ref().and_then(paced_session::Soup::title))
        .collect();
    assert_eq!(
        titles,
        vec![Some("Two".to_string()), None, Some("One".to_string())]
    );
}
