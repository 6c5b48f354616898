use axum::http::StatusCode;
use serde_json::json;

use super::helpers::*;
use crate::errors::{AppError, DavError};
use crate::models::request::{DESTINATION, OC_ETAG, OC_FILEID, OVERWRITE};
use crate::models::Permissions;
use crate::plugins::files::{FILE_ID_PROPERTY, PERMISSIONS_PROPERTY, SIZE_PROPERTY};
use crate::server::{DavServer, DAV_GETCONTENTLENGTH, DAV_GETCONTENTTYPE, DAV_GETETAG, DAV_RESOURCETYPE};
use crate::services::properties::PropertyStore;

#[tokio::test]
async fn test_put_then_get() {
    let t = TestEnv::new();
    t.storage.create_dir_all("docs").await;
    let server = t.server();

    let ctx = request("PUT", "docs/hello.txt").with_header("content-length", "11");
    let created = server.handle(&ctx, body(b"hello world")).await.unwrap();
    assert_eq!(created.status, StatusCode::CREATED);
    let etag = created.header("etag").unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(created.header(OC_ETAG), Some(etag.as_str()));
    assert!(created.header(OC_FILEID).unwrap().ends_with(TEST_INSTANCE));

    let fetched = server
        .handle(&request("GET", "docs/hello.txt"), empty_body())
        .await
        .unwrap();
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.header("etag"), Some(etag.as_str()));
    assert_eq!(fetched.header("content-length"), Some("11"));
    assert_eq!(fetched.header("content-type"), Some("text/plain"));
    assert!(fetched.header("last-modified").unwrap().ends_with("GMT"));
    assert_eq!(read_all(fetched.body.unwrap()).await, b"hello world");
}

#[tokio::test]
async fn test_head_has_headers_but_no_body() {
    let t = TestEnv::new();
    t.storage.put_file("docs/hello.txt", b"hello").await;

    let response = t
        .server()
        .handle(&request("HEAD", "docs/hello.txt"), empty_body())
        .await
        .unwrap();
    assert_eq!(response.header("content-length"), Some("5"));
    assert!(response.body.is_none());
}

#[tokio::test]
async fn test_overwrite_answers_no_content_with_new_etag() {
    let t = TestEnv::new();
    t.storage.put_file("docs/hello.txt", b"hello").await;
    let old_etag = t.tree().resolve("docs/hello.txt").await.unwrap().etag().unwrap();

    let response = t
        .server()
        .handle(&request("PUT", "docs/hello.txt"), body(b"changed"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let new_etag = response.header("etag").unwrap();
    assert_ne!(new_etag, old_etag);
    assert_eq!(response.header(OC_ETAG), Some(new_etag));
    assert!(response.header(OC_FILEID).is_some());
    assert_eq!(t.storage.contents("docs/hello.txt").await.unwrap(), b"changed");
    assert!(t.part_files().await.is_empty());
}

#[tokio::test]
async fn test_put_targets_that_cannot_hold_files() {
    let t = TestEnv::new();
    t.storage.create_dir_all("docs").await;
    t.storage.put_file("plain.txt", b"x").await;
    let server = t.server();

    let err = server.handle(&request("PUT", "docs"), body(b"x")).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);

    let err = server
        .handle(&request("PUT", "missing/file.txt"), body(b"x"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    let err = server
        .handle(&request("PUT", "plain.txt/child.txt"), body(b"x"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_put_into_read_only_directory() {
    let t = TestEnv::new();
    t.storage.create_dir_all("shared").await;
    t.storage.set_permissions("shared", Permissions::READ).await;

    let err = t
        .server()
        .handle(&request("PUT", "shared/new.txt"), body(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));
    assert!(!t.storage.exists("shared/new.txt").await);
}

#[tokio::test]
async fn test_truncated_upload_is_rejected() {
    let t = TestEnv::new();
    t.storage.create_dir_all("docs").await;

    let ctx = request("PUT", "docs/big.bin").with_header("content-length", "1000");
    let err = t.server().handle(&ctx, body(b"short")).await.unwrap_err();

    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(err.error_code(), "SIZE_MISMATCH");
    assert!(!t.storage.exists("docs/big.bin").await);
    assert!(t.part_files().await.is_empty());
}

#[tokio::test]
async fn test_get_on_directory_is_not_implemented() {
    let t = TestEnv::new();
    t.storage.create_dir_all("docs").await;

    let err = t.server().handle(&request("GET", "docs"), empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_unknown_method_is_not_implemented() {
    let t = TestEnv::new();
    let err = t.server().handle(&request("REPORT", ""), empty_body()).await.unwrap_err();
    assert!(matches!(err, DavError::NotImplemented { .. }));
}

#[tokio::test]
async fn test_delete_file_and_directory() {
    let t = TestEnv::new();
    t.storage.put_file("docs/a.txt", b"a").await;
    t.storage.put_file("old/nested/b.txt", b"b").await;
    let server = t.server();

    let response = server.handle(&request("DELETE", "docs/a.txt"), empty_body()).await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(!t.storage.exists("docs/a.txt").await);

    let response = server.handle(&request("DELETE", "old"), empty_body()).await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(!t.storage.exists("old/nested/b.txt").await);

    let err = server.handle(&request("DELETE", ""), empty_body()).await.unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));

    let err = server.handle(&request("DELETE", "docs/a.txt"), empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mkcol() {
    let t = TestEnv::new();
    t.storage.create_dir_all("docs").await;
    let server = t.server();

    let response = server.handle(&request("MKCOL", "docs/new"), empty_body()).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.header(OC_FILEID).is_some());
    assert!(t.tree().resolve("docs/new").await.unwrap().is_directory());

    let err = server.handle(&request("MKCOL", "docs/new"), empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);

    let err = server
        .handle(&request("MKCOL", "missing/new"), empty_body())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    t.storage.set_permissions("docs", Permissions::READ).await;
    let err = server
        .handle(&request("MKCOL", "docs/other"), empty_body())
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));
}

#[tokio::test]
async fn test_move_to_new_destination() {
    let t = TestEnv::new();
    t.storage.put_file("a/file.txt", b"hello").await;
    t.storage.create_dir_all("b").await;

    let ctx = request("MOVE", "a/file.txt").with_header(DESTINATION, "http://cloud.example.com/b/file.txt");
    let response = t.server().handle(&ctx, empty_body()).await.unwrap();

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.header(OC_FILEID).is_some());
    assert!(!t.storage.exists("a/file.txt").await);
    assert_eq!(t.storage.contents("b/file.txt").await.unwrap(), b"hello");
}

#[tokio::test]
async fn test_move_over_existing_file() {
    let t = TestEnv::new();
    t.storage.put_file("a/file.txt", b"new").await;
    t.storage.put_file("a/target.txt", b"old").await;
    let server = t.server();

    let refused = request("MOVE", "a/file.txt")
        .with_header(DESTINATION, "/a/target.txt")
        .with_header(OVERWRITE, "F");
    let err = server.handle(&refused, empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(t.storage.contents("a/target.txt").await.unwrap(), b"old");

    let allowed = request("MOVE", "a/file.txt").with_header(DESTINATION, "/a/target.txt");
    let response = server.handle(&allowed, empty_body()).await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(t.storage.contents("a/target.txt").await.unwrap(), b"new");
    assert!(!t.storage.exists("a/file.txt").await);
}

#[tokio::test]
async fn test_move_directory_over_existing_is_forbidden() {
    let t = TestEnv::new();
    t.storage.put_file("src/a.txt", b"a").await;
    t.storage.put_file("dst/b.txt", b"b").await;

    let ctx = request("MOVE", "src").with_header(DESTINATION, "/dst");
    let err = t.server().handle(&ctx, empty_body()).await.unwrap_err();

    assert!(matches!(err, DavError::Forbidden { .. }));
    assert!(t.storage.exists("src/a.txt").await);
    assert!(t.storage.exists("dst/b.txt").await);
}

#[tokio::test]
async fn test_move_requires_destination() {
    let t = TestEnv::new();
    t.storage.put_file("a.txt", b"a").await;
    let server = t.server();

    let err = server.handle(&request("MOVE", "a.txt"), empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let same = request("MOVE", "a.txt").with_header(DESTINATION, "/a.txt");
    let err = server.handle(&same, empty_body()).await.unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));

    let orphan = request("MOVE", "a.txt").with_header(DESTINATION, "/nowhere/a.txt");
    let err = server.handle(&orphan, empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_copy_directory() {
    let t = TestEnv::new();
    t.storage.put_file("src/a.txt", b"A").await;
    t.storage.put_file("src/deep/b.txt", b"B").await;

    let ctx = request("COPY", "src").with_header(DESTINATION, "/backup");
    let response = t.server().handle(&ctx, empty_body()).await.unwrap();

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(t.storage.contents("backup/a.txt").await.unwrap(), b"A");
    assert_eq!(t.storage.contents("backup/deep/b.txt").await.unwrap(), b"B");
    assert_eq!(t.storage.contents("src/a.txt").await.unwrap(), b"A");
}

#[tokio::test]
async fn test_propfind_file() {
    let t = TestEnv::new();
    t.storage.put_file("docs/a.txt", b"12345").await;

    let response = t
        .server()
        .handle(&request("PROPFIND", "docs/a.txt"), empty_body())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::MULTI_STATUS);

    let properties = response.properties.unwrap();
    let node = t.tree().resolve("docs/a.txt").await.unwrap();
    assert_eq!(properties[DAV_GETETAG], json!(node.etag().unwrap()));
    assert_eq!(properties[DAV_GETCONTENTLENGTH], json!(5));
    assert_eq!(properties[DAV_GETCONTENTTYPE], json!("text/plain"));
    assert_eq!(properties[DAV_RESOURCETYPE], json!([]));
    assert_eq!(
        properties[FILE_ID_PROPERTY],
        json!(format!("{:08}{}", node.file_id().unwrap(), TEST_INSTANCE))
    );
    assert_eq!(properties[PERMISSIONS_PROPERTY], json!(node.dav_permissions().unwrap()));
    assert!(!properties.contains_key(SIZE_PROPERTY));
}

#[tokio::test]
async fn test_propfind_directory_with_requested_names() {
    let t = TestEnv::new();
    t.storage.put_file("docs/a.txt", b"12345").await;
    t.storage.put_file("docs/b.txt", b"123").await;
    t.properties
        .set_property(TEST_USER, "/docs", "{http://example.com}color", json!("green"))
        .await
        .unwrap();
    t.properties
        .set_property(TEST_USER, "/docs", "{http://example.com}unrequested", json!(1))
        .await
        .unwrap();

    let wanted = json!([SIZE_PROPERTY, "{http://example.com}color"]).to_string();
    let response = t
        .server()
        .handle(&request("PROPFIND", "docs"), body(wanted.as_bytes()))
        .await
        .unwrap();
    let properties = response.properties.unwrap();

    assert_eq!(properties[SIZE_PROPERTY], json!(8));
    assert_eq!(properties["{http://example.com}color"], json!("green"));
    assert!(properties.contains_key(FILE_ID_PROPERTY));
    assert!(!properties.contains_key("{http://example.com}unrequested"));
    assert!(!properties.contains_key(DAV_GETETAG));
}

#[tokio::test]
async fn test_propfind_rejects_malformed_body() {
    let t = TestEnv::new();
    let err = t
        .server()
        .handle(&request("PROPFIND", ""), body(b"<xml/>"))
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::BadRequest { .. }));
}

#[tokio::test]
async fn test_proppatch_stores_dead_properties() {
    let t = TestEnv::new();
    t.storage.put_file("docs/a.txt", b"x").await;
    let server = t.server();

    let patch = json!({"{http://example.com}rating": 5}).to_string();
    let response = server
        .handle(&request("PROPPATCH", "docs/a.txt"), body(patch.as_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::MULTI_STATUS);
    let stored = t.properties.get_properties(TEST_USER, "/docs/a.txt").await.unwrap();
    assert_eq!(stored["{http://example.com}rating"], json!(5));

    for protected in [FILE_ID_PROPERTY, PERMISSIONS_PROPERTY, DAV_GETETAG] {
        let mut forged = serde_json::Map::new();
        forged.insert(protected.to_string(), json!("forged"));
        let patch = serde_json::Value::Object(forged).to_string();
        let err = server
            .handle(&request("PROPPATCH", "docs/a.txt"), body(patch.as_bytes()))
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::Forbidden { .. }), "{} must be protected", protected);
    }
}

#[tokio::test]
async fn test_server_without_storage_is_unavailable() {
    let server = DavServer::without_storage();
    let err = server.handle(&request("GET", "a.txt"), empty_body()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_offline_backend_is_unavailable() {
    let t = TestEnv::new();
    t.storage.put_file("docs/a.txt", b"x").await;
    t.storage.set_available(false);

    for name in ["GET", "PUT", "DELETE", "PROPFIND"] {
        let err = t
            .server()
            .handle(&request(name, "docs/a.txt"), empty_body())
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::ServiceUnavailable { .. }), "{}", name);
    }
}
