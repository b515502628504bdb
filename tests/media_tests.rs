use anyhow::Result;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledger_bot::errors::GatewayError;
use ledger_bot::media::{HttpMediaStore, MediaStore};

const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01];

fn store(server: &MockServer) -> HttpMediaStore {
    HttpMediaStore::new(
        reqwest::Client::new(),
        format!("{}/graph", server.uri()),
        "wa-token",
        format!("{}/cloudinary", server.uri()),
        "demo",
        "receipts",
    )
}

#[tokio::test]
async fn test_fetch_inbound_image_follows_media_url() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/media-42"))
        .and(header("authorization", "Bearer wa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/download/media-42", server.uri()),
            "mime_type": "image/jpeg",
            "id": "media-42"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/media-42"))
        .and(header("authorization", "Bearer wa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG_BYTES))
        .mount(&server)
        .await;

    let bytes = store(&server).fetch_inbound_image("media-42").await?;
    assert_eq!(bytes, JPEG_BYTES);
    Ok(())
}

#[tokio::test]
async fn test_fetch_unknown_media_is_status_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = store(&server).fetch_inbound_image("missing").await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { code: 404, .. }));
    Ok(())
}

#[tokio::test]
async fn test_upload_posts_data_uri_to_folder() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cloudinary/demo/image/upload"))
        .and(body_string_contains("data:image/jpeg;base64,"))
        .and(body_string_contains("receipts"))
        .and(body_string_contains("expense"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "secure_url": "https://res.cloudinary.com/demo/image/upload/expense/r1.jpg",
            "public_id": "expense/r1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = store(&server).upload(JPEG_BYTES, "expense").await?;
    assert_eq!(url, "https://res.cloudinary.com/demo/image/upload/expense/r1.jpg");
    Ok(())
}

#[tokio::test]
async fn test_upload_rejects_non_images_without_calling_host() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = store(&server)
        .upload(b"%PDF-1.7 not an image at all", "income")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedMedia(_)));
    Ok(())
}

#[tokio::test]
async fn test_oversized_download_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/big"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/download/big", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/big"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8; 64]))
        .mount(&server)
        .await;

    let err = store(&server)
        .max_bytes(32)
        .fetch_inbound_image("big")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedMedia(_)));
    Ok(())
}
