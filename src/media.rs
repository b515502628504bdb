//! # Media Store Module
//!
//! Receipt photos arrive as platform media ids. They are downloaded from
//! the messaging platform, sniffed by byte signature, and uploaded to an
//! image host that returns a durable public URL.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::{check_status, GatewayError, GatewayResult};

pub const DEFAULT_CLOUDINARY_API_BASE: &str = "https://api.cloudinary.com/v1_1";
pub const MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024; // 10MB limit for receipt photos
/// Bytes needed before a signature can be recognized
pub const MIN_FORMAT_BYTES: usize = 8;

/// Media operations used by the conversation engine
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Download the raw bytes of an inbound image
    async fn fetch_inbound_image(&self, image_ref: &str) -> GatewayResult<Vec<u8>>;

    /// Store the bytes under `folder` and return their public URL
    async fn upload(&self, bytes: &[u8], folder: &str) -> GatewayResult<String>;
}

/// MIME type hint for a supported image, from its byte signature
pub fn sniff_mime(bytes: &[u8]) -> GatewayResult<&'static str> {
    if bytes.len() < MIN_FORMAT_BYTES {
        return Err(GatewayError::UnsupportedMedia(format!(
            "need at least {MIN_FORMAT_BYTES} bytes to detect format, got {}",
            bytes.len()
        )));
    }

    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => Ok("image/png"),
        Ok(image::ImageFormat::Jpeg) => Ok("image/jpeg"),
        Ok(image::ImageFormat::WebP) => Ok("image/webp"),
        Ok(image::ImageFormat::Gif) => Ok("image/gif"),
        Ok(other) => Err(GatewayError::UnsupportedMedia(format!("{other:?}"))),
        Err(e) => Err(GatewayError::UnsupportedMedia(e.to_string())),
    }
}

/// `data:` URI for an image, as accepted by the upload endpoint
pub fn data_uri(bytes: &[u8]) -> GatewayResult<String> {
    let mime = sniff_mime(bytes)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Downloads from the WhatsApp Cloud API and uploads to Cloudinary
pub struct HttpMediaStore {
    client: reqwest::Client,
    graph_api_base: String,
    whatsapp_token: String,
    upload_api_base: String,
    cloud_name: String,
    upload_preset: String,
    max_bytes: usize,
}

impl HttpMediaStore {
    pub fn new(
        client: reqwest::Client,
        graph_api_base: impl Into<String>,
        whatsapp_token: impl Into<String>,
        upload_api_base: impl Into<String>,
        cloud_name: impl Into<String>,
        upload_preset: impl Into<String>,
    ) -> Self {
        Self {
            client,
            graph_api_base: graph_api_base.into(),
            whatsapp_token: whatsapp_token.into(),
            upload_api_base: upload_api_base.into(),
            cloud_name: cloud_name.into(),
            upload_preset: upload_preset.into(),
            max_bytes: MAX_MEDIA_BYTES,
        }
    }

    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn check_size(&self, len: usize) -> GatewayResult<()> {
        if len > self.max_bytes {
            warn!(size = len, limit = self.max_bytes, "Receipt photo too large");
            return Err(GatewayError::UnsupportedMedia(format!(
                "{len} bytes exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn fetch_inbound_image(&self, image_ref: &str) -> GatewayResult<Vec<u8>> {
        let info_url = format!("{}/{}", self.graph_api_base.trim_end_matches('/'), image_ref);
        let response = self
            .client
            .get(&info_url)
            .bearer_auth(&self.whatsapp_token)
            .send()
            .await?;
        let info: MediaInfo = check_status(response).await?.json().await?;

        let response = self
            .client
            .get(&info.url)
            .bearer_auth(&self.whatsapp_token)
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;
        self.check_size(bytes.len())?;

        debug!(image_ref, size = bytes.len(), "Inbound image downloaded");
        Ok(bytes.to_vec())
    }

    async fn upload(&self, bytes: &[u8], folder: &str) -> GatewayResult<String> {
        self.check_size(bytes.len())?;
        let file = data_uri(bytes)?;

        let url = format!(
            "{}/{}/image/upload",
            self.upload_api_base.trim_end_matches('/'),
            self.cloud_name
        );
        let form = reqwest::multipart::Form::new()
            .text("file", file)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", folder.to_string());

        let response = self.client.post(&url).multipart(form).send().await?;
        let uploaded: UploadResponse = check_status(response).await?.json().await?;

        info!(folder, url = %uploaded.secure_url, "Receipt photo uploaded");
        Ok(uploaded.secure_url)
    }
}
