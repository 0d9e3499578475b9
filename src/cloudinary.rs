/// Cloudinary image upload for report photos (unsigned preset, REST API).
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{CloudinaryConfig, Config, ServiceError, ServiceMode};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_IMAGES_PER_REPORT: usize = 3;
pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

const UPLOAD_STAGGER: Duration = Duration::from_millis(300);
const THUMBNAIL: &[(&str, &str)] = &[("w", "200"), ("h", "150"), ("c", "fill"), ("q", "auto:low")];
const MEDIUM: &[(&str, &str)] = &[("w", "600"), ("h", "400"), ("c", "fill"), ("q", "auto:good")];
const LARGE: &[(&str, &str)] = &[("w", "1200"), ("h", "900"), ("c", "limit"), ("q", "auto:best")];

#[derive(Clone, Debug, PartialEq)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
    pub public_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<String>,
    pub thumbnail_url: String,
    pub medium_url: String,
    pub large_url: String,
}

/// Outcome of a multi-image upload; failures of individual images are kept
/// alongside the successful ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadBatch {
    pub uploaded: Vec<UploadedImage>,
    pub failed: Vec<String>,
}

impl UploadBatch {
    pub fn is_partial(&self) -> bool {
        !self.uploaded.is_empty() && !self.failed.is_empty()
    }

    /// Comma-separated URLs, the format the report endpoint expects.
    pub fn images_url(&self) -> Option<String> {
        if self.uploaded.is_empty() {
            return None;
        }
        Some(
            self.uploaded
                .iter()
                .map(|image| image.url.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

#[derive(Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
    public_id: String,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
    bytes: Option<u64>,
    created_at: Option<String>,
}

#[derive(Clone)]
pub struct CloudinaryService {
    client: reqwest::Client,
    config: CloudinaryConfig,
    mode: ServiceMode,
    api_base: String,
    delivery_base: String,
    stagger: Duration,
}

impl CloudinaryService {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            config: config.cloudinary.clone(),
            mode: config.mode,
            api_base: "https://api.cloudinary.com/v1_1".to_string(),
            delivery_base: "https://res.cloudinary.com".to_string(),
            stagger: UPLOAD_STAGGER,
        }
    }

    /// Points uploads and delivery URLs at other hosts.
    pub fn with_endpoints(mut self, api_base: &str, delivery_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.delivery_base = delivery_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", self.api_base, self.config.cloud_name)
    }

    pub async fn upload_image(&self, file: &ImageFile) -> Result<UploadedImage, ServiceError> {
        validate_image(file)?;

        if self.mode.is_mock() {
            self.mode.simulate_latency(1).await;
            let public_id = format!(
                "{}/mock_{}_{}",
                self.config.folder,
                chrono::Utc::now().timestamp_millis(),
                file_stem(&file.file_name)
            );
            return Ok(self.describe(CloudinaryUpload {
                secure_url: format!(
                    "{}/{}/image/upload/{}.jpg",
                    self.delivery_base, self.config.cloud_name, public_id
                ),
                public_id,
                width: None,
                height: None,
                format: Some("jpg".to_string()),
                bytes: Some(file.bytes.len() as u64),
                created_at: Some(chrono::Utc::now().to_rfc3339()),
            }));
        }

        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|err| ServiceError::Validation(format!("Type de fichier invalide: {err}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("upload_preset", self.config.upload_preset.clone())
            .text("folder", self.config.folder.clone())
            .text("resource_type", "image")
            .text("quality", "auto:good")
            .text("fetch_format", "auto")
            .text("transformation", upload_transformation().to_string())
            .text("tags", "sportmap,report,user-upload");

        tracing::debug!("uploading {} to cloudinary", file.file_name);
        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|err| ServiceError::Upload(format!("Erreur upload: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status.as_u16().to_string());
            tracing::warn!("cloudinary rejected {}: {}", file.file_name, message);
            return Err(ServiceError::Upload(format!("Erreur upload: {message}")));
        }

        let upload: CloudinaryUpload = response
            .json()
            .await
            .map_err(|err| ServiceError::Upload(format!("Erreur upload: {err}")))?;
        tracing::info!("image uploaded: {}", upload.secure_url);
        Ok(self.describe(upload))
    }

    /// Uploads up to [`MAX_IMAGES_PER_REPORT`] images, starting each one
    /// `stagger` after the previous. Fails only if every image failed.
    pub async fn upload_images(&self, files: Vec<ImageFile>) -> Result<UploadBatch, ServiceError> {
        if files.is_empty() {
            return Ok(UploadBatch::default());
        }
        if files.len() > MAX_IMAGES_PER_REPORT {
            return Err(ServiceError::Validation(
                "Maximum 3 images autorisées par signalement".to_string(),
            ));
        }

        let total = files.len();
        let mut set = tokio::task::JoinSet::new();
        for (index, file) in files.into_iter().enumerate() {
            let service = self.clone();
            set.spawn(async move {
                tokio::time::sleep(service.stagger * index as u32).await;
                (index, service.upload_image(&file).await)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::warn!("upload task failed: {}", err),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut batch = UploadBatch::default();
        let mut only_invalid = true;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(image) => batch.uploaded.push(image),
                Err(err) => {
                    only_invalid &= matches!(err, ServiceError::Validation(_));
                    batch.failed.push(format!("Erreur image {}: {}", index + 1, err));
                }
            }
        }
        // a panicked task leaves no outcome behind
        if batch.uploaded.len() + batch.failed.len() < total {
            only_invalid = false;
            batch
                .failed
                .push("Erreur image: envoi interrompu".to_string());
        }

        if batch.uploaded.is_empty() {
            let message = format!(
                "Aucune image n'a pu être uploadée: {}",
                batch.failed.join(", ")
            );
            return Err(if only_invalid {
                ServiceError::Validation(message)
            } else {
                ServiceError::Upload(message)
            });
        }
        if batch.is_partial() {
            tracing::warn!(
                "{}/{} images uploaded: {:?}",
                batch.uploaded.len(),
                total,
                batch.failed
            );
        }
        Ok(batch)
    }

    fn describe(&self, upload: CloudinaryUpload) -> UploadedImage {
        UploadedImage {
            thumbnail_url: self.optimized_url(&upload.public_id, THUMBNAIL),
            medium_url: self.optimized_url(&upload.public_id, MEDIUM),
            large_url: self.optimized_url(&upload.public_id, LARGE),
            url: upload.secure_url,
            public_id: upload.public_id,
            width: upload.width,
            height: upload.height,
            format: upload.format,
            size: upload.bytes,
            created_at: upload.created_at,
        }
    }

    /// Delivery URL with automatic format and quality plus `transformations`.
    pub fn optimized_url(&self, public_id: &str, transformations: &[(&str, &str)]) -> String {
        let mut transform = String::from("f_auto,q_auto");
        for (key, value) in transformations {
            transform.push_str(&format!(",{key}_{value}"));
        }
        format!(
            "{}/{}/image/upload/{}/{}",
            self.delivery_base, self.config.cloud_name, transform, public_id
        )
    }

    pub fn thumbnail_url(&self, public_id: &str) -> String {
        self.optimized_url(public_id, THUMBNAIL)
    }

    pub fn medium_url(&self, public_id: &str) -> String {
        self.optimized_url(public_id, MEDIUM)
    }

    pub fn large_url(&self, public_id: &str) -> String {
        self.optimized_url(public_id, LARGE)
    }

    /// Whether the delivery host answers for the account's sample asset.
    pub async fn check_status(&self) -> bool {
        if self.mode.is_mock() {
            return true;
        }
        let url = format!(
            "{}/{}/image/upload/sample.jpg",
            self.delivery_base, self.config.cloud_name
        );
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::warn!("cloudinary unreachable: {}", err);
                false
            }
        }
    }
}

pub fn validate_image(file: &ImageFile) -> Result<(), ServiceError> {
    if file.bytes.is_empty() {
        return Err(ServiceError::Validation("Fichier invalide".to_string()));
    }
    if file.bytes.len() > MAX_IMAGE_BYTES {
        return Err(ServiceError::Validation(format!(
            "Fichier trop volumineux: {:.1}MB (max 5MB)",
            file.bytes.len() as f64 / 1024.0 / 1024.0
        )));
    }
    if !ALLOWED_CONTENT_TYPES.contains(&file.content_type.as_str()) {
        return Err(ServiceError::Validation(format!(
            "Type de fichier non supporté: {}",
            file.content_type
        )));
    }
    Ok(())
}

/// Public id of a versioned delivery URL, e.g.
/// `.../image/upload/v1712/sportmap/reports/abc.jpg` gives `sportmap/reports/abc`.
/// Percent-escapes are decoded.
pub fn public_id_from_url(url: &str) -> Option<String> {
    let segments: Vec<&str> = url.split('/').collect();
    let version = segments.iter().position(|segment| {
        segment.len() > 1
            && segment.starts_with('v')
            && segment[1..].chars().all(|ch| ch.is_ascii_digit())
    })?;
    let path = segments[version + 1..].join("/");
    let (stem, extension) = path.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() || !extension.chars().all(|ch| ch.is_ascii_lowercase()) {
        return None;
    }
    urlencoding::decode(stem).ok().map(|id| id.into_owned())
}

fn upload_transformation() -> Value {
    json!([
        { "quality": "auto:good" },
        { "fetch_format": "auto" },
        { "width": 1200, "height": 1200, "crop": "limit" },
        { "flags": "strip_profile" },
        {
            "overlay": {
                "text": "SportMap",
                "font_family": "Arial",
                "font_size": 20,
                "color": "white",
                "opacity": 50
            },
            "gravity": "south_east"
        }
    ])
}

fn file_stem(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    stem.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}
