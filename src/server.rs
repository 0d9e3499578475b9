use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::services::{ServeDir, ServeFile};

use crate::{
    Config, FacilityQuery, FacilityService, FeatureCollection, ServiceError,
    auth::{
        AuthResponse, AuthService, Credentials, ForgotPasswordRequest, MessageResponse,
        RegisterResponse, Registration, ResetPasswordRequest, ResetTokenRequest, TokenValidity,
        VerifyEmailRequest, VerifyEmailResponse,
    },
    cloudinary::{CloudinaryService, ImageFile, UploadBatch},
    report::{REPORT_TYPES, ReportReceipt, ReportRequest, ReportService},
};

const UPLOAD_BODY_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub facilities: Arc<FacilityService>,
    pub auth: Arc<AuthService>,
    pub reports: Arc<ReportService>,
    pub images: Arc<CloudinaryService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::new();
        Self::with_images(
            config.clone(),
            CloudinaryService::new(client, &config),
        )
    }

    /// Same as [`AppState::new`] with a preconfigured image uploader.
    pub fn with_images(config: Config, images: CloudinaryService) -> Self {
        let client = reqwest::Client::new();
        let config = Arc::new(config);
        Self {
            facilities: Arc::new(FacilityService::new(client.clone(), config.clone())),
            auth: Arc::new(AuthService::new(client.clone(), &config)),
            reports: Arc::new(ReportService::new(client, &config)),
            images: Arc::new(images),
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let index = format!("{}/index.html", static_dir.trim_end_matches('/'));

    let api: Router<AppState> = Router::new()
        .route("/health", get(health))
        .route("/facilities", get(get_facilities))
        .route("/facilities/search", post(search_facilities))
        .route("/sports", get(get_sports))
        .route("/sports/suggestions", get(get_suggestions))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-reset-token", post(verify_reset_token))
        .route("/reports", post(submit_report))
        .route("/reports/types", get(report_types))
        .route("/uploads", post(upload_images))
        .fallback(api_not_found);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)))
        .with_state(state)
}

#[derive(Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn failure(err: ServiceError) -> (StatusCode, Json<ApiError>) {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}

/// Unknown API paths answer in JSON instead of falling through to the client.
async fn api_not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            message: "Ressource introuvable".to_string(),
        }),
    )
}

#[derive(Serialize, Deserialize)]
pub struct Health {
    pub mode: String,
    pub cloudinary: bool,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        mode: state.config.mode.label().to_string(),
        cloudinary: state.images.check_status().await,
    })
}

async fn get_facilities(State(state): State<AppState>) -> ApiResult<FeatureCollection> {
    let facilities = state.facilities.facilities().await.map_err(failure)?;
    Ok(Json(facilities.as_ref().clone()))
}

async fn search_facilities(
    State(state): State<AppState>,
    Json(query): Json<FacilityQuery>,
) -> ApiResult<FeatureCollection> {
    state.facilities.search(&query).await.map(Json).map_err(failure)
}

async fn get_sports(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    let sports = state.facilities.sports().await.map_err(failure)?;
    Ok(Json(sports.as_ref().clone()))
}

#[derive(Deserialize)]
struct SuggestionQuery {
    #[serde(default)]
    q: String,
}

async fn get_suggestions(
    State(state): State<AppState>,
    Query(query): Query<SuggestionQuery>,
) -> ApiResult<Vec<String>> {
    state
        .facilities
        .suggestions(&query.q)
        .await
        .map(Json)
        .map_err(failure)
}

async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> ApiResult<AuthResponse> {
    state.auth.login(&body).await.map(Json).map_err(failure)
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<Registration>,
) -> ApiResult<RegisterResponse> {
    state.auth.register(&body).await.map(Json).map_err(failure)
}

async fn verify_email(
    State(state): State<AppState>,
    Json(body): Json<VerifyEmailRequest>,
) -> ApiResult<VerifyEmailResponse> {
    state.auth.verify_email(&body).await.map(Json).map_err(failure)
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> ApiResult<MessageResponse> {
    state.auth.forgot_password(&body).await.map(Json).map_err(failure)
}

async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> ApiResult<MessageResponse> {
    state.auth.reset_password(&body).await.map(Json).map_err(failure)
}

async fn verify_reset_token(
    State(state): State<AppState>,
    Json(body): Json<ResetTokenRequest>,
) -> ApiResult<TokenValidity> {
    let valid = state.auth.verify_reset_token(&body).await.map_err(failure)?;
    Ok(Json(TokenValidity { valid }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn submit_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReportRequest>,
) -> ApiResult<ReportReceipt> {
    state
        .reports
        .submit_report(&body, bearer_token(&headers))
        .await
        .map(Json)
        .map_err(failure)
}

async fn report_types() -> Json<Vec<&'static str>> {
    Json(REPORT_TYPES.to_vec())
}

async fn upload_images(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<UploadBatch> {
    let invalid_form = |err: axum::extract::multipart::MultipartError| {
        failure(ServiceError::Validation(format!("Formulaire invalide: {err}")))
    };

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let is_image = field
            .name()
            .map(|name| name.starts_with("image"))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(invalid_form)?;
        files.push(ImageFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    tracing::info!("received {} images for upload", files.len());
    state.images.upload_images(files).await.map(Json).map_err(failure)
}
