use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use sportmap::{
    Config, FacilityService, ServiceError, ServiceMode,
    auth::{AuthService, Credentials, ResetTokenRequest},
    cloudinary::{CloudinaryService, ImageFile},
    report::{InstallationRef, ReportReceipt, ReportRequest, ReportService},
};

async fn geojson() -> Json<Value> {
    Json(json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [5.39, 43.27]},
                "properties": {"id": "I130010048", "name": "Stade", "sports": "['Football', 'Rugby']"}
            },
            {
                "type": "Feature",
                "id": "I750050012",
                "geometry": {"type": "Point", "coordinates": [2.35, 48.85]},
                "properties": {"name": "Piscine", "sports": ["Natation"]}
            },
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [4.83, 45.76]},
                "properties": {"gid": 77, "name": "Gymnase"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [1.44, 43.6]},
                "properties": {"name": "Sans identifiant"}
            },
            {
                "type": "Feature",
                "geometry": null,
                "properties": {"id": "I999999999", "name": "Sans position"}
            }
        ]
    }))
}

async fn sports() -> Json<Value> {
    Json(json!([{"name": "Football"}, "Natation", {"nom": "Rugby"}]))
}

async fn installations() -> Json<Value> {
    Json(json!([{"id": 12, "inst_numero": "I130010048"}]))
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["email"] == "ok@test.com" {
        return Json(json!({
            "token": "live-token",
            "user": {"id": 3, "username": "ok", "email": "ok@test.com", "verified": true}
        }))
        .into_response();
    }
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid credentials"}))).into_response()
}

async fn verify_reset_token(Json(body): Json<Value>) -> Response {
    if body["token"] == "fresh" {
        return Json(json!({"valid": true})).into_response();
    }
    (StatusCode::BAD_REQUEST, Json(json!({"detail": "expired"}))).into_response()
}

async fn signalements(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some("Bearer live-token");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "no token"}))).into_response();
    }
    if body["message"] == "boom" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database down").into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": 41,
            "message": body["message"],
            "type": body["type"],
            "etat": "Nouveau",
            "installation": body["installation"]
        })),
    )
        .into_response()
}

async fn cloud_upload() -> Json<Value> {
    Json(json!({
        "secure_url": "https://res.example/demo/image/upload/sportmap/reports/abc.jpg",
        "public_id": "sportmap/reports/abc",
        "width": 800,
        "height": 600,
        "format": "jpg",
        "bytes": 4
    }))
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/api/geojson/", get(geojson))
        .route("/api/sports/", get(sports))
        .route("/api/installations/", get(installations))
        .route("/api/auth/login/", post(login))
        .route("/api/auth/verify-reset-token/", post(verify_reset_token))
        .route("/api/signalements/", post(signalements))
        .route("/cloud/demo/image/upload", post(cloud_upload));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

fn live_config(base: &str) -> Config {
    Config {
        mode: ServiceMode::Live,
        api_url: format!("{base}/api/"),
        id_mapping: true,
        ..Config::mock()
    }
}

#[tokio::test]
async fn loads_and_normalizes_backend_facilities() {
    let base = spawn_backend().await;
    let service = FacilityService::new(reqwest::Client::new(), Arc::new(live_config(&base)));

    let facilities = service.facilities().await.unwrap();
    let ids: Vec<&str> = facilities
        .features
        .iter()
        .filter_map(|feature| feature.facility_id())
        .collect();
    assert_eq!(ids, vec!["I130010048", "I750050012", "77"]);

    let stadium = facilities.find("I130010048").unwrap();
    assert_eq!(stadium.properties.db_id, Some(12));
    assert_eq!(stadium.properties.sports.names(), vec!["Football", "Rugby"]);

    let sports = service.sports().await.unwrap();
    assert_eq!(sports.as_ref(), &vec!["Football", "Natation", "Rugby"]);
}

#[tokio::test]
async fn unreachable_backend_reports_a_network_error() {
    let config = live_config("http://127.0.0.1:9");
    let service = FacilityService::new(reqwest::Client::new(), Arc::new(config));
    let err = service.facilities().await.unwrap_err();
    assert!(matches!(err, ServiceError::Network(_)));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn live_login_classifies_rejections() {
    let base = spawn_backend().await;
    let auth = AuthService::new(reqwest::Client::new(), &live_config(&base));

    let session = auth
        .login(&Credentials {
            email: "ok@test.com".to_string(),
            password: "secret".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(session.token, "live-token");
    assert_eq!(session.user.username, "ok");

    let err = auth
        .login(&Credentials {
            email: "nobody@test.com".to_string(),
            password: "secret".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Unauthorized("Email ou mot de passe incorrect".to_string())
    );
}

#[tokio::test]
async fn live_reset_token_check_treats_rejections_as_invalid() {
    let base = spawn_backend().await;
    let auth = AuthService::new(reqwest::Client::new(), &live_config(&base));

    let fresh = ResetTokenRequest {
        token: "fresh".to_string(),
    };
    assert!(auth.verify_reset_token(&fresh).await.unwrap());

    let expired = ResetTokenRequest {
        token: "expired".to_string(),
    };
    assert!(!auth.verify_reset_token(&expired).await.unwrap());
}

fn report(message: &str) -> ReportRequest {
    ReportRequest {
        message: message.to_string(),
        kind: "Autre".to_string(),
        images_url: None,
        installation: InstallationRef::Id(12),
    }
}

#[tokio::test]
async fn live_reports_forward_the_bearer_token() {
    let base = spawn_backend().await;
    let reports = ReportService::new(reqwest::Client::new(), &live_config(&base));

    let receipt = reports
        .submit_report(&report("Filet arraché"), Some("live-token"))
        .await
        .unwrap();
    let ReportReceipt::Created(created) = receipt else {
        panic!("expected a created report");
    };
    assert_eq!(created.id, 41);
    assert_eq!(created.installation, InstallationRef::Id(12));

    let err = reports
        .submit_report(&report("Filet arraché"), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Unauthorized("Vous devez être connecté pour signaler un problème".to_string())
    );
}

#[tokio::test]
async fn live_report_server_errors_keep_the_body_text() {
    let base = spawn_backend().await;
    let reports = ReportService::new(reqwest::Client::new(), &live_config(&base));

    let err = reports
        .submit_report(&report("boom"), Some("live-token"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Upstream {
            status: 500,
            message: "Erreur 500: database down".to_string(),
        }
    );
}

#[tokio::test]
async fn live_upload_posts_to_cloudinary() {
    let base = spawn_backend().await;
    let images = CloudinaryService::new(reqwest::Client::new(), &live_config(&base))
        .with_endpoints(&format!("{base}/cloud"), "https://res.example")
        .with_stagger(Duration::ZERO);

    let batch = images
        .upload_images(vec![ImageFile {
            file_name: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![1, 2, 3, 4],
        }])
        .await
        .unwrap();
    assert_eq!(batch.uploaded.len(), 1);
    assert_eq!(batch.uploaded[0].public_id, "sportmap/reports/abc");
    assert_eq!(
        batch.uploaded[0].thumbnail_url,
        "https://res.example/demo/image/upload/f_auto,q_auto,w_200,h_150,c_fill,q_auto:low/sportmap/reports/abc"
    );
    assert_eq!(
        batch.images_url().as_deref(),
        Some("https://res.example/demo/image/upload/sportmap/reports/abc.jpg")
    );
}
