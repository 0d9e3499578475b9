/// Issue reports ("signalements") filed against a facility.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Config, ServiceError, ServiceMode,
    http::{self, ApiClient, Operation},
};

pub const SECURITY_ISSUE: &str = "Problème de sécurité";

pub const REPORT_TYPES: [&str; 5] = [
    "Équipement endommagé",
    SECURITY_ISSUE,
    "Problème de propreté",
    "Accessibilité",
    "Autre",
];

/// Facility a report refers to: database id when the mapping is known,
/// installation number otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstallationRef {
    Id(u64),
    Number(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportRequest {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Comma-separated image URLs.
    #[serde(default)]
    pub images_url: Option<String>,
    pub installation: InstallationRef,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportAuthor {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: u64,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub etat: String,
    #[serde(default)]
    pub images_url: Option<String>,
    pub installation: InstallationRef,
    #[serde(default)]
    pub utilisateur: Option<ReportAuthor>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportReceipt {
    Created(Report),
    Accepted { success: bool, message: String },
}

impl ReportReceipt {
    fn accepted() -> Self {
        ReportReceipt::Accepted {
            success: true,
            message: "Signalement envoyé avec succès".to_string(),
        }
    }
}

pub struct ReportService {
    mode: ServiceMode,
    api: ApiClient,
}

impl ReportService {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            mode: config.mode,
            api: ApiClient::new(client, &config.api_url),
        }
    }

    pub async fn submit_report(
        &self,
        report: &ReportRequest,
        token: Option<&str>,
    ) -> Result<ReportReceipt, ServiceError> {
        if report.message.trim().is_empty() {
            return Err(ServiceError::Validation("Le message est requis".to_string()));
        }

        if self.mode.is_mock() {
            return self.submit_mock(report).await;
        }

        let response = self.api.post("signalements/", report, token).await?;
        if !response.status().is_success() {
            return Err(http::error_from_response(Operation::SubmitReport, response).await);
        }
        if !http::is_json(&response) {
            return Ok(ReportReceipt::accepted());
        }

        let body: Value = response.json().await?;
        match serde_json::from_value::<Report>(body) {
            Ok(created) => {
                tracing::info!("report {} created", created.id);
                Ok(ReportReceipt::Created(created))
            }
            Err(err) => {
                tracing::debug!("report response is not a report: {}", err);
                Ok(ReportReceipt::accepted())
            }
        }
    }

    async fn submit_mock(&self, report: &ReportRequest) -> Result<ReportReceipt, ServiceError> {
        tracing::info!("mock report of type {}", report.kind);
        self.mode.simulate_latency(2).await;

        if report.kind == SECURITY_ISSUE {
            return Err(ServiceError::Upstream {
                status: 500,
                message: "Erreur lors de l'envoi du signalement de sécurité".to_string(),
            });
        }
        if report.message.contains("erreur") {
            return Err(ServiceError::BadRequest("Message invalide détecté".to_string()));
        }

        let now = chrono::Utc::now().to_rfc3339();
        Ok(ReportReceipt::Created(Report {
            id: rand::random_range(1..=1000),
            message: report.message.clone(),
            kind: report.kind.clone(),
            etat: "Nouveau".to_string(),
            images_url: report.images_url.clone(),
            installation: report.installation.clone(),
            utilisateur: Some(ReportAuthor {
                id: 1,
                username: "testuser".to_string(),
                email: Some("test@example.com".to_string()),
            }),
            created_at: Some(now.clone()),
            updated_at: Some(now),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ReportService {
        ReportService::new(reqwest::Client::new(), &Config::mock())
    }

    fn report(kind: &str, message: &str) -> ReportRequest {
        ReportRequest {
            message: message.to_string(),
            kind: kind.to_string(),
            images_url: None,
            installation: InstallationRef::Number("I130010048".to_string()),
        }
    }

    #[tokio::test]
    async fn mock_security_reports_fail() {
        let err = service()
            .submit_report(&report(SECURITY_ISSUE, "test"), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Erreur lors de l'envoi du signalement de sécurité"
        );
    }

    #[tokio::test]
    async fn mock_rejects_messages_mentioning_erreur() {
        let err = service()
            .submit_report(&report("Autre", "une erreur ici"), None)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::BadRequest("Message invalide détecté".to_string()));
    }

    #[tokio::test]
    async fn mock_creates_new_reports() {
        let receipt = service()
            .submit_report(&report("Équipement endommagé", "Filet de but déchiré"), None)
            .await
            .unwrap();
        let ReportReceipt::Created(created) = receipt else {
            panic!("expected a created report");
        };
        assert!((1..=1000).contains(&created.id));
        assert_eq!(created.etat, "Nouveau");
        assert_eq!(created.installation, InstallationRef::Number("I130010048".to_string()));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_locally() {
        let err = service().submit_report(&report("Autre", "  "), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn installation_accepts_numbers_and_codes() {
        let parsed: InstallationRef = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, InstallationRef::Id(12));
        let parsed: InstallationRef = serde_json::from_str("\"I130010048\"").unwrap();
        assert_eq!(parsed, InstallationRef::Number("I130010048".to_string()));
    }
}
