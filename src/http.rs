/// JSON request plumbing shared by the backend service wrappers.
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ServiceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    LoadData,
    Login,
    Register,
    VerifyEmail,
    ForgotPassword,
    ResetPassword,
    VerifyResetToken,
    SubmitReport,
}

impl Operation {
    fn fallback(self) -> &'static str {
        match self {
            Operation::LoadData => "Erreur de chargement des données de la carte",
            Operation::Login => "Erreur de connexion",
            Operation::Register => "Erreur lors de l'inscription",
            Operation::VerifyEmail => "Erreur de vérification",
            Operation::ForgotPassword => "Erreur lors de la demande",
            Operation::ResetPassword => "Erreur lors de la réinitialisation",
            Operation::VerifyResetToken => "Token invalide ou expiré",
            Operation::SubmitReport => "Erreur lors de l'envoi du signalement",
        }
    }

    /// Message for the statuses this endpoint is known to answer with.
    fn status_message(self, status: u16) -> Option<&'static str> {
        match (self, status) {
            (Operation::Login, 400) => Some("Email et mot de passe requis"),
            (Operation::Login, 401) => Some("Email ou mot de passe incorrect"),
            (Operation::Login, 403) => Some("Compte non vérifié. Vérifiez votre email."),
            (Operation::Login, 404) => Some("Aucun compte associé à cet email"),
            (Operation::Register, 409) => {
                Some("Ce nom d'utilisateur ou cette adresse email est déjà utilisé")
            }
            (Operation::VerifyEmail, 400) => Some("Code de vérification incorrect"),
            (Operation::VerifyEmail, 404) => Some("Aucun compte associé à cet email"),
            (Operation::VerifyEmail, 409) => Some("Cette adresse email est déjà vérifiée"),
            (Operation::ForgotPassword, 404) => Some("Aucun compte associé à cet email"),
            (Operation::ResetPassword | Operation::VerifyResetToken, 400 | 404) => {
                Some("Token invalide ou expiré")
            }
            (Operation::SubmitReport, 401) => {
                Some("Vous devez être connecté pour signaler un problème")
            }
            (Operation::SubmitReport, 403) => {
                Some("Vous n'êtes pas autorisé à signaler ce problème")
            }
            (Operation::SubmitReport, 404) => Some("Installation introuvable"),
            _ => None,
        }
    }
}

/// Maps a non-success status to the error shown to the user.
pub(crate) fn classify(operation: Operation, status: u16, server_message: Option<String>) -> ServiceError {
    let message = operation
        .status_message(status)
        .map(str::to_string)
        .or(server_message)
        .unwrap_or_else(|| operation.fallback().to_string());

    match status {
        400 => ServiceError::BadRequest(message),
        401 => ServiceError::Unauthorized(message),
        403 => ServiceError::Forbidden(message),
        404 => ServiceError::NotFound(message),
        409 => ServiceError::Conflict(message),
        status => ServiceError::Upstream { status, message },
    }
}

pub(crate) async fn error_from_response(operation: Operation, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let server_message = if is_json(&response) {
        response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| extract_message(&body))
    } else {
        let text = response.text().await.unwrap_or_default();
        let detail = if text.trim().is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            text.trim().to_string()
        };
        Some(format!("Erreur {}: {}", status.as_u16(), detail))
    };
    tracing::warn!(
        "{:?} failed with status {}: {:?}",
        operation,
        status,
        server_message
    );
    classify(operation, status.as_u16(), server_message)
}

pub(crate) fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false)
}

fn extract_message(body: &Value) -> Option<String> {
    ["detail", "message", "error"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Object(_) => value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
}

/// Thin client for the backend REST API rooted at `base_url`.
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub(crate) fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, ServiceError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    pub(crate) async fn post_json<B, R>(
        &self,
        operation: Operation,
        path: &str,
        body: &B,
    ) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.post(path, body, None).await?;
        if !response.status().is_success() {
            return Err(error_from_response(operation, response).await);
        }
        Ok(response.json::<R>().await?)
    }

    pub(crate) async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ServiceError> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(Operation::LoadData, response).await);
        }
        Ok(response.json::<R>().await?)
    }
}
