use thiserror::Error;

/// Failure of a backend, auth, report or upload call, carrying the message
/// shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    /// Rejected locally, before any request was sent.
    #[error("{0}")]
    Validation(String),
    #[error("Erreur réseau: {0}")]
    Network(String),
    #[error("Réponse invalide: {0}")]
    Decode(String),
    #[error("{0}")]
    Upload(String),
}

impl ServiceError {
    /// HTTP status the API layer answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) | ServiceError::Validation(_) => 400,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Upstream { status, .. } if (400..500).contains(status) => *status,
            ServiceError::Upstream { .. }
            | ServiceError::Network(_)
            | ServiceError::Decode(_)
            | ServiceError::Upload(_) => 502,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("SPORTMAP_API_URL is required in live mode")]
    MissingApiUrl,
    #[error("Configuration Cloudinary manquante: {}", .0.join(", "))]
    MissingCloudinary(Vec<&'static str>),
}
