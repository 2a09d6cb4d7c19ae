use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required query parameter was missing or blank
    #[error("{0} is required")]
    MissingParam(&'static str),

    /// No stored token for the external id
    #[error("not authorized")]
    Unauthorized,

    /// Soundcloud answered with a non-2xx status
    #[error("soundcloud api error (status {status})")]
    Upstream { status: u16, body: String },

    /// The stream location lookup gave neither a redirect nor audio
    #[error("stream unavailable for track {0}")]
    StreamUnavailable(u64),

    /// The telegram bot api answered `ok: false`
    #[error("telegram api error (status {status}): {description}")]
    Telegram { status: u16, description: String },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn status(&self) -> tide::StatusCode {
        use tide::StatusCode;
        match self {
            Error::MissingParam(_) | Error::TokenExchange(_) => StatusCode::BadRequest,
            Error::Unauthorized => StatusCode::Unauthorized,
            Error::Upstream { status, .. } => {
                StatusCode::try_from(*status).unwrap_or(StatusCode::BadGateway)
            }
            Error::StreamUnavailable(_) => StatusCode::NotFound,
            Error::Http(_) | Error::Telegram { .. } => StatusCode::BadGateway,
            Error::Db(_) | Error::Migrate(_) | Error::Crypto(_) | Error::Config(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    /// The json body sent to the mini app for this error
    pub fn body(&self) -> serde_json::Value {
        match self {
            Error::Upstream { body, .. } => serde_json::json!({
                "error": self.to_string(),
                "details": body,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        }
    }
}

impl From<surf::Error> for Error {
    fn from(e: surf::Error) -> Self {
        Error::Http(e.to_string())
    }
}
