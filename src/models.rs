#[derive(sqlx::FromRow, Debug)]
pub struct UserCredential {
    // the telegram user id the mini app was opened by. Supplied by
    // the caller and only ever used as an opaque lookup key.
    pub telegram_id: String,
    // a soundcloud access token, AES_256_GCM encrypted using the
    // application key set in the current environment and the
    // `access_nonce` generated when the value was encrypted.
    pub access_token: String,
    pub access_nonce: String,
    pub created: chrono::DateTime<chrono::Utc>,
    pub modified: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackSummary {
    // passed through as soundcloud sent it, `null` when absent
    pub id: serde_json::Value,
    pub title: String,
    pub artist: String,
    #[serde(rename = "duration")]
    pub duration_ms: serde_json::Number,
    #[serde(rename = "artwork")]
    pub artwork_url: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaylistSummary {
    pub id: serde_json::Value,
    pub title: String,
    pub track_count: u64,
    #[serde(rename = "artwork")]
    pub artwork_url: String,
    pub tracks: Vec<TrackSummary>,
}
