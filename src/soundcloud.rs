use surf::{StatusCode, Url};

use crate::{Config, Error, Result};

const LIKES_LIMIT: &str = "50";
const PLAYLISTS_LIMIT: &str = "50";
const SEARCH_LIMIT: &str = "30";

#[derive(serde::Deserialize, Debug)]
struct SoundCloudAccess {
    access_token: String,
}

#[derive(serde::Serialize)]
struct SoundCloudAccessParams<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    redirect_uri: &'a str,
    code: &'a str,
}

/// Client for the soundcloud REST api.
///
/// Redirects are never followed (surf only follows them when the
/// `Redirect` middleware is installed), which the stream resolve step
/// relies on to see the CDN location.
#[derive(Clone)]
pub struct SoundCloud {
    client: surf::Client,
    api_base: String,
    connect_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl SoundCloud {
    pub fn new(config: &Config) -> Result<Self> {
        let client: surf::Client = surf::Config::new()
            .set_timeout(Some(config.upstream_timeout))
            .try_into()
            .map_err(|e| Error::Config(format!("error building http client {}", e)))?;
        Ok(Self {
            client,
            api_base: config.sc_api_base.trim_end_matches('/').to_string(),
            connect_url: config.sc_connect_url.clone(),
            client_id: config.sc_client_id.clone(),
            client_secret: config.sc_client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    pub fn api_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.api_base, path))
            .map_err(|e| Error::Config(format!("invalid api url {} {}", path, e)))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// The soundcloud connect page the user is sent to. The telegram id
    /// rides along in `state` and comes back on the callback.
    pub fn authorize_url(&self, telegram_id: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.connect_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("state", telegram_id),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid connect url {}", e)))
    }

    /// Trade a single-use authorization `code` for an access token
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let params = SoundCloudAccessParams {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "authorization_code",
            redirect_uri: &self.redirect_uri,
            code,
        };
        let mut resp = self
            .client
            .post(self.api_url("/oauth2/token", &[])?)
            .header("accept", "application/json; charset=utf-8")
            .body(surf::Body::from_form(&params)?)
            .send()
            .await?;
        if resp.status() != StatusCode::Ok {
            let body = resp.body_string().await.unwrap_or_default();
            return Err(Error::TokenExchange(body));
        }
        let access: SoundCloudAccess = resp
            .body_json()
            .await
            .map_err(|e| Error::TokenExchange(format!("json parse error {}", e)))?;
        if access.access_token.is_empty() {
            return Err(Error::TokenExchange("empty access token".into()));
        }
        Ok(access.access_token)
    }

    /// Start an authenticated GET without reading the body
    pub async fn send_authed(&self, url: Url, token: &str) -> Result<surf::Response> {
        Ok(self
            .client
            .get(url)
            .header("authorization", format!("OAuth {}", token))
            .send()
            .await?)
    }

    /// Start an unauthenticated GET (pre-signed CDN links) without
    /// reading the body
    pub async fn send_plain(&self, url: Url) -> Result<surf::Response> {
        Ok(self.client.get(url).send().await?)
    }

    pub async fn get_json(
        &self,
        path: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let url = self.api_url(path, params)?;
        let mut resp = self
            .client
            .get(url)
            .header("authorization", format!("OAuth {}", token))
            .header("accept", "application/json; charset=utf-8")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status: u16 = resp.status().into();
            let body = resp.body_string().await.unwrap_or_default();
            return Err(Error::Upstream { status, body });
        }
        Ok(resp
            .body_json()
            .await
            .map_err(|e| Error::Http(format!("json parse error {}", e)))?)
    }

    pub async fn likes(&self, token: &str) -> Result<serde_json::Value> {
        self.get_json("/me/likes/tracks", token, &[("limit", LIKES_LIMIT)])
            .await
    }

    pub async fn playlists(&self, token: &str) -> Result<serde_json::Value> {
        self.get_json("/me/playlists", token, &[("limit", PLAYLISTS_LIMIT)])
            .await
    }

    pub async fn search(&self, token: &str, query: &str) -> Result<serde_json::Value> {
        self.get_json("/tracks", token, &[("q", query), ("limit", SEARCH_LIMIT)])
            .await
    }
}
