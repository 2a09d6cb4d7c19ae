use std::path::Path;
use std::sync::Arc;

use crate::soundcloud::SoundCloud;
use crate::store::TokenStore;
use crate::{relay, simplify, Error, Result};

macro_rules! resp {
    (json => $body:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$body)?)
            .build()
    }};
    (status => $status:expr, text => $text:expr) => {{
        tide::Response::builder($status)
            .body($text)
            .content_type(tide::http::mime::PLAIN)
            .build()
    }};
}

#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn TokenStore>,
    pub soundcloud: SoundCloud,
    pub log: slog::Logger,
    pub version: String,
}

/// Build the http front. `static_dir` holds the mini app's `index.html`
/// and is skipped with a warning when missing.
pub fn build(ctx: Context, static_dir: &str) -> std::io::Result<tide::Server<Context>> {
    let log = ctx.log.clone();
    let mut app = tide::with_state(ctx);
    app.with(crate::logging::LogMiddleware::new(log.clone()));
    app.with(tide::security::CorsMiddleware::new());
    app.with(tide::utils::After(|mut res: tide::Response| async move {
        let mapped = res.downcast_error::<Error>().map(|e| (e.status(), e.body()));
        if let Some((status, body)) = mapped {
            res.set_status(status);
            res.set_body(body);
        }
        Ok(res)
    }));

    let index = Path::new(static_dir).join("index.html");
    if index.is_file() {
        app.at("/").serve_file(&index)?;
        app.at("/static").serve_dir(static_dir)?;
    } else {
        slog::warn!(log, "no frontend found, not serving /"; "static_dir" => static_dir);
    }
    app.at("/status").get(status);
    app.at("/auth").get(auth);
    app.at("/callback").get(callback);
    app.at("/api/check").get(check);
    app.at("/api/likes").get(likes);
    app.at("/api/playlists").get(playlists);
    app.at("/api/search").get(search);
    app.at("/stream/:track_id").get(stream);
    Ok(app)
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().version,
    }))
}

#[derive(serde::Deserialize)]
struct UserParams {
    telegram_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct SearchParams {
    telegram_id: Option<String>,
    q: Option<String>,
}

#[derive(serde::Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(Error::MissingParam(name))
}

/// Look up the stored token for the caller. A missing id and an
/// unknown id are both unauthorized, and nothing is sent upstream.
async fn token_for(ctx: &Context, telegram_id: Option<String>) -> Result<String> {
    let telegram_id = required(telegram_id, "telegram_id").map_err(|_| Error::Unauthorized)?;
    match ctx.store.get(&telegram_id).await? {
        Some(token) => Ok(token),
        None => {
            slog::debug!(ctx.log, "no stored token"; "telegram_id" => &telegram_id);
            Err(Error::Unauthorized)
        }
    }
}

/// The mini app opens this with the user's telegram id, we send them
/// on to soundcloud to grant access. The id comes back to `/callback`
/// as the oauth `state`.
async fn auth(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: UserParams = req.query()?;
    let telegram_id = required(params.telegram_id, "telegram_id")?;
    let url = ctx.soundcloud.authorize_url(&telegram_id)?;
    slog::info!(ctx.log, "redirecting to soundcloud connect"; "telegram_id" => &telegram_id);
    Ok(tide::Redirect::new(url.as_str()).into())
}

const AUTHORIZED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body style="display:flex;align-items:center;justify-content:center;height:100vh;
             font-family:sans-serif;background:#1a1a2e;color:#fff;">
    <div style="text-align:center;">
        <h2>&#9989; Authorized!</h2>
        <p>Go back to Telegram and open the Mini App again.</p>
    </div>
</body>
</html>
"#;

/// Soundcloud sends the user back here with a single-use `code` and the
/// `state` we handed out in `/auth`. The code is traded for an access
/// token which replaces whatever was stored for that telegram id.
async fn callback(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: CallbackParams = req.query()?;
    let (code, telegram_id) = match (
        required(params.code, "code"),
        required(params.state, "state"),
    ) {
        (Ok(code), Ok(telegram_id)) => (code, telegram_id),
        _ => {
            return Ok(resp!(
                status => 400,
                text => "Authorization failed: missing code or state"
            ))
        }
    };

    let token = match ctx.soundcloud.exchange_code(&code).await {
        Ok(token) => token,
        Err(e) => {
            slog::warn!(ctx.log, "token exchange failed"; "telegram_id" => &telegram_id, "error" => %e);
            return Ok(resp!(
                status => 400,
                text => format!("Could not get an access token: {}", e)
            ));
        }
    };
    ctx.store.put(&telegram_id, &token).await?;
    slog::info!(ctx.log, "stored soundcloud token"; "telegram_id" => &telegram_id);

    Ok(tide::Response::builder(200)
        .body(AUTHORIZED_PAGE)
        .content_type(tide::http::mime::HTML)
        .build())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CheckResponse {
    authorized: bool,
}

async fn check(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: UserParams = req.query()?;
    let telegram_id = required(params.telegram_id, "telegram_id")?;
    let authorized = ctx.store.get(&telegram_id).await?.is_some();
    Ok(resp!(json => CheckResponse { authorized }))
}

async fn likes(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: UserParams = req.query()?;
    let token = token_for(ctx, params.telegram_id).await?;
    let raw = ctx.soundcloud.likes(&token).await?;
    Ok(resp!(json => simplify::simplify_tracks(raw)))
}

async fn playlists(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: UserParams = req.query()?;
    let token = token_for(ctx, params.telegram_id).await?;
    let raw = ctx.soundcloud.playlists(&token).await?;
    Ok(resp!(json => simplify::simplify_playlists(raw)))
}

async fn search(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: SearchParams = req.query()?;
    let token = token_for(ctx, params.telegram_id).await?;
    let query = params.q.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Ok(resp!(json => Vec::<crate::models::TrackSummary>::new()));
    }
    let raw = ctx.soundcloud.search(&token, query).await?;
    Ok(resp!(json => simplify::simplify_tracks(raw)))
}

/// Relay the audio for a track so the mini app can play it without
/// reaching soundcloud itself.
async fn stream(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let track_id: u64 = match req.param("track_id")?.parse() {
        Ok(id) => id,
        Err(_) => return Ok(tide::Response::new(404)),
    };
    let params: UserParams = req.query()?;
    let token = token_for(ctx, params.telegram_id).await?;
    let target = relay::resolve(&ctx.soundcloud, &token, track_id, &ctx.log).await?;
    let source = relay::open(&ctx.soundcloud, target, track_id, &ctx.log).await?;
    Ok(relay::into_response(source, track_id, &ctx.log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tide::http::{Method, Request, Response, Url};
    use tide::listener::Listener;

    const AUDIO_LEN: usize = relay::CHUNK_SIZE * 2 + 123;

    fn audio() -> Vec<u8> {
        (0..AUDIO_LEN).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[derive(Clone, Default)]
    struct Upstream {
        hits: Arc<AtomicUsize>,
        cdn_hits: Arc<AtomicUsize>,
    }

    impl Upstream {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
        fn cdn_hits(&self) -> usize {
            self.cdn_hits.load(Ordering::SeqCst)
        }
    }

    fn authorized(req: &tide::Request<Upstream>) -> bool {
        req.header("authorization")
            .map(|v| v.as_str() == "OAuth tok-1")
            .unwrap_or(false)
    }

    #[derive(serde::Deserialize)]
    struct TokenForm {
        code: String,
        grant_type: String,
        client_secret: String,
    }

    async fn token(mut req: tide::Request<Upstream>) -> tide::Result {
        let form: TokenForm = req.body_form().await?;
        if form.code == "good"
            && form.grant_type == "authorization_code"
            && form.client_secret == "client-secret"
        {
            Ok(tide::Response::builder(200)
                .body(serde_json::json!({"access_token": "tok-1", "scope": "*"}))
                .build())
        } else {
            Ok(tide::Response::builder(401)
                .body("invalid_grant")
                .build())
        }
    }

    async fn upstream_likes(req: tide::Request<Upstream>) -> tide::Result {
        if !authorized(&req) {
            return Ok(tide::Response::builder(403).body("forbidden").build());
        }
        Ok(tide::Response::builder(200)
            .body(serde_json::json!({
                "collection": [
                    {"id": 1, "title": "One", "user": {"username": "A"}, "duration": 1000},
                    "garbage",
                    {"id": 2}
                ],
                "next_href": null
            }))
            .build())
    }

    async fn upstream_playlists(req: tide::Request<Upstream>) -> tide::Result {
        if !authorized(&req) {
            return Ok(tide::Response::builder(403).body("forbidden").build());
        }
        Ok(tide::Response::builder(200)
            .body(serde_json::json!([
                {"id": 9, "title": "Mix", "track_count": 2, "tracks": [{"id": 1}, {"id": 2}]}
            ]))
            .build())
    }

    #[derive(serde::Deserialize)]
    struct SearchQuery {
        q: String,
        limit: String,
    }

    async fn upstream_search(req: tide::Request<Upstream>) -> tide::Result {
        let query: SearchQuery = req.query()?;
        Ok(tide::Response::builder(200)
            .body(serde_json::json!([{"id": 5, "title": query.q, "limit": query.limit}]))
            .build())
    }

    async fn upstream_stream(req: tide::Request<Upstream>) -> tide::Result {
        if !authorized(&req) {
            return Ok(tide::Response::new(401));
        }
        let res = match req.param("id")? {
            "1" => {
                let cdn = req.url().join("/cdn/1.mp3")?;
                tide::Response::builder(302)
                    .header("location", cdn.as_str())
                    .build()
            }
            "2" => {
                let mut res = tide::Response::new(200);
                res.set_body(audio());
                res.insert_header("content-type", "audio/mpeg");
                res
            }
            "4" => tide::Response::builder(200)
                .body(serde_json::json!({"errors": []}))
                .build(),
            "5" => tide::Response::builder(302)
                .header("location", "/cdn/missing.mp3")
                .build(),
            _ => tide::Response::new(500),
        };
        Ok(res)
    }

    async fn cdn(req: tide::Request<Upstream>) -> tide::Result {
        req.state().cdn_hits.fetch_add(1, Ordering::SeqCst);
        if req.header("authorization").is_some() {
            return Ok(tide::Response::new(400));
        }
        let mut res = tide::Response::new(200);
        res.set_body(audio());
        res.insert_header("content-type", "audio/ogg");
        Ok(res)
    }

    async fn cdn_missing(req: tide::Request<Upstream>) -> tide::Result {
        req.state().cdn_hits.fetch_add(1, Ordering::SeqCst);
        Ok(tide::Response::new(403))
    }

    /// A fake soundcloud listening on an ephemeral port
    async fn upstream() -> (String, Upstream) {
        let state = Upstream::default();
        let mut app = tide::with_state(state.clone());
        app.with(tide::utils::Before(|req: tide::Request<Upstream>| async move {
            req.state().hits.fetch_add(1, Ordering::SeqCst);
            req
        }));
        app.at("/oauth2/token").post(token);
        app.at("/me/likes/tracks").get(upstream_likes);
        app.at("/me/playlists").get(upstream_playlists);
        app.at("/tracks").get(upstream_search);
        app.at("/tracks/:id/stream").get(upstream_stream);
        app.at("/cdn/1.mp3").get(cdn);
        app.at("/cdn/missing.mp3").get(cdn_missing);
        let mut listener = app.bind("127.0.0.1:0").await.unwrap();
        let mut base = listener.info()[0].connection().to_string();
        if !base.starts_with("http") {
            base = format!("http://{}", base);
        }
        async_std::task::spawn(async move { listener.accept().await });
        (base, state)
    }

    async fn setup() -> (tide::Server<Context>, Upstream, crate::store::SqlTokenStore) {
        let (base, state) = upstream().await;
        let config = crate::Config::for_tests(&base);
        let store = crate::store::memory_store().await;
        let ctx = Context {
            store: Arc::new(store.clone()),
            soundcloud: SoundCloud::new(&config).unwrap(),
            log: crate::logging::discard(),
            version: config.version.clone(),
        };
        let app = build(ctx, "does-not-exist").unwrap();
        (app, state, store)
    }

    async fn get(app: &tide::Server<Context>, path_and_query: &str) -> Response {
        let url = Url::parse(&format!("http://localhost{}", path_and_query)).unwrap();
        app.respond(Request::new(Method::Get, url)).await.unwrap()
    }

    #[async_std::test]
    async fn auth_redirects_with_state() {
        let (app, state, _) = setup().await;
        let res = get(&app, "/auth?telegram_id=42").await;
        assert_eq!(res.status(), 302);
        let location = Url::parse(res.header("location").unwrap().as_str()).unwrap();
        assert!(location
            .query_pairs()
            .any(|(k, v)| k == "state" && v == "42"));
        assert_eq!(state.hits(), 0);

        let res = get(&app, "/auth").await;
        assert_eq!(res.status(), 400);
    }

    #[async_std::test]
    async fn check_flips_after_callback() {
        let (app, _, _) = setup().await;
        let mut res = get(&app, "/api/check?telegram_id=42").await;
        assert_eq!(res.status(), 200);
        let body: CheckResponse = res.body_json().await.unwrap();
        assert!(!body.authorized);

        let mut res = get(&app, "/callback?code=good&state=42").await;
        assert_eq!(res.status(), 200);
        assert!(res.body_string().await.unwrap().contains("Authorized"));

        let mut res = get(&app, "/api/check?telegram_id=42").await;
        let body: CheckResponse = res.body_json().await.unwrap();
        assert!(body.authorized);

        let res = get(&app, "/api/check").await;
        assert_eq!(res.status(), 400);
    }

    #[async_std::test]
    async fn callback_failures_are_400() {
        let (app, state, store) = setup().await;
        let res = get(&app, "/callback?code=good").await;
        assert_eq!(res.status(), 400);
        assert_eq!(state.hits(), 0);

        let mut res = get(&app, "/callback?code=bad&state=42").await;
        assert_eq!(res.status(), 400);
        assert!(res.body_string().await.unwrap().contains("invalid_grant"));
        assert_eq!(store.get("42").await.unwrap(), None);
    }

    #[async_std::test]
    async fn unknown_user_is_401_without_upstream_call() {
        let (app, state, _) = setup().await;
        for path in &[
            "/api/likes?telegram_id=nobody",
            "/api/playlists?telegram_id=nobody",
            "/api/search?telegram_id=nobody&q=x",
            "/api/likes",
            "/stream/1?telegram_id=nobody",
        ] {
            let mut res = get(&app, path).await;
            assert_eq!(res.status(), 401, "{}", path);
            let body: serde_json::Value = res.body_json().await.unwrap();
            assert_eq!(body["error"], "not authorized");
        }
        assert_eq!(state.hits(), 0);
    }

    #[async_std::test]
    async fn likes_are_simplified() {
        let (app, _, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        let mut res = get(&app, "/api/likes?telegram_id=42").await;
        assert_eq!(res.status(), 200);
        let body: serde_json::Value = res.body_json().await.unwrap();
        assert_eq!(
            body,
            serde_json::json!([
                {"id": 1, "title": "One", "artist": "A", "duration": 1000, "artwork": ""},
                {"id": 2, "title": "Untitled", "artist": "Unknown", "duration": 0, "artwork": ""}
            ])
        );
    }

    #[async_std::test]
    async fn upstream_errors_pass_through() {
        let (app, _, store) = setup().await;
        store.put("42", "tok-expired").await.unwrap();
        let mut res = get(&app, "/api/likes?telegram_id=42").await;
        assert_eq!(res.status(), 403);
        let body: serde_json::Value = res.body_json().await.unwrap();
        assert_eq!(body["details"], "forbidden");

        let res = get(&app, "/api/playlists?telegram_id=42").await;
        assert_eq!(res.status(), 403);
    }

    #[async_std::test]
    async fn playlists_are_simplified() {
        let (app, _, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        let mut res = get(&app, "/api/playlists?telegram_id=42").await;
        let body: Vec<crate::models::PlaylistSummary> = res.body_json().await.unwrap();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].title, "Mix");
        assert_eq!(body[0].track_count, 2);
        assert_eq!(body[0].tracks.len(), 2);
    }

    #[async_std::test]
    async fn search_blank_query_is_empty() {
        let (app, state, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        let mut res = get(&app, "/api/search?telegram_id=42&q=%20%20").await;
        assert_eq!(res.status(), 200);
        let body: Vec<crate::models::TrackSummary> = res.body_json().await.unwrap();
        assert!(body.is_empty());
        assert_eq!(state.hits(), 0);

        let mut res = get(&app, "/api/search?telegram_id=42&q=lo%20fi").await;
        let body: Vec<crate::models::TrackSummary> = res.body_json().await.unwrap();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].title, "lo fi");
    }

    #[async_std::test]
    async fn stream_follows_redirect_to_cdn() {
        let (app, state, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        let mut res = get(&app, "/stream/1?telegram_id=42").await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.header("content-type").unwrap().as_str(), "audio/ogg");
        assert_eq!(res.len(), Some(AUDIO_LEN));
        assert_eq!(res.body_bytes().await.unwrap(), audio());
        assert_eq!(state.cdn_hits(), 1);
        assert_eq!(state.hits(), 2);
    }

    #[async_std::test]
    async fn stream_inline_audio_uses_same_response() {
        let (app, state, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        let mut res = get(&app, "/stream/2?telegram_id=42").await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.header("content-type").unwrap().as_str(), "audio/mpeg");
        assert_eq!(res.body_bytes().await.unwrap(), audio());
        assert_eq!(state.hits(), 1);
        assert_eq!(state.cdn_hits(), 0);
    }

    #[async_std::test]
    async fn stream_failures_are_404() {
        let (app, _, store) = setup().await;
        store.put("42", "tok-1").await.unwrap();
        // upstream 500
        let mut res = get(&app, "/stream/3?telegram_id=42").await;
        assert_eq!(res.status(), 404);
        let body: serde_json::Value = res.body_json().await.unwrap();
        assert_eq!(body["error"], "stream unavailable for track 3");
        // 200 but not audio
        let res = get(&app, "/stream/4?telegram_id=42").await;
        assert_eq!(res.status(), 404);
        // cdn refuses the pre-signed link
        let res = get(&app, "/stream/5?telegram_id=42").await;
        assert_eq!(res.status(), 404);
        // not a track id
        let res = get(&app, "/stream/abc?telegram_id=42").await;
        assert_eq!(res.status(), 404);
    }

    #[async_std::test]
    async fn status_reports_version() {
        let (app, _, _) = setup().await;
        let mut res = get(&app, "/status").await;
        let body: serde_json::Value = res.body_json().await.unwrap();
        assert_eq!(body, serde_json::json!({"ok": "ok", "version": "test"}));
    }
}
