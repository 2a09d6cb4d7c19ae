/*!
Logging setup and request logging middleware
*/
use slog::{o, Drain};
use std::time::Instant;

/// Build the root logger that every component branches off of.
///
/// `format` is either `"pretty"` (compact terminal output) or anything
/// else for json lines on stderr.
pub fn build_logger(format: &str, level: &str, app: &'static str) -> anyhow::Result<slog::Logger> {
    let level: slog::Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level {:?}", level))?;
    let log = if format == "pretty" {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog::Logger::root(drain, o!("app" => app))
    } else {
        let drain = slog_json::Json::default(std::io::stderr()).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog::Logger::root(drain, o!("app" => app))
    };
    Ok(log)
}

/// A logger that drops everything, used by tests.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

/// Logs one line per request. Only the path is logged, never the
/// query string.
pub struct LogMiddleware {
    log: slog::Logger,
}

impl LogMiddleware {
    pub fn new(log: slog::Logger) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let log = self.log.new(o!("request_id" => request_id));
        slog::debug!(log, "request started"; "method" => &method, "path" => &path);

        let res = next.run(req).await;

        let status: u16 = res.status().into();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if let Some(err) = res.error() {
            slog::warn!(
                log, "request failed";
                "method" => &method,
                "path" => &path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
                "error" => %err,
            );
        } else {
            slog::info!(
                log, "request";
                "method" => &method,
                "path" => &path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(res)
    }
}
