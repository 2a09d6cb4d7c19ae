use std::sync::Arc;

use screlay::crypto::Cipher;
use screlay::soundcloud::SoundCloud;
use screlay::{logging, service, store, Config};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    let config = Config::from_env()?;
    let log = logging::build_logger(&config.log.format, &config.log.level, "screlay")?;
    config.log_initialized(&log);

    let pool = store::connect(&config.db_url).await?;
    let cipher = Cipher::new(config.enc_key.as_bytes())?;
    let ctx = service::Context {
        store: Arc::new(store::SqlTokenStore::new(pool, cipher)),
        soundcloud: SoundCloud::new(&config)?,
        log: log.clone(),
        version: config.version.clone(),
    };
    let app = service::build(ctx, &config.static_dir)?;

    slog::info!(log, "running at {}", config.listen_addr());
    app.listen(config.listen_addr()).await?;
    Ok(())
}
