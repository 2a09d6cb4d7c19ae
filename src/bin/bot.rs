use screlay::config::LogSettings;
use screlay::telegram::Bot;
use screlay::{logging, BotConfig};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = LogSettings::from_env();
    let log = logging::build_logger(&settings.format, &settings.level, "screlay-bot")?;
    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // nothing to do without a token and a mini app to point at
            slog::error!(log, "bot not started"; "error" => %e);
            return Ok(());
        }
    };
    let bot = Bot::new(&config, log)?;
    bot.run().await;
    Ok(())
}
