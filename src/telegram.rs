/*!
Telegram bot that answers `/start` with a button opening the mini app
*/
use std::time::Duration;

use crate::{BotConfig, Error, Result};

// seconds telegram holds a getUpdates call open when there is nothing new
const LONG_POLL_SECONDS: u64 = 30;
const RETRY_PAUSE: Duration = Duration::from_secs(5);

const GREETING: &str = "Hi! Tap the button below to open the SoundCloud player.";
const BUTTON_TEXT: &str = "\u{1F3B5} Open SoundCloud";

#[derive(serde::Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(serde::Deserialize, Debug)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
pub struct Chat {
    pub id: i64,
}

#[derive(serde::Serialize, Debug, PartialEq)]
pub struct WebAppInfo {
    pub url: String,
}

#[derive(serde::Serialize, Debug, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub web_app: WebAppInfo,
}

#[derive(serde::Serialize, Debug, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(serde::Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(serde::Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    reply_markup: &'a InlineKeyboardMarkup,
}

/// `/start`, `/start@SomeBot` and `/start <payload>` all count
pub fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or("");
    let command = command.split('@').next().unwrap_or("");
    command == "/start"
}

pub struct Bot {
    client: surf::Client,
    // `<api base>/bot<token>`, never logged
    endpoint: String,
    webapp_url: String,
    log: slog::Logger,
}

impl Bot {
    pub fn new(config: &BotConfig, log: slog::Logger) -> Result<Self> {
        let client: surf::Client = surf::Config::new()
            .set_timeout(Some(Duration::from_secs(LONG_POLL_SECONDS + 15)))
            .try_into()
            .map_err(|e| Error::Config(format!("error building http client {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}",
                config.telegram_api_base.trim_end_matches('/'),
                config.bot_token
            ),
            webapp_url: config.webapp_url.clone(),
            log,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let mut resp = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .body(surf::Body::from_json(body)?)
            .send()
            .await?;
        let status: u16 = resp.status().into();
        let api: ApiResponse<T> = resp
            .body_json()
            .await
            .map_err(|e| Error::Http(format!("telegram {} json error {}", method, e)))?;
        match api {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(Error::Telegram {
                status,
                description: description.unwrap_or_default(),
            }),
        }
    }

    pub fn launch_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: BUTTON_TEXT.to_string(),
                web_app: WebAppInfo {
                    url: self.webapp_url.clone(),
                },
            }]],
        }
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECONDS,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    pub async fn send_launch_message(&self, chat_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text: GREETING,
                    reply_markup: &self.launch_keyboard(),
                },
            )
            .await?;
        Ok(())
    }

    /// Reply to `/start`, ignore everything else
    pub async fn handle(&self, update: &Update) -> Result<bool> {
        let message = match &update.message {
            Some(message) => message,
            None => return Ok(false),
        };
        match message.text.as_deref() {
            Some(text) if is_start_command(text) => {
                slog::info!(self.log, "start command"; "chat_id" => message.chat.id);
                self.send_launch_message(message.chat.id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fetch and handle one batch of updates, returning the next offset
    pub async fn poll_once(&self, offset: i64) -> Result<i64> {
        let mut next = offset;
        for update in self.get_updates(offset).await? {
            next = cmp_next(next, update.update_id);
            if let Err(e) = self.handle(&update).await {
                slog::warn!(self.log, "error handling update"; "update_id" => update.update_id, "error" => %e);
            }
        }
        Ok(next)
    }

    pub async fn run(&self) {
        slog::info!(self.log, "bot started");
        let mut offset = 0;
        loop {
            match self.poll_once(offset).await {
                Ok(next) => offset = next,
                Err(e) => {
                    slog::warn!(self.log, "error polling updates"; "error" => %e);
                    async_std::task::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }
}

// updates are acknowledged by asking for ids past the last one seen
fn cmp_next(current: i64, update_id: i64) -> i64 {
    std::cmp::max(current, update_id + 1)
}
