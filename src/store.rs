use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::crypto::{Cipher, Enc};
use crate::{models, Result};

/// Per-user soundcloud credentials keyed by telegram id.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, telegram_id: &str) -> Result<Option<String>>;

    /// Insert or replace the token for `telegram_id`
    async fn put(&self, telegram_id: &str, access_token: &str) -> Result<()>;
}

/// Open the pool for `db_url`, creating the database file if needed,
/// and apply the embedded migrations.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let mut pool_opts = SqlitePoolOptions::new().max_connections(5);
    if db_url.contains(":memory:") {
        // every connection to an in-memory database is its own database,
        // so pin a single connection for the lifetime of the pool
        pool_opts = pool_opts
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>);
    }
    let pool = pool_opts.connect_with(opts).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct SqlTokenStore {
    pool: SqlitePool,
    cipher: Cipher,
}

impl SqlTokenStore {
    pub fn new(pool: SqlitePool, cipher: Cipher) -> Self {
        Self { pool, cipher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TokenStore for SqlTokenStore {
    async fn get(&self, telegram_id: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, models::UserCredential>(
            "select * from users where telegram_id = ?",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(user) => self
                .cipher
                .decrypt(&Enc {
                    value: user.access_token,
                    nonce: user.access_nonce,
                })
                .map(Some),
        }
    }

    async fn put(&self, telegram_id: &str, access_token: &str) -> Result<()> {
        let enc = self.cipher.encrypt(access_token)?;
        let now = chrono::Utc::now();
        sqlx::query(
            "
            insert into
            users (telegram_id, access_token, access_nonce, created, modified)
            values (?, ?, ?, ?, ?)
            on conflict (telegram_id) do update set
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            modified = excluded.modified
            ",
        )
        .bind(telegram_id)
        .bind(&enc.value)
        .bind(&enc.nonce)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> SqlTokenStore {
    let pool = connect("sqlite::memory:").await.unwrap();
    let cipher = Cipher::new(b"01234567890123456789012345678901").unwrap();
    SqlTokenStore::new(pool, cipher)
}
