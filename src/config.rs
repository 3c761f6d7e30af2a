use serde::Deserialize;

/// Secret and lifetime settings for signed tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret_key: String,
    pub ttl_secs: i64,
    pub session_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub token: TokenConfig,
    pub mail_sender: String,
    pub mail_subject_prefix: String,
    pub admin_email: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let token = TokenConfig {
            secret_key: std::env::var("SECRET_KEY")?,
            ttl_secs: std::env::var("TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(3600),
            session_ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(3600 * 24),
        };
        let mail_sender = std::env::var("PURPLE_MAIL_SENDER")
            .unwrap_or_else(|_| "Purple Admin <purple@example.com>".into());
        let mail_subject_prefix =
            std::env::var("PURPLE_MAIL_SUBJECT_PREFIX").unwrap_or_else(|_| "[Purple]".into());
        let admin_email = std::env::var("PURPLE_ADMIN")
            .ok()
            .map(|v| v.trim().to_lowercase());
        Ok(Self {
            database_url,
            token,
            mail_sender,
            mail_subject_prefix,
            admin_email,
        })
    }
}
