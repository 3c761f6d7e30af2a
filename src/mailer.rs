use axum::async_trait;
use tracing::info;

/// Outbound notification channel. Delivery and templating live outside this
/// service; handlers only pick a template and hand over the context (which
/// carries the token link for account mails).
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Development mailer: writes the outbound message to the log instead of
/// delivering it.
#[derive(Clone)]
pub struct LogMailer {
    pub sender: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<()> {
        info!(
            from = %self.sender,
            to = %to,
            subject = %subject,
            template = %template,
            context = %context,
            "outbound mail"
        );
        Ok(())
    }
}
