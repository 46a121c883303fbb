//! SMTP relay transport (lettre).
//!
//! 接続はプールされ、`SmtpMailTransport` を clone しても同じプールを共有する。

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::MailConfig;
use crate::ports::{MailError, MailTransport, OutboundMessage};

/// Reply codes that mean the account or its credentials were refused.
const AUTH_REPLY_CODES: [&str; 3] = ["530", "534", "535"];

#[derive(Clone)]
pub struct SmtpMailTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailTransport {
    /// Implicit-TLS relay to `config.smtp_host` with the configured account.
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let inner = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| MailError::Transport(format!("{}: {e}", config.smtp_host)))?
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            inner,
            host: config.smtp_host.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn mailbox(raw: &str) -> Result<Mailbox, MailError> {
    raw.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: raw.to_string(),
        reason: e.to_string(),
    })
}

fn build(message: &OutboundMessage) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(mailbox(&message.from)?)
        .to(mailbox(&message.to)?)
        .subject(message.subject.as_str());

    let built = match &message.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.text.clone()),
    };
    built.map_err(|e| MailError::Build(e.to_string()))
}

fn classify(err: lettre::transport::smtp::Error) -> MailError {
    let code = err.status().map(|c| c.to_string());
    match code {
        Some(code) if AUTH_REPLY_CODES.contains(&code.as_str()) => MailError::Auth(err.to_string()),
        _ => MailError::Transport(err.to_string()),
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let email = build(message)?;
        let response = self.inner.send(email).await.map_err(classify)?;
        debug!(
            to = %message.to,
            code = %response.code(),
            "smtp accepted message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(html: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            from: "\"Task Reminder System\" <me@example.com>".to_string(),
            to: "you@example.com".to_string(),
            subject: "🔔 Reminder: Sync (60 mins left)".to_string(),
            text: "plain".to_string(),
            html: html.map(str::to_string),
        }
    }

    #[test]
    fn builds_plain_and_alternative_messages() {
        let plain = build(&message(None)).unwrap();
        let raw = String::from_utf8(plain.formatted()).unwrap();
        assert!(raw.contains("Content-Type: text/plain"));
        assert!(raw.contains("To: you@example.com"));

        let rich = build(&message(Some("<p>rich</p>"))).unwrap();
        let raw = String::from_utf8(rich.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let mut msg = message(None);
        msg.to = "shared".to_string();
        assert!(matches!(
            build(&msg),
            Err(MailError::InvalidAddress { address, .. }) if address == "shared"
        ));
    }

    #[tokio::test]
    async fn transport_is_built_without_connecting() {
        let config = MailConfig {
            user: "me@example.com".to_string(),
            password: "secret".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            from_name: "Task Reminder System".to_string(),
        };
        let transport = SmtpMailTransport::from_config(&config).unwrap();
        assert_eq!(transport.host(), "smtp.example.com");
    }
}
