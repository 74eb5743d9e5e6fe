//! Mail Transport - Sessions bound to a sender's SMTP credentials

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailcast_storage::models::{Campaign, Recipient, Sender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Implicit-TLS submission port; other secure ports negotiate STARTTLS
const SMTPS_PORT: u16 = 465;

/// One rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl OutgoingEmail {
    pub fn new(sender: &Sender, campaign: &Campaign, recipient: &Recipient) -> Self {
        Self {
            from: sender.mailbox(),
            to: recipient.email.clone(),
            subject: campaign.subject.clone(),
            html_body: campaign.content.clone(),
        }
    }
}

/// Per-recipient delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure to open a session for a sender
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid sender configuration: {0}")]
    InvalidSender(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),
}

/// Opens sessions for senders
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, sender: &Sender) -> Result<Arc<dyn TransportSession>, SessionError>;
}

/// A session able to deliver messages on behalf of one sender
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;

    async fn close(&self) {}
}

/// SMTP transport built on lettre
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn mailer(&self, sender: &Sender) -> Result<AsyncSmtpTransport<Tokio1Executor>, SessionError> {
        let port = u16::try_from(sender.port)
            .map_err(|_| SessionError::InvalidSender(format!("invalid port {}", sender.port)))?;

        let mut transport = if !sender.secure {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&sender.host)
        } else if port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&sender.host)
                .map_err(|e| SessionError::Connection(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&sender.host)
                .map_err(|e| SessionError::Connection(e.to_string()))?
        }
        .port(port);

        if let (Some(username), Some(password)) = (&sender.username, &sender.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(transport.timeout(Some(self.timeout)).build())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn connect(&self, sender: &Sender) -> Result<Arc<dyn TransportSession>, SessionError> {
        let from: Mailbox = sender
            .mailbox()
            .parse()
            .map_err(|e| SessionError::InvalidSender(format!("from address: {}", e)))?;
        let mailer = self.mailer(sender)?;

        match mailer.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(SessionError::Connection(format!(
                    "{}:{} did not accept the connection",
                    sender.host, sender.port
                )))
            }
            Err(e) if e.is_permanent() => return Err(SessionError::Authentication(e.to_string())),
            Err(e) => return Err(SessionError::Connection(e.to_string())),
        }

        debug!(sender_id = %sender.id, host = %sender.host, "SMTP session ready");

        Ok(Arc::new(SmtpSession {
            mailer,
            from,
            timeout: self.timeout,
        }))
    }
}

struct SmtpSession {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

#[async_trait]
impl TransportSession for SmtpSession {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {}", email.to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| DeliveryError::Transport(format!("failed to build message: {}", e)))?;

        match self.mailer.send(message).await {
            Ok(response) => {
                debug!(to = %email.to, code = %response.code(), "Message accepted");
                Ok(())
            }
            Err(e) if e.is_timeout() => Err(DeliveryError::Timeout(self.timeout)),
            Err(e) if e.is_permanent() => Err(DeliveryError::Rejected(e.to_string())),
            Err(e) => Err(DeliveryError::Transport(e.to_string())),
        }
    }
}
