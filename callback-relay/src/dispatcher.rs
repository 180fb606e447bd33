use crate::{config::RelayConfig, notification::Notification};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{debug, info};

/// Hands a rendered notification to the outbound mail relay.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends `notification` to the configured receiver, or to `recipient_override`.
    async fn deliver(
        &self,
        notification: &Notification,
        recipient_override: Option<&Mailbox>,
    ) -> Result<(), DispatchError>;
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("error building message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("mail relay error: {0}")]
    Relay(#[from] lettre::transport::smtp::Error),
    #[error("mail relay did not respond within {0:?}")]
    TimedOut(Duration),
    #[error("mail relay refused the connection test")]
    NotReady,
}

/// Dispatcher backed by a pooled SMTP connection, shared by all requests.
pub struct SmtpDispatcher {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    receiver: Mailbox,
    timeout: Duration,
}

impl SmtpDispatcher {
    pub fn new(config: &RelayConfig) -> Result<Self, DispatchError> {
        info!(
            "Configuring mail relay {}:{} (secure: {})",
            config.host, config.port, config.secure
        );
        let mut builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).tls(
                Tls::Opportunistic(TlsParameters::new(config.host.clone())?),
            )
        };
        builder = builder
            .port(config.port)
            .timeout(Some(config.timeout))
            .authentication(vec![Mechanism::Plain, Mechanism::Login]);
        if let Some(credentials) = &config.credentials {
            builder = builder.credentials(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            sender: config.sender.clone(),
            receiver: config.receiver.clone(),
            timeout: config.timeout,
        })
    }

    /// Opens a connection to the relay and checks that it greets us.
    pub async fn probe(&self) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.timeout, self.mailer.test_connection()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(DispatchError::NotReady),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(DispatchError::TimedOut(self.timeout)),
        }
    }

    fn construct_email_message(
        &self,
        notification: &Notification,
        recipient: &Mailbox,
    ) -> Result<Message, DispatchError> {
        Ok(Message::builder()
            .from(self.sender.clone())
            .to(recipient.clone())
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(notification.html_body.clone())?)
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    async fn deliver(
        &self,
        notification: &Notification,
        recipient_override: Option<&Mailbox>,
    ) -> Result<(), DispatchError> {
        let recipient = recipient_override.unwrap_or(&self.receiver);
        let email = self.construct_email_message(notification, recipient)?;
        match tokio::time::timeout(self.timeout, self.mailer.send(email)).await {
            Ok(Ok(response)) => {
                debug!("Mail relay accepted message: {:?}", response.code());
                Ok(())
            }
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(DispatchError::TimedOut(self.timeout)),
        }
    }
}
