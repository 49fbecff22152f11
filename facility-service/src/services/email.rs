use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::ServiceError;
use crate::config::SmtpConfig;

/// Mail collaborator. Messages are plain text.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_activation_code(
        &self,
        to_email: &str,
        login: &str,
        activation_link: &str,
    ) -> Result<(), ServiceError>;

    async fn send_password(
        &self,
        to_email: &str,
        login: &str,
        password: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: Option<SmtpTransport>,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let Some(host) = config.host.as_deref() else {
            tracing::warn!("SMTP_HOST not set, outgoing mail will only be logged");
            return Ok(Self {
                mailer: None,
                from_email: config.from.clone(),
            });
        };

        let mut builder = SmtpTransport::relay(host)
            .map_err(|e| ServiceError::EmailError(e.to_string()))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                password.expose_secret().clone(),
            ));
        }

        tracing::info!(host = %host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer: Some(builder.build()),
            from_email: config.from.clone(),
        })
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: String) -> Result<(), ServiceError> {
        let Some(mailer) = self.mailer.clone() else {
            tracing::info!(to = %to_email, subject = %subject, "Mail transport disabled, message dropped");
            return Ok(());
        };

        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ServiceError::EmailError(e.to_string()))?;

        // SmtpTransport blocks
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(ServiceError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_activation_code(
        &self,
        to_email: &str,
        login: &str,
        activation_link: &str,
    ) -> Result<(), ServiceError> {
        let body = format!(
            "Hello {},\n\n\
             An account activation was requested for you. Follow the link below to sign in \
             and choose a new password:\n\n{}\n\n\
             If you did not expect this message, ignore it.",
            login, activation_link
        );
        self.send_email(to_email, "Account activation", body).await
    }

    async fn send_password(
        &self,
        to_email: &str,
        login: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        let body = format!(
            "Hello {},\n\nYour password has been reset. Your new password is:\n\n{}\n",
            login, password
        );
        self.send_email(to_email, "Your new password", body).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub login: String,
    /// Activation link or password, depending on the message.
    pub payload: String,
}

/// Records messages instead of sending them.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn last_to(&self, to_email: &str) -> Option<SentEmail> {
        self.sent().into_iter().rev().find(|m| m.to == to_email)
    }

    fn record(&self, to_email: &str, login: &str, payload: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEmail {
                to: to_email.to_string(),
                login: login.to_string(),
                payload: payload.to_string(),
            });
        }
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_activation_code(
        &self,
        to_email: &str,
        login: &str,
        activation_link: &str,
    ) -> Result<(), ServiceError> {
        self.record(to_email, login, activation_link);
        Ok(())
    }

    async fn send_password(
        &self,
        to_email: &str,
        login: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        self.record(to_email, login, password);
        Ok(())
    }
}
