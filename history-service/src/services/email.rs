use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    Message,
    SmtpTransport,
    Transport,
};
use service_core::async_trait::async_trait;
use service_core::error::AppError;
use std::time::Duration;

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to_email: &str, otp: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Mailer initialized with SMTP transport");

        Ok(Self {
            mailer,
            from_email: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_otp(&self, to_email: &str, otp: &str) -> Result<(), AppError> {
        let plain_body = format!(
            "Your sign-in code is {}.\n\nIt expires in a few minutes. If you didn't request it, ignore this email.",
            otp
        );
        let html_body = format!(
            r#"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Your sign-in code</h2>
                    <p style="font-size: 28px; letter-spacing: 4px;"><strong>{}</strong></p>
                    <p style="color: #666; font-size: 12px;">
                        The code expires in a few minutes. If you didn't request it, ignore this email.
                    </p>
                </body>
            </html>"#,
            otp
        );

        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject("Your sign-in code")
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send in the blocking pool so a slow relay cannot stall the runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!("Sign-in code email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), "Failed to send sign-in code email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// No-op mailer for `MAILER_MODE=null` and tests. The OTP stays server-side;
/// dev environments surface it through the dev-only response field instead.
#[derive(Clone)]
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send_otp(&self, _to_email: &str, _otp: &str) -> Result<(), AppError> {
        tracing::debug!("Null mailer dropped a sign-in code delivery");
        Ok(())
    }
}
