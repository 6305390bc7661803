//! Email delivery using lettre/SMTP.
//!
//! Messages are rendered from `templates/email/*.html` with a plain-text
//! alternative. Without SMTP configuration messages are logged and kept in a
//! small in-memory outbox instead of being sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::auth::reset::RESET_TOKEN_MINUTES;
use crate::config::Config;
use crate::models::User;
use crate::theme::ThemeEngine;

/// Messages retained when SMTP is not configured.
const OUTBOX_CAPACITY: usize = 50;

/// A rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

enum Delivery {
    Smtp {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    },
    Outbox(Mutex<VecDeque<OutgoingEmail>>),
}

pub struct EmailService {
    delivery: Delivery,
    site_url: String,
    theme: Arc<ThemeEngine>,
}

impl EmailService {
    /// SMTP delivery.
    ///
    /// `encryption` controls the SMTP transport mode:
    /// - `"starttls"` (default): Opportunistic STARTTLS on port 587
    /// - `"tls"`: Implicit TLS (SMTPS) on port 465
    /// - `"none"`: Unencrypted (for local dev only)
    #[allow(clippy::too_many_arguments)]
    pub fn smtp(
        smtp_host: &str,
        smtp_port: u16,
        smtp_username: Option<&str>,
        smtp_password: Option<&str>,
        encryption: &str,
        from_email: &str,
        site_url: String,
        theme: Arc<ThemeEngine>,
    ) -> Result<Self> {
        let mut builder = match encryption {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .context("failed to create SMTP relay transport")?
                .port(smtp_port),
            "none" => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host).port(smtp_port)
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .context("failed to create SMTP STARTTLS transport")?
                .port(smtp_port),
        };

        if let (Some(user), Some(pass)) = (smtp_username, smtp_password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let from = from_email
            .parse::<Mailbox>()
            .context("invalid from email address")?;

        Ok(Self {
            delivery: Delivery::Smtp {
                transport: builder.build(),
                from,
            },
            site_url,
            theme,
        })
    }

    /// No transport: messages go to the outbox.
    pub fn outbox(site_url: String, theme: Arc<ThemeEngine>) -> Self {
        Self {
            delivery: Delivery::Outbox(Mutex::new(VecDeque::new())),
            site_url,
            theme,
        }
    }

    pub fn from_config(config: &Config, theme: Arc<ThemeEngine>) -> Result<Self> {
        match &config.smtp_host {
            Some(host) => {
                let service = Self::smtp(
                    host,
                    config.smtp_port,
                    config.smtp_username.as_deref(),
                    config.smtp_password.as_deref(),
                    &config.smtp_encryption,
                    &config.email_from,
                    config.site_url.clone(),
                    theme,
                )?;
                info!(host = %host, port = config.smtp_port, "SMTP email service configured");
                Ok(service)
            }
            None => {
                debug!("SMTP_HOST not set; emails will be logged, not sent");
                Ok(Self::outbox(config.site_url.clone(), theme))
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.delivery, Delivery::Smtp { .. })
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<()> {
        match &self.delivery {
            Delivery::Smtp { transport, from } => {
                let message = Message::builder()
                    .from(from.clone())
                    .to(email
                        .to
                        .parse()
                        .context("invalid recipient email address")?)
                    .subject(&email.subject)
                    .multipart(MultiPart::alternative_plain_html(email.text, email.html))
                    .context("failed to build email message")?;
                transport
                    .send(message)
                    .await
                    .context("failed to send email")?;
            }
            Delivery::Outbox(outbox) => {
                debug!(to = %email.to, subject = %email.subject, "email not sent (no SMTP)");
                let mut outbox = outbox.lock().unwrap_or_else(PoisonError::into_inner);
                if outbox.len() == OUTBOX_CAPACITY {
                    outbox.pop_front();
                }
                outbox.push_back(email);
            }
        }
        Ok(())
    }

    /// Messages held while SMTP is not configured, oldest first.
    pub fn outbox_messages(&self) -> Vec<OutgoingEmail> {
        match &self.delivery {
            Delivery::Outbox(outbox) => outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
            Delivery::Smtp { .. } => Vec::new(),
        }
    }

    pub async fn send_welcome(&self, user: &User) -> Result<()> {
        let url = format!("{}/me", self.site_url);
        let email = self.compose(
            "email/welcome.html",
            user,
            "Welcome to the Tourbook family!",
            &url,
            &format!(
                "Welcome to Tourbook, {}!\n\nUpload a profile photo at {url}\n",
                first_name(&user.name)
            ),
        )?;
        self.send(email).await
    }

    /// Send the clear reset token as part of the reset URL.
    pub async fn send_password_reset(&self, user: &User, token: &str) -> Result<()> {
        let url = reset_url(&self.site_url, token);
        let email = self.compose(
            "email/password_reset.html",
            user,
            &format!("Your password reset token (valid for only {RESET_TOKEN_MINUTES} minutes)"),
            &url,
            &format!(
                "Forgot your password? Submit a PATCH request with your new password and \
                 password_confirm to: {url}\n\
                 If you didn't forget your password, please ignore this email.\n"
            ),
        )?;
        self.send(email).await
    }

    fn compose(
        &self,
        template: &str,
        user: &User,
        subject: &str,
        url: &str,
        text: &str,
    ) -> Result<OutgoingEmail> {
        let mut context = tera::Context::new();
        context.insert("first_name", first_name(&user.name));
        context.insert("url", url);
        context.insert("subject", subject);
        let html = self.theme.render(template, &context)?;
        Ok(OutgoingEmail {
            to: user.email.clone(),
            subject: subject.to_string(),
            html,
            text: text.to_string(),
        })
    }
}

pub fn reset_url(site_url: &str, token: &str) -> String {
    format!("{site_url}/api/v1/users/reset-password/{token}")
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("configured", &self.is_configured())
            .field("site_url", &self.site_url)
            .finish()
    }
}
