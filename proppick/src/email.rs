//! Outbound email: the [`Mailer`] transport seam, the lettre-backed [`EmailService`], and the
//! templates for verification codes and reset links.
//!
//! Nothing here is called inside a database transaction. Messages are rendered up front, stored in
//! the outbox, and handed to a [`Mailer`] after commit by [`crate::outbox`].

use std::{path::Path, sync::LazyLock, time::Duration};

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use minijinja::{Environment, context};
use tracing::instrument;

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

/// Delivers a rendered message. Errors are delivery failures the outbox may retry.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), Error>;
}

pub struct EmailService {
    transport: EmailTransport,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

fn parse_mailbox(value: &str, what: &str) -> Result<Mailbox, Error> {
    value.parse::<Mailbox>().map_err(|e| Error::Internal {
        operation: format!("parse {what} email: {e}"),
    })
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                    operation: format!("create emails directory: {e}"),
                })?;
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let from = parse_mailbox(&format!("{} <{}>", email_config.from_name, email_config.from_email), "from")?;
        let reply_to = email_config
            .reply_to
            .as_deref()
            .map(|r| parse_mailbox(r, "reply-to"))
            .transpose()?;

        Ok(Self { transport, from, reply_to })
    }
}

#[async_trait::async_trait]
impl Mailer for EmailService {
    #[instrument(skip(self, html_body), err)]
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), Error> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to, "recipient")?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        let message = builder.body(html_body.to_string()).map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

/// A message ready for the outbox.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

const LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{ title }}</title>
    <style>
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
        .container { max-width: 600px; margin: 0 auto; padding: 20px; }
        .code { font-size: 28px; letter-spacing: 6px; font-weight: bold; }
        .footer { margin-top: 30px; font-size: 12px; color: #666; }
    </style>
</head>
<body>
    <div class="container">
        <h2>{{ title }}</h2>
        <p>Hello {{ full_name }},</p>
        {% block content %}{% endblock %}
        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#;

const REGISTRATION_OTP: &str = r#"{% extends "layout.html" %}
{% block content %}
        <p>Thanks for signing up. Use the code below to verify your email address:</p>
        <p class="code">{{ code }}</p>
        <p>The code expires in {{ minutes }} minutes.</p>
{% endblock %}"#;

const RESET_PASSWORD_OTP: &str = r#"{% extends "layout.html" %}
{% block content %}
        <p>We received a request to reset your password. Use the code below to choose a new one:</p>
        <p class="code">{{ code }}</p>
        <p>The code expires in {{ minutes }} minutes. If you didn't make this request, you can safely ignore this email.</p>
{% endblock %}"#;

const RESET_PASSWORD_LINK: &str = r#"{% extends "layout.html" %}
{% block content %}
        <p>We received a request to reset your password. If you didn't make this request, you can safely ignore this email.</p>
        <p><a href="{{ link }}">Reset your password</a></p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{{ link }}</p>
        <p>This link will expire in {{ minutes }} minutes.</p>
{% endblock %}"#;

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("layout.html", LAYOUT),
        ("registration_otp.html", REGISTRATION_OTP),
        ("reset_password_otp.html", RESET_PASSWORD_OTP),
        ("reset_password_link.html", RESET_PASSWORD_LINK),
    ] {
        if let Err(e) = env.add_template(name, source) {
            tracing::error!(template = name, error = %e, "Invalid built-in email template");
        }
    }
    env
});

fn render(template: &str, subject: &str, ctx: minijinja::Value) -> Result<RenderedEmail, Error> {
    let html_body = TEMPLATES
        .get_template(template)
        .and_then(|t| t.render(ctx))
        .map_err(|e| Error::Internal {
            operation: format!("render email template {template}: {e}"),
        })?;
    Ok(RenderedEmail {
        subject: subject.to_string(),
        html_body,
    })
}

fn minutes(ttl: Duration) -> u64 {
    ttl.as_secs().div_ceil(60)
}

pub fn registration_otp_email(full_name: &str, code: &str, ttl: Duration) -> Result<RenderedEmail, Error> {
    let subject = "Verify your email";
    render(
        "registration_otp.html",
        subject,
        context! { title => subject, full_name, code, minutes => minutes(ttl) },
    )
}

pub fn reset_password_otp_email(full_name: &str, code: &str, ttl: Duration) -> Result<RenderedEmail, Error> {
    let subject = "Your password reset code";
    render(
        "reset_password_otp.html",
        subject,
        context! { title => subject, full_name, code, minutes => minutes(ttl) },
    )
}

pub fn reset_password_link_email(full_name: &str, link: &str, ttl: Duration) -> Result<RenderedEmail, Error> {
    let subject = "Password Reset Request";
    render(
        "reset_password_link.html",
        subject,
        context! { title => subject, full_name, link, minutes => minutes(ttl) },
    )
}
