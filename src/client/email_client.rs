use std::convert::Infallible;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use async_trait::async_trait;

use reqwest::Client;

use serde::Serialize;

use secrecy::Secret;

use url::Url;

use crate::domain::{EmailAddress, GroupId};

const POSTMARK_TOKEN_HEADER: &str = "X-Postmark-Server-Token";

/// Capability to deliver a confirmation email carrying the signed link.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(
        &self,
        recipient: &EmailAddress,
        group: &GroupId,
        confirmation_link: &Url,
    ) -> anyhow::Result<()>;
}

/// Notifier backed by a Postmark-style transactional email REST API.
#[derive(Debug)]
pub struct EmailClient {
    client: Client,
    sender: EmailAddress,
    ttl_hours: i64,

    api_send_email_url: Url,
    api_auth_token: EmailAuthorizationToken,
}

impl EmailClient {
    pub fn new(
        sender: EmailAddress,
        ttl_hours: i64,
        api_timeout: Duration,
        api_base_url: Url,
        api_auth_token: EmailAuthorizationToken,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(api_timeout)
            .build()
            .context("Failed to build http client")?;

        let api_send_email_url = api_base_url
            .join("email")
            .context("Failed to create send email endpoint URL")?;

        Ok(Self {
            client,
            sender,
            ttl_hours,
            api_send_email_url,
            api_auth_token,
        })
    }
}

#[async_trait]
impl Notifier for EmailClient {
    #[tracing::instrument(name = "Send confirmation email", skip(self, confirmation_link))]
    async fn send_confirmation(
        &self,
        recipient: &EmailAddress,
        group: &GroupId,
        confirmation_link: &Url,
    ) -> anyhow::Result<()> {
        use secrecy::ExposeSecret;

        let subject = format!("Confirm your email subscription for '{}'", group);
        let html_body = confirmation_html(recipient, group, confirmation_link, self.ttl_hours);
        let text_body = confirmation_text(group, confirmation_link, self.ttl_hours);

        let body = SendEmailRequest {
            to: recipient.as_ref(),
            from: self.sender.as_ref(),
            subject: &subject,
            html_body: &html_body,
            text_body: &text_body,
        };

        self.client
            .post(self.api_send_email_url.clone())
            .header(POSTMARK_TOKEN_HEADER, self.api_auth_token.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn confirmation_html(
    recipient: &EmailAddress,
    group: &GroupId,
    link: &Url,
    ttl_hours: i64,
) -> String {
    format!(
        "<h1>Confirm your subscription</h1>\
         <p>Thanks for signing up for updates from \"{group}\"!</p>\
         <p>Please confirm your subscription by clicking the link below. \
         This confirmation link will expire in {ttl_hours} hours.</p>\
         <p><a href=\"{link}\">Confirm email</a></p>\
         <p>If the link above does not work, copy and paste this URL into your browser:</p>\
         <pre>{link}</pre>\
         <p>This email was sent to {recipient}. If you did not request this subscription, \
         no further action is required. You won't be subscribed unless you click the \
         confirmation link.</p>"
    )
}

fn confirmation_text(group: &GroupId, link: &Url, ttl_hours: i64) -> String {
    format!(
        "Thanks for signing up for updates from \"{group}\"!\n\n\
         To confirm your subscription, visit this web page within {ttl_hours} hours:\n\n{link}\n\n\
         If you did not request this subscription, no further action is required."
    )
}

#[derive(Debug)]
pub struct EmailAuthorizationToken(Secret<String>);

impl FromStr for EmailAuthorizationToken {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Infallible> {
        let value = value.to_string();
        let value = Secret::new(value);

        Ok(Self(value))
    }
}

impl From<Secret<String>> for EmailAuthorizationToken {
    fn from(value: Secret<String>) -> Self {
        Self(value)
    }
}

impl secrecy::ExposeSecret<String> for EmailAuthorizationToken {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    to: &'a str,
    from: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}
