//! Outbound email capability and its Resend-compatible HTTP implementation.

use crate::error::{AppError, MailError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One message handed to a mail provider. Bodies are already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundEmail {
    pub from: String,
    pub to: Vec<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Provider-side tags, e.g. `("form", "quote")`.
    pub tags: Vec<(String, String)>,
}

/// Anything that can deliver an [`OutboundEmail`] and return the provider's message id.
#[async_trait]
pub(crate) trait MailProvider: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> std::result::Result<String, MailError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<Tag<'a>>,
}

#[derive(Serialize)]
struct Tag<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
}

impl<'a> SendRequest<'a> {
    fn from_email(email: &'a OutboundEmail) -> Self {
        Self {
            from: &email.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
            reply_to: email.reply_to.as_deref(),
            tags: email
                .tags
                .iter()
                .map(|(name, value)| Tag {
                    name: name.as_str(),
                    value: value.as_str(),
                })
                .collect(),
        }
    }
}

/// Client for the Resend `POST /emails` API. Sends are never retried.
#[derive(Clone)]
pub(crate) struct ResendMailer {
    http_client: Client,
    endpoint: String,
    api_key: String,
}

impl ResendMailer {
    pub(crate) fn new(
        api_url: &str,
        api_key: String,
        user_agent: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                AppError::Unknown(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/emails", api_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl MailProvider for ResendMailer {
    async fn send(&self, email: &OutboundEmail) -> std::result::Result<String, MailError> {
        tracing::debug!(target: "mail_task",
            "Sending '{}' to {} recipient(s)",
            email.subject,
            email.to.len()
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendRequest::from_email(email))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(target: "mail_task", "Mail provider returned {}: {}", status, body);
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendResponse = response.json().await?;
        parsed.id.filter(|id| !id.is_empty()).ok_or(MailError::MissingId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: "The Wall Shop <noreply@thewallshop.co.uk>".to_string(),
            to: vec!["sales@thewallshop.co.uk".to_string()],
            reply_to: Some("customer@example.com".to_string()),
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: "Hi".to_string(),
            tags: vec![("form".to_string(), "quote".to_string())],
        }
    }

    #[test]
    fn test_request_body_shape() {
        let email = email();
        let body = serde_json::to_value(SendRequest::from_email(&email)).unwrap();
        assert_eq!(
            body,
            json!({
                "from": "The Wall Shop <noreply@thewallshop.co.uk>",
                "to": ["sales@thewallshop.co.uk"],
                "subject": "Hello",
                "html": "<p>Hi</p>",
                "text": "Hi",
                "reply_to": "customer@example.com",
                "tags": [{ "name": "form", "value": "quote" }],
            })
        );
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let mut email = email();
        email.reply_to = None;
        email.tags.clear();
        let body = serde_json::to_value(SendRequest::from_email(&email)).unwrap();
        assert!(body.get("reply_to").is_none());
        assert!(body.get("tags").is_none());
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let mailer = ResendMailer::new(
            "https://api.resend.com/",
            "key".to_string(),
            "test-agent",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(mailer.endpoint, "https://api.resend.com/emails");
    }
}
