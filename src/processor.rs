//! Runs one submission through validation, classification, rendering and dispatch.

use crate::classify::classify;
use crate::dispatch::{DispatchPolicy, dispatch};
use crate::error::{AppError, Result};
use crate::mailer::{MailProvider, OutboundEmail};
use crate::models::{
    Classification, ClientMetadata, ContactRecord, DispatchReport, QuoteRecord, RecipientRole,
    ReferenceId, SubscriptionRecord,
};
use crate::templates::{
    Brand, EmailPair, RenderContext, render_contact, render_quote, render_subscription,
};
use crate::validation::{sanitize, validate_contact, validate_quote, validate_subscription};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

pub(crate) const QUOTE_PREFIX: &str = "QUOTE";
pub(crate) const CONTACT_PREFIX: &str = "CONTACT";
pub(crate) const SUBSCRIPTION_PREFIX: &str = "SUB";

/// Transport-level facts about a request, used for logging and as metadata fallback.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestMeta {
    pub client_ip: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct QuoteOutcome {
    pub reference_id: ReferenceId,
    pub record: QuoteRecord,
    pub classification: Classification,
    pub report: DispatchReport,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct ContactOutcome {
    pub reference_id: ReferenceId,
    pub record: ContactRecord,
    pub report: DispatchReport,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubscriptionOutcome {
    pub reference_id: ReferenceId,
    pub record: SubscriptionRecord,
    pub report: DispatchReport,
    pub submitted_at: DateTime<Utc>,
}

/// Everything needed to turn a validated record into delivered email.
#[derive(Clone)]
pub(crate) struct Pipeline {
    provider: Arc<dyn MailProvider>,
    policy: DispatchPolicy,
    from: String,
    admin_recipients: Vec<String>,
    brand: Brand,
}

impl Pipeline {
    pub(crate) fn new(
        provider: Arc<dyn MailProvider>,
        policy: DispatchPolicy,
        from: String,
        admin_recipients: Vec<String>,
        brand: Brand,
    ) -> Self {
        Self {
            provider,
            policy,
            from,
            admin_recipients,
            brand,
        }
    }

    pub(crate) fn brand(&self) -> &Brand {
        &self.brand
    }

    /// Validator, classifier, renderer and dispatch for a quote request body.
    pub(crate) async fn process_quote(
        &self,
        body: &Value,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<QuoteOutcome> {
        let mut record = validate_quote(body).map_err(AppError::Validation)?;
        fill_user_agent(&mut record.metadata, meta);
        let classification = classify(&record);
        let reference_id = ReferenceId::generate(QUOTE_PREFIX, now);

        tracing::info!(target: "quote_task",
            "[{}] Quote from {} (entry point: {}, priority: {}, value: {})",
            reference_id, meta.client_ip, record.entry_point,
            classification.priority, classification.estimated_value
        );

        let emails = render_quote(&record, &classification, &self.context(&reference_id, now));
        let tags = vec![
            ("form", "quote".to_string()),
            ("priority", classification.priority.as_str().to_string()),
            ("entry_point", record.entry_point.as_str().replace('-', "_")),
        ];
        let report = self
            .deliver(&reference_id, emails, record.email.to_plain(), tags)
            .await?;

        Ok(QuoteOutcome {
            reference_id,
            record,
            classification,
            report,
            submitted_at: now,
        })
    }

    pub(crate) async fn process_contact(
        &self,
        body: &Value,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<ContactOutcome> {
        let mut record = validate_contact(body).map_err(AppError::Validation)?;
        fill_user_agent(&mut record.metadata, meta);
        let reference_id = ReferenceId::generate(CONTACT_PREFIX, now);
        tracing::info!(target: "contact_task", "[{}] Contact message from {}", reference_id, meta.client_ip);

        let emails = render_contact(&record, &self.context(&reference_id, now));
        let report = self
            .deliver(
                &reference_id,
                emails,
                record.email.to_plain(),
                vec![("form", "contact".to_string())],
            )
            .await?;

        Ok(ContactOutcome {
            reference_id,
            record,
            report,
            submitted_at: now,
        })
    }

    pub(crate) async fn process_subscription(
        &self,
        body: &Value,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionOutcome> {
        let mut record = validate_subscription(body).map_err(AppError::Validation)?;
        fill_user_agent(&mut record.metadata, meta);
        let reference_id = ReferenceId::generate(SUBSCRIPTION_PREFIX, now);
        tracing::info!(target: "subscribe_task", "[{}] Newsletter sign-up from {}", reference_id, meta.client_ip);

        let emails = render_subscription(&record, &self.context(&reference_id, now));
        let report = self
            .deliver(
                &reference_id,
                emails,
                record.email.to_plain(),
                vec![("form", "subscribe".to_string())],
            )
            .await?;

        Ok(SubscriptionOutcome {
            reference_id,
            record,
            report,
            submitted_at: now,
        })
    }

    fn context<'a>(&'a self, reference_id: &'a ReferenceId, now: DateTime<Utc>) -> RenderContext<'a> {
        RenderContext {
            reference_id,
            rendered_at: now,
            brand: &self.brand,
        }
    }

    /// Admin copy goes to the configured recipients with replies routed to the
    /// submitter; the acknowledgement goes to the submitter.
    async fn deliver(
        &self,
        reference_id: &ReferenceId,
        emails: EmailPair,
        submitter: String,
        tags: Vec<(&str, String)>,
    ) -> Result<DispatchReport> {
        let tags: Vec<(String, String)> = tags
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        let admin = OutboundEmail {
            from: self.from.clone(),
            to: self.admin_recipients.clone(),
            reply_to: Some(submitter.clone()),
            subject: emails.admin.subject,
            html: emails.admin.html,
            text: emails.admin.text,
            tags: tags.clone(),
        };
        let customer = OutboundEmail {
            from: self.from.clone(),
            to: vec![submitter],
            reply_to: Some(self.brand.support_email.clone()),
            subject: emails.customer.subject,
            html: emails.customer.html,
            text: emails.customer.text,
            tags,
        };

        dispatch(
            self.provider.as_ref(),
            &self.policy,
            reference_id,
            vec![
                (RecipientRole::Admin, admin),
                (RecipientRole::Customer, customer),
            ],
        )
        .await
    }
}

fn fill_user_agent(metadata: &mut ClientMetadata, meta: &RequestMeta) {
    if metadata.user_agent.is_none() {
        metadata.user_agent = meta
            .user_agent
            .as_deref()
            .map(sanitize)
            .filter(|ua| !ua.is_empty());
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::templates::test_support::brand;

    pub(crate) fn pipeline(provider: Arc<dyn MailProvider>) -> Pipeline {
        Pipeline::new(
            provider,
            DispatchPolicy::default(),
            "The Wall Shop <noreply@thewallshop.co.uk>".to_string(),
            vec!["sales@thewallshop.co.uk".to_string()],
            brand(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::pipeline;
    use super::*;
    use crate::dispatch::test_support::ScriptedProvider;
    use crate::models::Priority;
    use crate::templates::test_support::fixed_time;
    use serde_json::json;

    fn meta() -> RequestMeta {
        RequestMeta {
            client_ip: "203.0.113.9".to_string(),
            user_agent: Some("Mozilla/5.0 Test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_quote_pipeline_sends_both_emails() {
        let provider = Arc::new(ScriptedProvider::ok());
        let body = json!({
            "fullName": "Priya Shah",
            "email": "Priya@Example.com",
            "phone": "07700 900456",
            "entryPoint": "smart-walls",
            "smartWalls": { "width": "4m" },
            "carbonRockBoards": { "thickness": "8mm" },
        });
        let outcome = pipeline(provider.clone())
            .process_quote(&body, &meta(), fixed_time())
            .await
            .unwrap();

        assert_eq!(outcome.classification.estimated_value, 30_000);
        assert_eq!(outcome.classification.priority, Priority::Standard);
        assert!(outcome.reference_id.as_str().starts_with("QUOTE-"));
        assert_eq!(outcome.report.successes(), 2);

        let sent = provider.sent();
        assert_eq!(sent.len(), 2);
        let admin = sent.iter().find(|e| e.to == vec!["sales@thewallshop.co.uk"]).unwrap();
        assert_eq!(admin.reply_to.as_deref(), Some("priya@example.com"));
        assert!(admin.tags.contains(&("priority".to_string(), "standard".to_string())));
        assert!(admin.tags.contains(&("entry_point".to_string(), "smart_walls".to_string())));
        assert!(admin.text.contains("User agent: Mozilla/5.0 Test"));
        let customer = sent.iter().find(|e| e.to == vec!["priya@example.com"]).unwrap();
        assert_eq!(customer.reply_to.as_deref(), Some("info@thewallshop.co.uk"));
        assert!(customer.subject.contains(outcome.reference_id.as_str()));
    }

    #[tokio::test]
    async fn test_invalid_quote_sends_nothing() {
        let provider = Arc::new(ScriptedProvider::ok());
        let body = json!({ "fullName": "Priya Shah", "phone": "07700 900456" });
        let err = pipeline(provider.clone())
            .process_quote(&body, &meta(), fixed_time())
            .await
            .unwrap_err();
        match err {
            AppError::Validation(fields) => assert!(fields.contains_key("email")),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn test_contact_dispatch_failure_surfaces() {
        let provider = Arc::new(ScriptedProvider::failing(&[
            RecipientRole::Admin,
            RecipientRole::Customer,
        ]));
        let body = json!({
            "fullName": "Tom Baker",
            "email": "tom@example.com",
            "message": "Do you install in Leeds?",
        });
        let err = pipeline(provider)
            .process_contact(&body, &meta(), fixed_time())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Dispatch { succeeded: 0, .. }));
    }

    #[tokio::test]
    async fn test_subscription_is_tagged_and_acknowledged() {
        let provider = Arc::new(ScriptedProvider::failing(&[RecipientRole::Admin]));
        let outcome = pipeline(provider.clone())
            .process_subscription(&json!({ "email": "ana@example.com" }), &meta(), fixed_time())
            .await
            .unwrap();
        assert!(outcome.reference_id.as_str().starts_with("SUB-"));
        assert_eq!(outcome.report.email_ids().len(), 1);
        assert!(provider
            .sent()
            .iter()
            .all(|e| e.tags.contains(&("form".to_string(), "subscribe".to_string()))));
    }
}
