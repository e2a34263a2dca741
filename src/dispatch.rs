//! Concurrent fan-out of a submission's emails under an explicit success policy.

use crate::error::{AppError, MailError, Result};
use crate::mailer::{MailProvider, OutboundEmail};
use crate::models::{DispatchReport, RecipientRole, ReferenceId, SendOutcome};
use futures::future::join_all;
use std::time::Duration;
use tokio::time::timeout;

/// How many sends must succeed, and how long any one send may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchPolicy {
    pub min_successes: usize,
    pub send_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            min_successes: 1,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Sends every email concurrently and waits for all of them.
///
/// A failed or timed-out send never cancels the others. Each email is tagged
/// with its recipient role before it is handed to the provider. Returns
/// [`AppError::Dispatch`] when fewer than `policy.min_successes` sends succeed.
pub(crate) async fn dispatch(
    provider: &dyn MailProvider,
    policy: &DispatchPolicy,
    reference_id: &ReferenceId,
    sends: Vec<(RecipientRole, OutboundEmail)>,
) -> Result<DispatchReport> {
    let attempted = sends.len();
    let send_timeout = policy.send_timeout;

    let pending = sends.into_iter().map(|(role, mut email)| async move {
        email
            .tags
            .push(("recipient".to_string(), role.as_str().to_string()));

        let result = match timeout(send_timeout, provider.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout(send_timeout)),
        };

        match result {
            Ok(message_id) => {
                tracing::info!(target: "dispatch_task",
                    "[{}] {} email sent (id: {})",
                    reference_id, role.as_str(), message_id
                );
                SendOutcome {
                    role,
                    message_id: Some(message_id),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(target: "dispatch_task",
                    "[{}] {} email failed: {}",
                    reference_id, role.as_str(), e
                );
                SendOutcome {
                    role,
                    message_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    });

    let report = DispatchReport {
        reference_id: reference_id.clone(),
        outcomes: join_all(pending).await,
    };

    let succeeded = report.successes();
    if succeeded < policy.min_successes {
        tracing::error!(target: "dispatch_task",
            "[{}] Dispatch failed: {}/{} sends succeeded, {} required",
            reference_id, succeeded, attempted, policy.min_successes
        );
        return Err(AppError::Dispatch {
            attempted,
            succeeded,
            required: policy.min_successes,
        });
    }

    if succeeded < attempted {
        tracing::warn!(target: "dispatch_task",
            "[{}] Partial dispatch: {}/{} sends succeeded",
            reference_id, succeeded, attempted
        );
    }
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;
    use chrono::Utc;

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            from: "noreply@thewallshop.co.uk".to_string(),
            to: vec![to.to_string()],
            reply_to: None,
            subject: "Subject".to_string(),
            html: "<p>Body</p>".to_string(),
            text: "Body".to_string(),
            tags: Vec::new(),
        }
    }

    fn sends() -> Vec<(RecipientRole, OutboundEmail)> {
        vec![
            (RecipientRole::Admin, email("sales@thewallshop.co.uk")),
            (RecipientRole::Customer, email("customer@example.com")),
        ]
    }

    fn reference() -> ReferenceId {
        ReferenceId::generate("QUOTE", Utc::now())
    }

    #[tokio::test]
    async fn test_both_succeed() {
        let provider = ScriptedProvider::ok();
        let report = dispatch(&provider, &DispatchPolicy::default(), &reference(), sends())
            .await
            .unwrap();
        assert_eq!(report.successes(), 2);
        assert_eq!(report.email_ids().get("admin").map(String::as_str), Some("msg_admin"));
        assert!(provider.sent().iter().all(|e| e.tags.iter().any(|(n, _)| n == "recipient")));
    }

    #[tokio::test]
    async fn test_admin_failure_is_tolerated() {
        let provider = ScriptedProvider::failing(&[RecipientRole::Admin]);
        let report = dispatch(&provider, &DispatchPolicy::default(), &reference(), sends())
            .await
            .unwrap();
        let ids = report.email_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.get("customer").map(String::as_str), Some("msg_customer"));
        assert_eq!(provider.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_customer_failure_is_tolerated() {
        let provider = ScriptedProvider::failing(&[RecipientRole::Customer]);
        let report = dispatch(&provider, &DispatchPolicy::default(), &reference(), sends())
            .await
            .unwrap();
        assert_eq!(report.email_ids().keys().copied().collect::<Vec<_>>(), vec!["admin"]);
        let failed = report.outcomes.iter().find(|o| !o.succeeded()).unwrap();
        assert_eq!(failed.role, RecipientRole::Customer);
        assert!(failed.error.as_deref().unwrap().contains("scripted failure"));
    }

    #[tokio::test]
    async fn test_both_failing_is_an_error() {
        let provider =
            ScriptedProvider::failing(&[RecipientRole::Admin, RecipientRole::Customer]);
        let err = dispatch(&provider, &DispatchPolicy::default(), &reference(), sends())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch {
                attempted: 2,
                succeeded: 0,
                required: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_stricter_policy_requires_all() {
        let provider = ScriptedProvider::failing(&[RecipientRole::Admin]);
        let policy = DispatchPolicy {
            min_successes: 2,
            ..DispatchPolicy::default()
        };
        let result = dispatch(&provider, &policy, &reference(), sends()).await;
        assert!(matches!(result, Err(AppError::Dispatch { succeeded: 1, .. })));
    }

    #[tokio::test]
    async fn test_slow_sends_time_out() {
        let provider = ScriptedProvider::slow(Duration::from_millis(500));
        let policy = DispatchPolicy {
            min_successes: 1,
            send_timeout: Duration::from_millis(20),
        };
        let started = std::time::Instant::now();
        let result = dispatch(&provider, &policy, &reference(), sends()).await;
        assert!(matches!(result, Err(AppError::Dispatch { succeeded: 0, .. })));
        // Both sends were waited on together, not one after the other.
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
