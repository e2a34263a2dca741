//! Contact-form emails.

use super::{EmailDocument, EmailPair, RenderContext, Section, format_timestamp};
use crate::models::ContactRecord;

const ACCENT: &str = "#0f766e";
const RESPONSE_TIME: &str = "Within 24 hours";
const NO_SUBJECT: &str = "General enquiry";

pub(crate) fn render_contact(record: &ContactRecord, ctx: &RenderContext<'_>) -> EmailPair {
    let subject_line = record
        .subject
        .as_ref()
        .map(|s| s.to_plain())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let details = Section::new("Message Details")
        .row("Reference", ctx.reference_id.as_str())
        .row("Subject", subject_line.as_str())
        .row("Received", format_timestamp(ctx.rendered_at));
    let sender = Section::new("Sender")
        .row("Name", record.full_name.clone())
        .row("Email", record.email.clone())
        .row_if("Phone", record.phone.as_ref());
    let message = Section::new("Message").note(record.message.clone());

    let mut admin = EmailDocument::new("New Contact Message", ACCENT);
    admin.badge = Some("CONTACT".into());
    admin.sections.push(details.clone());
    admin.sections.push(sender);
    admin.sections.push(message.clone());
    let mut submission = Section::new("Submission Details");
    submission = submission.row_if("Page", record.metadata.page_path.as_ref());
    submission = submission.row_if("User agent", record.metadata.user_agent.as_ref());
    submission = submission.row_if("Client time", record.metadata.client_timestamp.as_ref());
    if !submission.rows.is_empty() {
        admin.sections.push(submission);
    }
    admin.closing.push("Reply to this email to respond to the sender directly.".into());

    let mut customer = EmailDocument::new("We've Received Your Message", ACCENT);
    customer.greeting = Some(format!("Dear {},", record.full_name.to_plain()).into());
    customer.paragraphs.push(
        format!(
            "Thank you for getting in touch with {}. A member of our team will reply {}.",
            ctx.brand.company,
            RESPONSE_TIME.to_lowercase()
        )
        .into(),
    );
    customer
        .sections
        .push(details.row("Expected response", RESPONSE_TIME));
    customer.sections.push(message.retitled("Your Message"));
    customer.paragraphs.push(
        format!(
            "If your enquiry is urgent, call us on {}.",
            ctx.brand.support_phone
        )
        .into(),
    );
    customer.closing.push("Kind regards,".into());
    customer
        .closing
        .push(format!("The {} Team", ctx.brand.company.trim_start_matches("The ")).into());

    EmailPair {
        admin: admin.render(
            format!(
                "New Contact Message: {} - {} ({})",
                subject_line,
                record.full_name.to_plain(),
                ctx.reference_id
            ),
            ctx.brand,
        ),
        customer: customer.render(
            format!("We've received your message - {}", ctx.brand.company),
            ctx.brand,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceId;
    use crate::templates::test_support::{brand, fixed_time};
    use crate::validation::validate_contact;
    use serde_json::json;

    fn render(body: serde_json::Value) -> (EmailPair, ReferenceId) {
        let record = validate_contact(&body).expect("valid contact message");
        let reference_id = ReferenceId::generate("CONTACT", fixed_time());
        let brand = brand();
        let ctx = RenderContext {
            reference_id: &reference_id,
            rendered_at: fixed_time(),
            brand: &brand,
        };
        (render_contact(&record, &ctx), reference_id)
    }

    #[test]
    fn test_contact_emails_carry_message_and_reference() {
        let (emails, reference_id) = render(json!({
            "fullName": "Tom Baker",
            "email": "tom@example.com",
            "subject": "Showroom visit",
            "message": "Can I visit on Saturday?\nThanks",
        }));

        assert_eq!(
            emails.admin.subject,
            format!("New Contact Message: Showroom visit - Tom Baker ({})", reference_id)
        );
        assert!(emails.admin.text.contains("Email: tom@example.com"));
        assert!(!emails.admin.text.contains("Phone:"));
        assert!(emails.admin.html.contains("Can I visit on Saturday?<br>Thanks"));

        assert!(emails.customer.text.contains("Dear Tom Baker,"));
        assert!(emails.customer.text.contains("Expected response: Within 24 hours"));
        assert!(emails.customer.text.contains("Can I visit on Saturday?\nThanks"));
        assert!(emails.customer.text.contains(reference_id.as_str()));
        assert!(emails.customer.text.contains("The Wall Shop Team"));
    }

    #[test]
    fn test_missing_subject_uses_general_enquiry() {
        let (emails, _) = render(json!({
            "fullName": "Tom Baker",
            "email": "tom@example.com",
            "phone": "020 7946 0000",
            "message": "Please call me back about panels.",
            "userAgent": "TestAgent",
        }));
        assert!(emails.admin.subject.starts_with("New Contact Message: General enquiry"));
        assert!(emails.admin.text.contains("Phone: 020 7946 0000"));
        assert!(emails.admin.text.contains("User agent: TestAgent"));
        assert!(!emails.customer.text.contains("TestAgent"));
    }

    #[test]
    fn test_message_markup_is_neutralised() {
        let (emails, _) = render(json!({
            "fullName": "Tom Baker",
            "email": "tom@example.com",
            "message": "Fish & chips <img src=x onerror=alert(1)> please",
        }));
        assert!(!emails.admin.html.contains("<img"));
        assert!(emails.admin.html.contains("Fish &amp; chips"));
        assert!(emails.customer.text.contains("Fish & chips"));
    }
}
