//! Newsletter sign-up emails.

use super::{EmailDocument, EmailPair, RenderContext, Section, format_timestamp};
use crate::models::SubscriptionRecord;

const ACCENT: &str = "#b45309";

pub(crate) fn render_subscription(
    record: &SubscriptionRecord,
    ctx: &RenderContext<'_>,
) -> EmailPair {
    let subscriber = Section::new("Subscriber")
        .row("Email", record.email.clone())
        .row_if("Name", record.full_name.as_ref())
        .row_if("Source", record.source.as_ref())
        .row("Reference", ctx.reference_id.as_str())
        .row("Subscribed", format_timestamp(ctx.rendered_at));

    let mut admin = EmailDocument::new("New Newsletter Subscriber", ACCENT);
    admin.badge = Some("NEWSLETTER".into());
    admin.sections.push(subscriber);
    if let Some(page) = &record.metadata.page_path {
        admin
            .sections
            .push(Section::new("Submission Details").row("Page", page.clone()));
    }

    let mut customer = EmailDocument::new(&format!("Welcome to {}", ctx.brand.company), ACCENT);
    customer.greeting = Some(match &record.full_name {
        Some(name) => format!("Hi {},", name.to_plain()).into(),
        None => "Hi there,".into(),
    });
    customer.paragraphs.push(
        format!(
            "Thanks for subscribing to the {} newsletter. You're now on the list.",
            ctx.brand.company
        )
        .into(),
    );
    customer.sections.push(
        Section::new("What to Expect")
            .bullet("New smart wall designs and installation showcases")
            .bullet("Early access to seasonal offers")
            .bullet("Interior inspiration and styling tips")
            .bullet("Product launches across our panel and board ranges"),
    );
    customer.paragraphs.push(
        format!(
            "You can unsubscribe at any time by replying to this email or contacting {}.",
            ctx.brand.support_email
        )
        .into(),
    );
    customer.closing.push("Best wishes,".into());
    customer
        .closing
        .push(format!("The {} Team", ctx.brand.company.trim_start_matches("The ")).into());

    EmailPair {
        admin: admin.render(
            format!(
                "New Newsletter Subscriber: {} ({})",
                record.email.to_plain(),
                ctx.reference_id
            ),
            ctx.brand,
        ),
        customer: customer.render(format!("Welcome to {}", ctx.brand.company), ctx.brand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceId;
    use crate::templates::test_support::{brand, fixed_time};
    use crate::validation::validate_subscription;
    use serde_json::json;

    fn render(body: serde_json::Value) -> (EmailPair, ReferenceId) {
        let record = validate_subscription(&body).expect("valid subscription");
        let reference_id = ReferenceId::generate("SUB", fixed_time());
        let brand = brand();
        let ctx = RenderContext {
            reference_id: &reference_id,
            rendered_at: fixed_time(),
            brand: &brand,
        };
        (render_subscription(&record, &ctx), reference_id)
    }

    #[test]
    fn test_named_subscriber() {
        let (emails, reference_id) = render(json!({
            "email": "Ana@Example.com",
            "fullName": "Ana Lima",
            "source": "footer",
        }));
        assert_eq!(
            emails.admin.subject,
            format!("New Newsletter Subscriber: ana@example.com ({})", reference_id)
        );
        assert!(emails.admin.text.contains("Source: footer"));
        assert!(emails.customer.text.contains("Hi Ana Lima,"));
        assert!(emails.customer.text.contains("- Early access to seasonal offers"));
        assert_eq!(emails.customer.subject, "Welcome to The Wall Shop");
    }

    #[test]
    fn test_anonymous_subscriber() {
        let (emails, _) = render(json!({ "email": "someone@example.org" }));
        assert!(emails.customer.html.contains("Hi there,"));
        assert!(!emails.admin.text.contains("Name:"));
    }
}
