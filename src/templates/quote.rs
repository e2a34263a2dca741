//! Quote request emails: the sales-team notification and the customer confirmation.

use super::{
    EmailDocument, EmailPair, NOT_SPECIFIED, RenderContext, Section, format_gbp, format_timestamp,
    or_not_specified, yes_no,
};
use crate::classify::{estimated_response, next_steps};
use crate::models::{
    CarbonRockBoardsOptions, Classification, EntryPoint, ExtraField, Priority, QuoteRecord, SafeText,
    SmartDevicesOptions, SmartWallsOptions, WallPanelsOptions,
};

pub(crate) const GENERAL_INQUIRY_NOTE: &str =
    "General inquiry — no specific product data provided";

fn accent(priority: Priority) -> &'static str {
    match priority {
        Priority::Premium => "#7c3aed",
        Priority::Urgent => "#dc2626",
        Priority::Standard => "#2563eb",
    }
}

/// Renders both quote emails. The two share the summary, contact and product
/// sections, so reference id, priority and value always match.
pub(crate) fn render_quote(
    record: &QuoteRecord,
    classification: &Classification,
    ctx: &RenderContext<'_>,
) -> EmailPair {
    let summary = summary_section(classification, ctx);
    let contact = contact_section(record);
    let products = product_sections(record);

    let admin = admin_document(record, classification, ctx, &summary, &contact, &products);
    let customer = customer_document(record, classification, ctx, &summary, &contact, &products);

    let name = record.full_name.to_plain();
    EmailPair {
        admin: admin.render(
            format!(
                "[{}] New Quote Request - {} ({})",
                classification.priority.label(),
                name,
                ctx.reference_id
            ),
            ctx.brand,
        ),
        customer: customer.render(
            format!(
                "Your Quote Request {} - {}",
                ctx.reference_id, ctx.brand.company
            ),
            ctx.brand,
        ),
    }
}

fn summary_section(classification: &Classification, ctx: &RenderContext<'_>) -> Section {
    Section::new("Quote Summary")
        .row("Reference", ctx.reference_id.as_str())
        .row("Priority", classification.priority.label())
        .row(
            "Estimated project value",
            format_gbp(classification.estimated_value),
        )
        .row("Complexity", classification.complexity.label())
        .row("Product lines", classification.product_count.to_string())
        .row("Expected response", estimated_response(classification.priority))
        .row("Submitted", format_timestamp(ctx.rendered_at))
}

fn contact_section(record: &QuoteRecord) -> Section {
    Section::new("Contact Details")
        .row("Name", record.full_name.clone())
        .row("Email", record.email.clone())
        .row("Phone", record.phone.clone())
        .row(
            "Installation address",
            or_not_specified(record.installation_address.as_ref()),
        )
        .row_if("Product category", record.product_category.as_ref())
}

/// `Home` lists every product supplied; other entry points show their own line.
/// Either way a missing payload falls back to the general-inquiry section.
fn product_sections(record: &QuoteRecord) -> Vec<Section> {
    let products = &record.products;
    let mut sections = Vec::new();
    let wants = |entry: EntryPoint| record.entry_point == EntryPoint::Home || record.entry_point == entry;

    if wants(EntryPoint::SmartWalls) {
        if let Some(opts) = &products.smart_walls {
            sections.push(smart_walls_section(opts));
        }
    }
    if wants(EntryPoint::SmartDevices) {
        if let Some(opts) = &products.smart_devices {
            sections.push(smart_devices_section(opts));
        }
    }
    if wants(EntryPoint::WallPanels) {
        if let Some(opts) = &products.wall_panels {
            sections.push(wall_panels_section(opts));
        }
    }
    if wants(EntryPoint::CarbonRockBoards) {
        if let Some(opts) = &products.carbon_rock_boards {
            sections.push(carbon_rock_boards_section(opts));
        }
    }

    if sections.is_empty() {
        tracing::debug!(target: "quote_task",
            "No product data for entry point '{}'; using general inquiry section",
            record.entry_point
        );
        sections.push(Section::new(record.entry_point.label()).note(GENERAL_INQUIRY_NOTE));
    }
    sections
}

fn with_extras(mut section: Section, extras: &[ExtraField]) -> Section {
    for extra in extras {
        section = section.row(&extra.name.to_plain(), extra.value.clone());
    }
    section
}

fn dimensions(width: Option<&SafeText>, height: Option<&SafeText>) -> String {
    match (width, height) {
        (None, None) => NOT_SPECIFIED.to_string(),
        (w, h) => format!(
            "{} W x {} H",
            w.map(|v| v.to_plain()).unwrap_or_else(|| "?".to_string()),
            h.map(|v| v.to_plain()).unwrap_or_else(|| "?".to_string())
        ),
    }
}

fn smart_walls_section(opts: &SmartWallsOptions) -> Section {
    let accessories = if opts.accessories.is_empty() {
        "None selected".to_string()
    } else {
        opts.accessories
            .iter()
            .map(|a| a.to_plain())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let section = Section::new("Smart Walls Configuration")
        .row("Wall dimensions", dimensions(opts.width.as_ref(), opts.height.as_ref()))
        .row("Style", or_not_specified(opts.style.as_ref()))
        .row("Finish", or_not_specified(opts.finish.as_ref()))
        .row("TV size", or_not_specified(opts.tv_size.as_ref()))
        .row("Fireplace", yes_no(opts.fireplace))
        .row("LED lighting", yes_no(opts.lighting))
        .row("Soundbar", yes_no(opts.soundbar))
        .row("Storage", yes_no(opts.storage))
        .row("Accessories", accessories);
    with_extras(section, &opts.extras)
}

fn smart_devices_section(opts: &SmartDevicesOptions) -> Section {
    let mut section = Section::new("Smart Devices Selection")
        .row("Control hub", or_not_specified(opts.control_hub.as_ref()))
        .row("Professional installation", yes_no(opts.installation_required));
    if opts.devices.is_empty() {
        section = section.row("Devices", NOT_SPECIFIED);
    }
    for device in &opts.devices {
        section = section.bullet(format!("{} x {}", device.quantity, device.name.to_plain()));
    }
    with_extras(section, &opts.extras)
}

fn wall_panels_section(opts: &WallPanelsOptions) -> Section {
    let section = Section::new("Wall Panels Configuration")
        .row("Panel type", or_not_specified(opts.panel_type.as_ref()))
        .row("Colour", or_not_specified(opts.colour.as_ref()))
        .row("Finish", or_not_specified(opts.finish.as_ref()))
        .row("Dimensions", dimensions(opts.width.as_ref(), opts.height.as_ref()))
        .row(
            "Quantity",
            opts.quantity
                .map(|q| q.to_string())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
        );
    with_extras(section, &opts.extras)
}

fn carbon_rock_boards_section(opts: &CarbonRockBoardsOptions) -> Section {
    let section = Section::new("Carbon Rock Boards Configuration")
        .row("Board type", or_not_specified(opts.board_type.as_ref()))
        .row("Thickness", or_not_specified(opts.thickness.as_ref()))
        .row("Finish", or_not_specified(opts.finish.as_ref()))
        .row("Dimensions", dimensions(opts.width.as_ref(), opts.height.as_ref()))
        .row(
            "Quantity",
            opts.quantity
                .map(|q| q.to_string())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
        );
    with_extras(section, &opts.extras)
}

fn admin_document(
    record: &QuoteRecord,
    classification: &Classification,
    ctx: &RenderContext<'_>,
    summary: &Section,
    contact: &Section,
    products: &[Section],
) -> EmailDocument {
    let priority = classification.priority;
    let mut doc = EmailDocument::new(
        &format!("New Quote Request: {}", record.entry_point.label()),
        accent(priority),
    );
    doc.badge = Some(format!("{} PRIORITY", priority.label().to_uppercase()).into());
    doc.paragraphs.push(
        format!(
            "A new quote request has been submitted via the {} website.",
            ctx.brand.company
        )
        .into(),
    );
    doc.paragraphs.push(
        format!(
            "Action required: respond {}.",
            estimated_response(priority).to_lowercase()
        )
        .into(),
    );

    doc.sections.push(summary.clone());
    doc.sections.push(contact.clone());
    doc.sections.extend(products.iter().cloned());

    if !classification.special_requirements.is_empty() {
        let mut requirements = Section::new("Special Requirements");
        for requirement in &classification.special_requirements {
            requirements = requirements.bullet(requirement.as_str());
        }
        doc.sections.push(requirements);
    }

    if let Some(notes) = &record.additional_notes {
        doc.sections
            .push(Section::new("Additional Notes").note(notes.clone()));
    }

    let meta = &record.metadata;
    doc.sections.push(
        Section::new("Submission Details")
            .row("Entry point", record.entry_point.as_str())
            .row("Page", or_not_specified(meta.page_path.as_ref()))
            .row("User agent", or_not_specified(meta.user_agent.as_ref()))
            .row_if("Client timestamp", meta.client_timestamp.as_ref()),
    );

    doc.closing.push(format!("Reply directly to {} to follow up.", record.email.to_plain()).into());
    doc
}

fn customer_document(
    record: &QuoteRecord,
    classification: &Classification,
    ctx: &RenderContext<'_>,
    summary: &Section,
    contact: &Section,
    products: &[Section],
) -> EmailDocument {
    let priority = classification.priority;
    let mut doc = EmailDocument::new("Thank you for your quote request", accent(priority));
    doc.greeting = Some(format!("Dear {},", record.full_name.to_plain()).into());

    let interest = match record.entry_point {
        EntryPoint::Home => "quote request".to_string(),
        other => format!("{} quote request", other.label()),
    };
    doc.paragraphs.push(
        format!(
            "Thank you for contacting {}. We have received your {} and our team is already reviewing it.",
            ctx.brand.company, interest
        )
        .into(),
    );
    doc.paragraphs.push(
        format!(
            "Please quote reference {} in any correspondence about this request.",
            ctx.reference_id
        )
        .into(),
    );

    doc.sections.push(summary.clone());
    doc.sections.push(contact.clone().retitled("Your Details"));
    doc.sections.extend(products.iter().cloned());

    let mut steps = Section::new("What Happens Next");
    for step in next_steps(priority) {
        steps = steps.bullet(step);
    }
    doc.sections.push(steps.note(format!(
        "Questions in the meantime? Call us on {} or email {}.",
        ctx.brand.support_phone, ctx.brand.support_email
    )));

    doc.closing.push("Kind regards,".into());
    doc.closing
        .push(format!("The {} Team", ctx.brand.company.trim_start_matches("The ")).into());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::models::ReferenceId;
    use crate::templates::test_support::{brand, fixed_time};
    use crate::validation::validate_quote;
    use serde_json::json;

    fn render(body: serde_json::Value) -> (QuoteRecord, Classification, EmailPair, ReferenceId) {
        let record = validate_quote(&body).expect("valid quote");
        let classification = classify(&record);
        let reference_id = ReferenceId::generate("QUOTE", fixed_time());
        let brand = brand();
        let ctx = RenderContext {
            reference_id: &reference_id,
            rendered_at: fixed_time(),
            brand: &brand,
        };
        let emails = render_quote(&record, &classification, &ctx);
        (record, classification, emails, reference_id)
    }

    fn base() -> serde_json::Value {
        json!({
            "fullName": "Priya Shah",
            "email": "priya@example.com",
            "phone": "07700 900456",
        })
    }

    #[test]
    fn test_all_variants_agree_on_key_facts() {
        let mut body = base();
        body["smartWalls"] = json!({ "width": 4 });
        body["smartDevices"] = json!({ "devices": ["Hub"] });
        body["wallPanels"] = json!({});
        body["carbonRockBoards"] = json!({});
        let (_, classification, emails, reference_id) = render(body);
        assert_eq!(classification.priority, Priority::Premium);

        for variant in [
            &emails.admin.html,
            &emails.admin.text,
            &emails.customer.html,
            &emails.customer.text,
        ] {
            assert!(variant.contains(reference_id.as_str()));
            assert!(variant.contains("Premium"));
            assert!(variant.contains("£43,000"));
            assert!(variant.contains("priya@example.com"));
            assert!(variant.contains("07700 900456"));
            assert!(variant.contains("Within 2 business hours"));
        }
        assert!(emails.admin.subject.starts_with("[Premium] New Quote Request - Priya Shah"));
        assert!(emails.customer.subject.contains(reference_id.as_str()));
    }

    #[test]
    fn test_missing_payload_falls_back_to_general_inquiry() {
        let mut body = base();
        body["entryPoint"] = json!("smart-walls");
        let (_, _, emails, _) = render(body);
        assert!(emails.admin.text.contains(GENERAL_INQUIRY_NOTE));
        assert!(emails.customer.text.contains(GENERAL_INQUIRY_NOTE));
        assert!(emails.admin.html.contains("Smart Walls"));
    }

    #[test]
    fn test_entry_point_selects_its_own_section() {
        let mut body = base();
        body["entryPoint"] = json!("wall-panels");
        body["wallPanels"] = json!({ "panelType": "Fluted", "colour": "Sage" });
        body["carbonRockBoards"] = json!({ "boardType": "Marble" });
        let (_, classification, emails, _) = render(body);

        assert!(emails.admin.text.contains("WALL PANELS CONFIGURATION"));
        assert!(emails.admin.text.contains("Panel type: Fluted"));
        assert!(emails.admin.text.contains("Dimensions: Not specified"));
        assert!(!emails.admin.text.contains("CARBON ROCK BOARDS CONFIGURATION"));
        // Classification still counts every payload.
        assert_eq!(classification.product_count, 2);
        assert!(emails.admin.text.contains("Carbon rock board supply and installation"));
    }

    #[test]
    fn test_home_entry_lists_every_product() {
        let mut body = base();
        body["smartWalls"] = json!({ "style": "Minimal", "fireplace": true, "accessories": ["Shelf"] });
        body["smartDevices"] = json!({ "devices": [{ "name": "Sensor", "quantity": 2 }] });
        let (_, _, emails, _) = render(body);
        let text = &emails.admin.text;
        assert!(text.contains("SMART WALLS CONFIGURATION"));
        assert!(text.contains("Fireplace: Yes"));
        assert!(text.contains("Soundbar: Not specified"));
        assert!(text.contains("Accessories: Shelf"));
        assert!(text.contains("SMART DEVICES SELECTION"));
        assert!(text.contains("- 2 x Sensor"));
        assert!(!text.contains(GENERAL_INQUIRY_NOTE));
    }

    #[test]
    fn test_user_content_is_escaped_in_html_only() {
        let mut body = base();
        body["additionalNotes"] = json!("Budget & \"timing\" flexible <script>x()</script>");
        let (record, _, emails, _) = render(body);
        assert!(!emails.admin.html.contains("<script>"));
        assert!(emails.admin.html.contains("Budget &amp; &quot;timing&quot; flexible x()"));
        assert!(emails.admin.text.contains("Budget & \"timing\" flexible x()"));
        assert_eq!(
            record.additional_notes,
            Some(SafeText::escape("Budget & \"timing\" flexible x()"))
        );
    }

    #[test]
    fn test_customer_email_omits_internal_metadata() {
        let mut body = base();
        body["userAgent"] = json!("UnitTestAgent/1.0");
        let (_, _, emails, _) = render(body);
        assert!(emails.admin.text.contains("UnitTestAgent/1.0"));
        assert!(!emails.customer.text.contains("UnitTestAgent/1.0"));
        assert!(emails.customer.text.contains("Dear Priya Shah,"));
        assert!(emails.customer.text.contains("WHAT HAPPENS NEXT"));
    }
}
