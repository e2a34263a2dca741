//! Transactional email rendering.
//!
//! Each email is described once as an [`EmailDocument`] whose every field is
//! [`SafeText`], then rendered to HTML and to plain text from that same
//! document. The two variants therefore cannot disagree about the facts they
//! show, and nothing reaches the HTML without having been escaped.

mod contact;
mod quote;
mod subscription;

pub(crate) use contact::render_contact;
pub(crate) use quote::render_quote;
pub(crate) use subscription::render_subscription;

use crate::models::{ReferenceId, SafeText};
use chrono::{DateTime, Utc};

/// Company details printed in every email footer.
#[derive(Debug, Clone)]
pub(crate) struct Brand {
    pub company: String,
    pub website: String,
    pub support_phone: String,
    pub support_email: String,
}

/// Everything a renderer needs besides the record itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderContext<'a> {
    pub reference_id: &'a ReferenceId,
    pub rendered_at: DateTime<Utc>,
    pub brand: &'a Brand,
}

/// One finished email, ready for the mail provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderedEmail {
    /// Plain text, not HTML.
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// The admin notification and the acknowledgement sent to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmailPair {
    pub admin: RenderedEmail,
    pub customer: RenderedEmail,
}

#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub label: SafeText,
    pub value: SafeText,
}

/// A titled block of label/value rows, bullets and an optional closing note.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub heading: SafeText,
    pub rows: Vec<Row>,
    pub bullets: Vec<SafeText>,
    pub note: Option<SafeText>,
}

impl Section {
    pub(crate) fn new(heading: &str) -> Self {
        Self {
            heading: SafeText::escape(heading),
            rows: Vec::new(),
            bullets: Vec::new(),
            note: None,
        }
    }

    pub(crate) fn row(mut self, label: &str, value: impl Into<SafeText>) -> Self {
        self.rows.push(Row {
            label: SafeText::escape(label),
            value: value.into(),
        });
        self
    }

    /// Adds the row only when a value is present.
    pub(crate) fn row_if(self, label: &str, value: Option<&SafeText>) -> Self {
        match value {
            Some(v) => self.row(label, v.clone()),
            None => self,
        }
    }

    pub(crate) fn bullet(mut self, item: impl Into<SafeText>) -> Self {
        self.bullets.push(item.into());
        self
    }

    pub(crate) fn note(mut self, note: impl Into<SafeText>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub(crate) fn retitled(mut self, heading: &str) -> Self {
        self.heading = SafeText::escape(heading);
        self
    }
}

/// Renderer-independent description of one email.
#[derive(Debug, Clone)]
pub(crate) struct EmailDocument {
    pub title: SafeText,
    pub badge: Option<SafeText>,
    /// CSS colour for the header band and badge.
    pub accent: &'static str,
    pub greeting: Option<SafeText>,
    pub paragraphs: Vec<SafeText>,
    pub sections: Vec<Section>,
    pub closing: Vec<SafeText>,
}

impl EmailDocument {
    pub(crate) fn new(title: &str, accent: &'static str) -> Self {
        Self {
            title: SafeText::escape(title),
            badge: None,
            accent,
            greeting: None,
            paragraphs: Vec::new(),
            sections: Vec::new(),
            closing: Vec::new(),
        }
    }

    pub(crate) fn render(&self, subject: String, brand: &Brand) -> RenderedEmail {
        RenderedEmail {
            subject,
            html: self.to_html(brand),
            text: self.to_text(brand),
        }
    }

    pub(crate) fn to_html(&self, brand: &Brand) -> String {
        let badge = self
            .badge
            .as_ref()
            .map(|b| format!(r#"<span class="badge">{}</span>"#, b))
            .unwrap_or_default();
        let greeting = self
            .greeting
            .as_ref()
            .map(|g| format!("<p>{}</p>\n", g))
            .unwrap_or_default();
        let paragraphs: String = self
            .paragraphs
            .iter()
            .map(|p| format!("<p>{}</p>\n", multiline_html(p)))
            .collect();
        let sections: String = self.sections.iter().map(section_html).collect();
        let closing = self
            .closing
            .iter()
            .map(|line| line.as_html().to_string())
            .collect::<Vec<_>>()
            .join("<br>");

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: Arial, Helvetica, sans-serif;
            line-height: 1.6;
            color: #1f2937;
            max-width: 640px;
            margin: 0 auto;
            padding: 20px;
            background-color: #f3f4f6;
        }}
        .header {{
            background-color: {accent};
            color: #ffffff;
            padding: 24px;
            border-radius: 8px 8px 0 0;
        }}
        .header h1 {{
            margin: 0;
            font-size: 22px;
        }}
        .badge {{
            display: inline-block;
            margin-top: 8px;
            padding: 4px 10px;
            border-radius: 12px;
            background-color: #ffffff;
            color: {accent};
            font-size: 12px;
            font-weight: bold;
            letter-spacing: 0.5px;
        }}
        .content {{
            background-color: #ffffff;
            padding: 24px;
            border: 1px solid #e5e7eb;
        }}
        h2 {{
            font-size: 16px;
            color: {accent};
            border-bottom: 1px solid #e5e7eb;
            padding-bottom: 4px;
            margin-top: 24px;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
        }}
        td {{
            padding: 6px 8px;
            vertical-align: top;
            border-bottom: 1px solid #f3f4f6;
        }}
        td.label {{
            width: 40%;
            font-weight: bold;
            color: #4b5563;
        }}
        .note {{
            background-color: #f9fafb;
            border-left: 3px solid {accent};
            padding: 10px 12px;
        }}
        .footer {{
            padding: 16px;
            text-align: center;
            font-size: 12px;
            color: #6b7280;
        }}
    </style>
</head>
<body>
    <div class="header">
        <h1>{title}</h1>
        {badge}
    </div>
    <div class="content">
{greeting}{paragraphs}{sections}        <p>{closing}</p>
    </div>
    <div class="footer">
        <p><strong>{company}</strong><br>{website}<br>{phone} &middot; {email}</p>
        <p>This is an automated message from {company}.</p>
    </div>
</body>
</html>"#,
            title = self.title,
            accent = self.accent,
            badge = badge,
            greeting = greeting,
            paragraphs = paragraphs,
            sections = sections,
            closing = closing,
            company = SafeText::escape(&brand.company),
            website = SafeText::escape(&brand.website),
            phone = SafeText::escape(&brand.support_phone),
            email = SafeText::escape(&brand.support_email),
        )
    }

    pub(crate) fn to_text(&self, brand: &Brand) -> String {
        let mut out = String::new();
        let title = self.title.to_plain();
        out.push_str(&title);
        out.push('\n');
        out.push_str(&"=".repeat(title.chars().count()));
        out.push('\n');
        if let Some(badge) = &self.badge {
            out.push_str(&format!("[{}]\n", badge.to_plain()));
        }
        out.push('\n');

        if let Some(greeting) = &self.greeting {
            out.push_str(&format!("{}\n\n", greeting.to_plain()));
        }
        for paragraph in &self.paragraphs {
            out.push_str(&format!("{}\n\n", paragraph.to_plain()));
        }
        for section in &self.sections {
            out.push_str(&section_text(section));
        }
        for line in &self.closing {
            out.push_str(&format!("{}\n", line.to_plain()));
        }

        out.push_str(&format!(
            "\n---\n{}\n{}\n{} | {}\nThis is an automated message from {}.\n",
            brand.company, brand.website, brand.support_phone, brand.support_email, brand.company
        ));
        out
    }
}

fn multiline_html(text: &SafeText) -> String {
    text.as_html().replace('\n', "<br>")
}

fn section_html(section: &Section) -> String {
    let mut html = format!("        <h2>{}</h2>\n", section.heading);
    if !section.rows.is_empty() {
        html.push_str("        <table>\n");
        for row in &section.rows {
            html.push_str(&format!(
                "            <tr><td class=\"label\">{}</td><td>{}</td></tr>\n",
                row.label,
                multiline_html(&row.value)
            ));
        }
        html.push_str("        </table>\n");
    }
    if !section.bullets.is_empty() {
        html.push_str("        <ul>\n");
        for bullet in &section.bullets {
            html.push_str(&format!("            <li>{}</li>\n", bullet));
        }
        html.push_str("        </ul>\n");
    }
    if let Some(note) = &section.note {
        html.push_str(&format!(
            "        <p class=\"note\">{}</p>\n",
            multiline_html(note)
        ));
    }
    html
}

fn section_text(section: &Section) -> String {
    let heading = section.heading.to_plain().to_uppercase();
    let mut text = format!("{}\n{}\n", heading, "-".repeat(heading.chars().count()));
    for row in &section.rows {
        text.push_str(&format!("{}: {}\n", row.label.to_plain(), row.value.to_plain()));
    }
    for bullet in &section.bullets {
        text.push_str(&format!("- {}\n", bullet.to_plain()));
    }
    if let Some(note) = &section.note {
        text.push_str(&format!("{}\n", note.to_plain()));
    }
    text.push('\n');
    text
}

pub(crate) const NOT_SPECIFIED: &str = "Not specified";

/// The value, or "Not specified".
pub(crate) fn or_not_specified(value: Option<&SafeText>) -> SafeText {
    value
        .cloned()
        .unwrap_or_else(|| SafeText::escape(NOT_SPECIFIED))
}

pub(crate) fn yes_no(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "Yes",
        Some(false) => "No",
        None => NOT_SPECIFIED,
    }
}

/// Whole pounds with thousands separators, e.g. `£43,000`.
pub(crate) fn format_gbp(pounds: u32) -> String {
    let digits = pounds.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("£{}", grouped)
}

/// e.g. `17 October 2026 at 09:30 UTC`.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%-d %B %Y at %H:%M UTC").to_string()
}
