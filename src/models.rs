//! Defines the core data structures used by the form-intake pipeline.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Text that has already been sanitized and HTML-escaped.
///
/// Every string that leaves the validator is wrapped in this type, so it can
/// be interpolated into HTML verbatim. Plain-text emails use [`SafeText::to_plain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct SafeText(String);

impl SafeText {
    /// Escapes `& < > " '` in `raw`.
    pub(crate) fn escape(raw: &str) -> Self {
        Self(html_escape::encode_quoted_attribute(raw).into_owned())
    }

    pub(crate) fn as_html(&self) -> &str {
        &self.0
    }

    /// The human-readable form, with entities decoded.
    pub(crate) fn to_plain(&self) -> String {
        html_escape::decode_html_entities(&self.0).into_owned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SafeText {
    fn from(raw: &str) -> Self {
        Self::escape(raw)
    }
}

impl From<String> for SafeText {
    fn from(raw: String) -> Self {
        Self::escape(&raw)
    }
}

impl fmt::Display for SafeText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The product-line context a quote request originates from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum EntryPoint {
    #[default]
    Home,
    SmartWalls,
    SmartDevices,
    WallPanels,
    CarbonRockBoards,
}

impl EntryPoint {
    pub(crate) const ALL: [EntryPoint; 5] = [
        EntryPoint::Home,
        EntryPoint::SmartWalls,
        EntryPoint::SmartDevices,
        EntryPoint::WallPanels,
        EntryPoint::CarbonRockBoards,
    ];

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Home => "home",
            EntryPoint::SmartWalls => "smart-walls",
            EntryPoint::SmartDevices => "smart-devices",
            EntryPoint::WallPanels => "wall-panels",
            EntryPoint::CarbonRockBoards => "carbon-rock-boards",
        }
    }

    /// Display name used in email subjects and headings.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            EntryPoint::Home => "General Enquiry",
            EntryPoint::SmartWalls => "Smart Walls",
            EntryPoint::SmartDevices => "Smart Devices",
            EntryPoint::WallPanels => "Wall Panels",
            EntryPoint::CarbonRockBoards => "Carbon Rock Boards",
        }
    }
}

impl FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryPoint::ALL
            .into_iter()
            .find(|entry| entry.as_str() == s)
            .ok_or_else(|| format!("Unknown entry point '{}'", s))
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-supplied field the typed payloads do not model, kept for the admin email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtraField {
    pub name: SafeText,
    pub value: SafeText,
}

/// Smart wall configurator selections.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SmartWallsOptions {
    pub width: Option<SafeText>,
    pub height: Option<SafeText>,
    pub style: Option<SafeText>,
    pub finish: Option<SafeText>,
    pub tv_size: Option<SafeText>,
    pub fireplace: Option<bool>,
    pub lighting: Option<bool>,
    pub soundbar: Option<bool>,
    pub storage: Option<bool>,
    pub accessories: Vec<SafeText>,
    pub extras: Vec<ExtraField>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SmartDevice {
    pub name: SafeText,
    pub quantity: u32,
}

/// Smart device selections (hubs, switches, sensors...).
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SmartDevicesOptions {
    pub devices: Vec<SmartDevice>,
    pub control_hub: Option<SafeText>,
    pub installation_required: Option<bool>,
    pub extras: Vec<ExtraField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WallPanelsOptions {
    pub panel_type: Option<SafeText>,
    pub colour: Option<SafeText>,
    pub finish: Option<SafeText>,
    pub width: Option<SafeText>,
    pub height: Option<SafeText>,
    pub quantity: Option<u32>,
    pub extras: Vec<ExtraField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CarbonRockBoardsOptions {
    pub board_type: Option<SafeText>,
    pub thickness: Option<SafeText>,
    pub finish: Option<SafeText>,
    pub width: Option<SafeText>,
    pub height: Option<SafeText>,
    pub quantity: Option<u32>,
    pub extras: Vec<ExtraField>,
}

/// The product payloads attached to a quote. Any combination may be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ProductLines {
    pub smart_walls: Option<SmartWallsOptions>,
    pub smart_devices: Option<SmartDevicesOptions>,
    pub wall_panels: Option<WallPanelsOptions>,
    pub carbon_rock_boards: Option<CarbonRockBoardsOptions>,
}

impl ProductLines {
    /// Number of populated payloads.
    pub(crate) fn count(&self) -> usize {
        [
            self.smart_walls.is_some(),
            self.smart_devices.is_some(),
            self.wall_panels.is_some(),
            self.carbon_rock_boards.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// Whether the payload matching `entry` is present. `Home` matches any payload.
    pub(crate) fn has_payload_for(&self, entry: EntryPoint) -> bool {
        match entry {
            EntryPoint::Home => self.count() > 0,
            EntryPoint::SmartWalls => self.smart_walls.is_some(),
            EntryPoint::SmartDevices => self.smart_devices.is_some(),
            EntryPoint::WallPanels => self.wall_panels.is_some(),
            EntryPoint::CarbonRockBoards => self.carbon_rock_boards.is_some(),
        }
    }
}

/// Advisory client-side details. Never used for security decisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ClientMetadata {
    pub page_path: Option<SafeText>,
    pub user_agent: Option<SafeText>,
    pub client_timestamp: Option<SafeText>,
}

/// A validated quote request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuoteRecord {
    pub full_name: SafeText,
    pub email: SafeText,
    pub phone: SafeText,
    pub installation_address: Option<SafeText>,
    pub additional_notes: Option<SafeText>,
    pub product_category: Option<SafeText>,
    pub entry_point: EntryPoint,
    pub products: ProductLines,
    pub metadata: ClientMetadata,
}

/// A validated contact-form message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContactRecord {
    pub full_name: SafeText,
    pub email: SafeText,
    pub phone: Option<SafeText>,
    pub subject: Option<SafeText>,
    pub message: SafeText,
    pub metadata: ClientMetadata,
}

/// A validated newsletter sign-up.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubscriptionRecord {
    pub email: SafeText,
    pub full_name: Option<SafeText>,
    pub source: Option<SafeText>,
    pub metadata: ClientMetadata,
}

/// Coarse urgency tier for follow-up.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Priority {
    Standard,
    Urgent,
    Premium,
}

impl Priority {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Priority::Standard => "standard",
            Priority::Urgent => "urgent",
            Priority::Premium => "premium",
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Priority::Standard => "Standard",
            Priority::Urgent => "Urgent",
            Priority::Premium => "Premium",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Complexity {
    Standard,
    Complex,
    Premium,
}

impl Complexity {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Complexity::Standard => "Standard",
            Complexity::Complex => "Complex",
            Complexity::Premium => "Premium",
        }
    }
}

/// Derived from a [`QuoteRecord`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classification {
    pub priority: Priority,
    /// Whole pounds.
    pub estimated_value: u32,
    pub product_count: usize,
    pub complexity: Complexity,
    pub special_requirements: Vec<String>,
}

/// Opaque correlation id handed back to the client, e.g. `QUOTE-LX3K2F9A-4KD2Q`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub(crate) struct ReferenceId(String);

impl ReferenceId {
    pub(crate) fn generate(prefix: &str, now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        // Five base-36 digits, with a non-zero leading digit.
        let suffix = rand::thread_rng().gen_range(36u64.pow(4)..36u64.pow(5));
        Self(format!("{}-{}-{}", prefix, to_base36(millis), to_base36(suffix)).to_uppercase())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Who an outbound email is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RecipientRole {
    Admin,
    Customer,
}

impl RecipientRole {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::Admin => "admin",
            RecipientRole::Customer => "customer",
        }
    }
}

/// Result of one outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SendOutcome {
    pub role: RecipientRole,
    /// Provider-assigned message id when the send succeeded.
    pub message_id: Option<String>,
    /// Error text when it failed.
    pub error: Option<String>,
}

impl SendOutcome {
    pub(crate) fn succeeded(&self) -> bool {
        self.message_id.is_some()
    }
}

/// Outcome of dispatching every email for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    pub reference_id: ReferenceId,
    pub outcomes: Vec<SendOutcome>,
}

impl DispatchReport {
    pub(crate) fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    /// Message ids of the sends that succeeded, keyed by recipient role.
    pub(crate) fn email_ids(&self) -> BTreeMap<&'static str, String> {
        self.outcomes
            .iter()
            .filter_map(|o| o.message_id.clone().map(|id| (o.role.as_str(), id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_safe_text_escapes_and_restores() {
        let text = SafeText::escape(r#"Tom & "Jerry" <b>'s"#);
        assert!(!text.as_html().contains('<'));
        assert!(!text.as_html().contains('"'));
        assert!(!text.as_html().contains('\''));
        assert_eq!(text.to_plain(), r#"Tom & "Jerry" <b>'s"#);
    }

    #[test]
    fn test_entry_point_parsing() {
        assert_eq!("smart-walls".parse::<EntryPoint>().unwrap(), EntryPoint::SmartWalls);
        assert_eq!(
            "carbon-rock-boards".parse::<EntryPoint>().unwrap(),
            EntryPoint::CarbonRockBoards
        );
        assert!("kitchens".parse::<EntryPoint>().is_err());
        assert_eq!(EntryPoint::default(), EntryPoint::Home);
    }

    #[test]
    fn test_product_count() {
        let mut lines = ProductLines::default();
        assert_eq!(lines.count(), 0);
        assert!(!lines.has_payload_for(EntryPoint::Home));
        lines.wall_panels = Some(WallPanelsOptions::default());
        lines.smart_walls = Some(SmartWallsOptions::default());
        assert_eq!(lines.count(), 2);
        assert!(lines.has_payload_for(EntryPoint::Home));
        assert!(lines.has_payload_for(EntryPoint::WallPanels));
        assert!(!lines.has_payload_for(EntryPoint::SmartDevices));
    }

    #[test]
    fn test_reference_id_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap();
        let id = ReferenceId::generate("QUOTE", now);
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "QUOTE");
        assert_eq!(parts[1], to_base36(now.timestamp_millis() as u64).to_uppercase());
        assert_eq!(parts[2].len(), 5);
        assert_eq!(id.as_str(), id.as_str().to_uppercase());
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_295), "zz");
    }

    #[test]
    fn test_dispatch_report_email_ids_only_successes() {
        let report = DispatchReport {
            reference_id: ReferenceId("QUOTE-1-ABCDE".to_string()),
            outcomes: vec![
                SendOutcome {
                    role: RecipientRole::Admin,
                    message_id: None,
                    error: Some("boom".to_string()),
                },
                SendOutcome {
                    role: RecipientRole::Customer,
                    message_id: Some("msg_2".to_string()),
                    error: None,
                },
            ],
        };
        assert_eq!(report.successes(), 1);
        let ids = report.email_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.get("customer").map(String::as_str), Some("msg_2"));
    }
}
