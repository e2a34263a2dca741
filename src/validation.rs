//! Validates and sanitizes raw form submissions into trusted records.
//!
//! Every rule runs on every request and all failures are collected, so a
//! client sees the complete list of problems in one response. Validation
//! never fails on the shape of the body itself: a non-object body is treated
//! as one with every field missing.

use crate::error::FieldErrors;
use crate::models::{
    CarbonRockBoardsOptions, ClientMetadata, ContactRecord, EntryPoint, ExtraField, ProductLines,
    QuoteRecord, SafeText, SmartDevice, SmartDevicesOptions, SmartWallsOptions, SubscriptionRecord,
    WallPanelsOptions,
};
use lettre::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::str::FromStr;
use url::Url;

static TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Failed to compile tag regex pattern."));

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\s'.\-]+$").expect("Failed to compile name regex pattern.")
});

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-z0-9._%+-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$",
    )
    .expect("Failed to compile email regex pattern.")
});

static UK_PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\+44|0)\d{9,10}$").expect("Failed to compile UK phone regex pattern.")
});

static INTL_PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?\d{7,15}$").expect("Failed to compile international phone regex pattern.")
});

static PHONE_SEPARATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\-()]").expect("Failed to compile phone separator regex pattern.")
});

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 100;
const EMAIL_MAX_CHARS: usize = 254;
const SUBJECT_MAX_CHARS: usize = 150;
const MESSAGE_MIN_CHARS: usize = 10;
const MESSAGE_MAX_CHARS: usize = 5000;

/// Strips HTML tags and control characters (newlines and tabs survive), then trims.
pub(crate) fn strip_markup(raw: &str) -> String {
    let without_tags = TAG_REGEX.replace_all(raw, "");
    without_tags
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Full sanitization pass: strip markup, then HTML-escape what is left.
pub(crate) fn sanitize(raw: &str) -> SafeText {
    SafeText::escape(&strip_markup(raw))
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read-only view over the submitted JSON object. `null` counts as absent.
struct Fields<'a> {
    object: Option<&'a Map<String, Value>>,
}

enum RawText {
    Missing,
    Text(String),
    NotText,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value) -> Self {
        Self {
            object: value.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.object
            .and_then(|o| o.get(key))
            .filter(|v| !v.is_null())
    }

    /// The markup-stripped text of `key`. Empty strings count as missing.
    fn text(&self, key: &str) -> RawText {
        let stripped = match self.get(key) {
            None => return RawText::Missing,
            Some(Value::String(s)) => strip_markup(s),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return RawText::NotText,
        };
        if stripped.is_empty() {
            RawText::Missing
        } else {
            RawText::Text(stripped)
        }
    }

    /// Optional free text: sanitized if present, silently dropped if it is not text.
    fn optional(&self, key: &str) -> Option<SafeText> {
        match self.text(key) {
            RawText::Text(text) => Some(SafeText::escape(&text)),
            RawText::Missing | RawText::NotText => None,
        }
    }

    fn object(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }
}

fn required_text(
    fields: &Fields<'_>,
    key: &str,
    label: &str,
    errors: &mut FieldErrors,
) -> Option<String> {
    match fields.text(key) {
        RawText::Text(text) => Some(text),
        RawText::Missing => {
            errors.insert(key.to_string(), format!("{} is required", label));
            None
        }
        RawText::NotText => {
            errors.insert(key.to_string(), format!("{} must be text", label));
            None
        }
    }
}

fn check_full_name(name: &str) -> Result<(), String> {
    let length = name.chars().count();
    if length < NAME_MIN_CHARS {
        return Err(format!(
            "Full name must be at least {} characters",
            NAME_MIN_CHARS
        ));
    }
    if length > NAME_MAX_CHARS {
        return Err(format!(
            "Full name must be {} characters or fewer",
            NAME_MAX_CHARS
        ));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(
            "Full name may only contain letters, spaces, hyphens, apostrophes and periods"
                .to_string(),
        );
    }
    Ok(())
}

/// Returns the lower-cased address when valid.
fn check_email(email: &str) -> Result<String, String> {
    let lowered = email.trim().to_lowercase();
    if lowered.chars().count() > EMAIL_MAX_CHARS {
        return Err(format!(
            "Email address must be {} characters or fewer",
            EMAIL_MAX_CHARS
        ));
    }
    if !EMAIL_REGEX.is_match(&lowered) || Address::from_str(&lowered).is_err() {
        return Err("Please enter a valid email address".to_string());
    }
    Ok(lowered)
}

fn check_phone(phone: &str) -> Result<(), String> {
    let compact = PHONE_SEPARATORS.replace_all(phone, "");
    if UK_PHONE_REGEX.is_match(&compact) || INTL_PHONE_REGEX.is_match(&compact) {
        Ok(())
    } else {
        Err("Please enter a valid UK or international phone number".to_string())
    }
}

fn validated_name(
    fields: &Fields<'_>,
    required: bool,
    errors: &mut FieldErrors,
) -> Option<SafeText> {
    let name = if required {
        required_text(fields, "fullName", "Full name", errors)?
    } else {
        match fields.text("fullName") {
            RawText::Text(text) => text,
            RawText::Missing => return None,
            RawText::NotText => {
                errors.insert("fullName".to_string(), "Full name must be text".to_string());
                return None;
            }
        }
    };
    let name = single_line(&name);
    match check_full_name(&name) {
        Ok(()) => Some(SafeText::escape(&name)),
        Err(message) => {
            errors.insert("fullName".to_string(), message);
            None
        }
    }
}

fn validated_email(fields: &Fields<'_>, errors: &mut FieldErrors) -> Option<SafeText> {
    let email = required_text(fields, "email", "Email address", errors)?;
    match check_email(&email) {
        Ok(lowered) => Some(SafeText::escape(&lowered)),
        Err(message) => {
            errors.insert("email".to_string(), message);
            None
        }
    }
}

fn validated_phone(
    fields: &Fields<'_>,
    required: bool,
    errors: &mut FieldErrors,
) -> Option<SafeText> {
    let phone = if required {
        required_text(fields, "phone", "Phone number", errors)?
    } else {
        match fields.text("phone") {
            RawText::Text(text) => text,
            RawText::Missing => return None,
            RawText::NotText => {
                errors.insert("phone".to_string(), "Phone number must be text".to_string());
                return None;
            }
        }
    };
    let phone = single_line(&phone);
    match check_phone(&phone) {
        Ok(()) => Some(SafeText::escape(&phone)),
        Err(message) => {
            errors.insert("phone".to_string(), message);
            None
        }
    }
}

fn validated_entry_point(fields: &Fields<'_>, errors: &mut FieldErrors) -> EntryPoint {
    let parsed = match fields.text("entryPoint") {
        RawText::Missing => Ok(EntryPoint::Home),
        RawText::Text(text) => text.parse::<EntryPoint>(),
        RawText::NotText => Err(String::new()),
    };
    parsed.unwrap_or_else(|_| {
        let allowed: Vec<&str> = EntryPoint::ALL.iter().map(|e| e.as_str()).collect();
        errors.insert(
            "entryPoint".to_string(),
            format!("Entry point must be one of: {}", allowed.join(", ")),
        );
        EntryPoint::Home
    })
}

fn client_metadata(fields: &Fields<'_>) -> ClientMetadata {
    let page_path = match fields.text("pageUrl") {
        RawText::Text(raw) => match Url::parse(&raw) {
            Ok(url) => Some(sanitize(url.path())),
            Err(_) => Some(SafeText::escape(&raw)),
        },
        _ => None,
    };
    ClientMetadata {
        page_path,
        user_agent: fields.optional("userAgent"),
        client_timestamp: fields
            .optional("submittedAt")
            .or_else(|| fields.optional("timestamp")),
    }
}

/// Validates a quote request body.
pub(crate) fn validate_quote(body: &Value) -> Result<QuoteRecord, FieldErrors> {
    let fields = Fields::new(body);
    let mut errors = FieldErrors::new();

    let full_name = validated_name(&fields, true, &mut errors);
    let email = validated_email(&fields, &mut errors);
    let phone = validated_phone(&fields, true, &mut errors);
    let entry_point = validated_entry_point(&fields, &mut errors);

    match (full_name, email, phone) {
        (Some(full_name), Some(email), Some(phone)) if errors.is_empty() => {
            let products = product_lines(&fields);
            if entry_point != EntryPoint::Home && !products.has_payload_for(entry_point) {
                tracing::debug!(target: "validation_task",
                    "Entry point '{}' submitted without its product payload ({} other payloads)",
                    entry_point, products.count()
                );
            }
            Ok(QuoteRecord {
                full_name,
                email,
                phone,
                installation_address: fields.optional("installationAddress"),
                additional_notes: fields.optional("additionalNotes"),
                product_category: fields
                    .optional("productCategory")
                    .map(|c| SafeText::escape(&single_line(&c.to_plain()))),
                entry_point,
                products,
                metadata: client_metadata(&fields),
            })
        }
        _ => {
            tracing::debug!(target: "validation_task", "Quote rejected: {:?}", errors);
            Err(errors)
        }
    }
}

/// Validates a contact-form body.
pub(crate) fn validate_contact(body: &Value) -> Result<ContactRecord, FieldErrors> {
    let fields = Fields::new(body);
    let mut errors = FieldErrors::new();

    let full_name = validated_name(&fields, true, &mut errors);
    let email = validated_email(&fields, &mut errors);
    let phone = validated_phone(&fields, false, &mut errors);

    let subject = fields.optional("subject").map(|s| single_line(&s.to_plain()));
    if let Some(subject) = &subject {
        if subject.chars().count() > SUBJECT_MAX_CHARS {
            errors.insert(
                "subject".to_string(),
                format!("Subject must be {} characters or fewer", SUBJECT_MAX_CHARS),
            );
        }
    }

    let message = required_text(&fields, "message", "Message", &mut errors);
    if let Some(message) = &message {
        let length = message.chars().count();
        if length < MESSAGE_MIN_CHARS {
            errors.insert(
                "message".to_string(),
                format!("Message must be at least {} characters", MESSAGE_MIN_CHARS),
            );
        } else if length > MESSAGE_MAX_CHARS {
            errors.insert(
                "message".to_string(),
                format!("Message must be {} characters or fewer", MESSAGE_MAX_CHARS),
            );
        }
    }

    match (full_name, email, message) {
        (Some(full_name), Some(email), Some(message)) if errors.is_empty() => Ok(ContactRecord {
            full_name,
            email,
            phone,
            subject: subject.map(|s| SafeText::escape(&s)),
            message: SafeText::escape(&message),
            metadata: client_metadata(&fields),
        }),
        _ => {
            tracing::debug!(target: "validation_task", "Contact message rejected: {:?}", errors);
            Err(errors)
        }
    }
}

/// Validates a newsletter sign-up body.
pub(crate) fn validate_subscription(body: &Value) -> Result<SubscriptionRecord, FieldErrors> {
    let fields = Fields::new(body);
    let mut errors = FieldErrors::new();

    let email = validated_email(&fields, &mut errors);
    let full_name = validated_name(&fields, false, &mut errors);

    match email {
        Some(email) if errors.is_empty() => Ok(SubscriptionRecord {
            email,
            full_name,
            source: fields.optional("source"),
            metadata: client_metadata(&fields),
        }),
        _ => {
            tracing::debug!(target: "validation_task", "Subscription rejected: {:?}", errors);
            Err(errors)
        }
    }
}

/// Lenient reader over an opaque configurator payload.
///
/// Payloads are never rejected: unknown shapes simply yield `None` for the
/// affected field, and unrecognised scalar keys are kept as extras.
struct Blob<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Blob<'a> {
    fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.map.get(*k))
            .find(|v| !v.is_null())
    }

    fn text(&self, keys: &[&str]) -> Option<SafeText> {
        scalar_text(self.first(keys)?).map(|t| SafeText::escape(&t))
    }

    fn flag(&self, keys: &[&str]) -> Option<bool> {
        match self.first(keys)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(true),
                "false" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn count(&self, keys: &[&str]) -> Option<u32> {
        match self.first(keys)? {
            Value::Number(n) => n.as_u64().and_then(|q| u32::try_from(q).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn list(&self, keys: &[&str]) -> Vec<SafeText> {
        match self.first(keys) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(scalar_text)
                .map(|t| SafeText::escape(&t))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(strip_markup)
                .filter(|t| !t.is_empty())
                .map(|t| SafeText::escape(&t))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn extras(&self, known: &[&str]) -> Vec<ExtraField> {
        self.map
            .iter()
            .filter(|(key, _)| !known.contains(&key.as_str()))
            .filter_map(|(key, value)| {
                let name = strip_markup(key);
                let value = scalar_text(value)?;
                (!name.is_empty()).then(|| ExtraField {
                    name: SafeText::escape(&name),
                    value: SafeText::escape(&value),
                })
            })
            .collect()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => strip_markup(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

const SMART_WALL_KEYS: &[&str] = &[
    "width", "wallWidth", "height", "wallHeight", "style", "design", "finish", "material",
    "tvSize", "tv", "fireplace", "includeFireplace", "lighting", "ledLighting", "soundbar",
    "storage", "accessories", "addOns",
];

fn smart_walls(map: &Map<String, Value>) -> SmartWallsOptions {
    let blob = Blob { map };
    SmartWallsOptions {
        width: blob.text(&["width", "wallWidth"]),
        height: blob.text(&["height", "wallHeight"]),
        style: blob.text(&["style", "design"]),
        finish: blob.text(&["finish", "material"]),
        tv_size: blob.text(&["tvSize", "tv"]),
        fireplace: blob.flag(&["fireplace", "includeFireplace"]),
        lighting: blob.flag(&["lighting", "ledLighting"]),
        soundbar: blob.flag(&["soundbar"]),
        storage: blob.flag(&["storage"]),
        accessories: blob.list(&["accessories", "addOns"]),
        extras: blob.extras(SMART_WALL_KEYS),
    }
}

const SMART_DEVICE_KEYS: &[&str] = &[
    "devices",
    "selectedDevices",
    "controlHub",
    "hub",
    "installation",
    "professionalInstallation",
];

fn smart_device(value: &Value) -> Option<SmartDevice> {
    match value {
        Value::Object(map) => {
            let blob = Blob { map };
            Some(SmartDevice {
                name: blob.text(&["name", "device", "title", "id"])?,
                quantity: blob.count(&["quantity", "qty"]).unwrap_or(1),
            })
        }
        other => scalar_text(other).map(|name| SmartDevice {
            name: SafeText::escape(&name),
            quantity: 1,
        }),
    }
}

fn smart_devices(map: &Map<String, Value>) -> SmartDevicesOptions {
    let blob = Blob { map };
    let devices = match blob.first(&["devices", "selectedDevices"]) {
        Some(Value::Array(items)) => items.iter().filter_map(smart_device).collect(),
        _ => Vec::new(),
    };
    SmartDevicesOptions {
        devices,
        control_hub: blob.text(&["controlHub", "hub"]),
        installation_required: blob.flag(&["installation", "professionalInstallation"]),
        extras: blob.extras(SMART_DEVICE_KEYS),
    }
}

const WALL_PANEL_KEYS: &[&str] = &[
    "panelType", "type", "colour", "color", "finish", "width", "height", "quantity", "panels",
    "panelCount",
];

fn wall_panels(map: &Map<String, Value>) -> WallPanelsOptions {
    let blob = Blob { map };
    WallPanelsOptions {
        panel_type: blob.text(&["panelType", "type"]),
        colour: blob.text(&["colour", "color"]),
        finish: blob.text(&["finish"]),
        width: blob.text(&["width"]),
        height: blob.text(&["height"]),
        quantity: blob.count(&["quantity", "panels", "panelCount"]),
        extras: blob.extras(WALL_PANEL_KEYS),
    }
}

const CARBON_ROCK_KEYS: &[&str] = &[
    "boardType", "type", "thickness", "finish", "width", "height", "quantity", "boards",
    "boardCount",
];

fn carbon_rock_boards(map: &Map<String, Value>) -> CarbonRockBoardsOptions {
    let blob = Blob { map };
    CarbonRockBoardsOptions {
        board_type: blob.text(&["boardType", "type"]),
        thickness: blob.text(&["thickness"]),
        finish: blob.text(&["finish"]),
        width: blob.text(&["width"]),
        height: blob.text(&["height"]),
        quantity: blob.count(&["quantity", "boards", "boardCount"]),
        extras: blob.extras(CARBON_ROCK_KEYS),
    }
}

fn product_lines(fields: &Fields<'_>) -> ProductLines {
    ProductLines {
        smart_walls: fields.object("smartWalls").map(smart_walls),
        smart_devices: fields.object("smartDevices").map(smart_devices),
        wall_panels: fields.object("wallPanels").map(wall_panels),
        carbon_rock_boards: fields.object("carbonRockBoards").map(carbon_rock_boards),
    }
}
