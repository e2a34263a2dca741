//! Rule-based priority classification for quote requests.

use crate::models::{Classification, Complexity, Priority, QuoteRecord};

const BASE_VALUE: u32 = 5_000;
const SMART_WALLS_VALUE: u32 = 15_000;
const SMART_DEVICES_VALUE: u32 = 8_000;
const WALL_PANELS_VALUE: u32 = 5_000;
const CARBON_ROCK_BOARDS_VALUE: u32 = 10_000;

/// Strictly above this estimate a quote is premium.
const PREMIUM_THRESHOLD: u32 = 30_000;
/// Strictly above this many product lines a quote is urgent.
const URGENT_PRODUCT_COUNT: usize = 2;

/// Classifies a validated quote. Pure: the same record always yields the same result.
pub(crate) fn classify(record: &QuoteRecord) -> Classification {
    let products = &record.products;
    let lines = [
        (
            products.smart_walls.is_some(),
            SMART_WALLS_VALUE,
            "Smart wall system design and installation",
        ),
        (
            products.smart_devices.is_some(),
            SMART_DEVICES_VALUE,
            "Smart device integration",
        ),
        (
            products.wall_panels.is_some(),
            WALL_PANELS_VALUE,
            "Decorative wall panel supply and fitting",
        ),
        (
            products.carbon_rock_boards.is_some(),
            CARBON_ROCK_BOARDS_VALUE,
            "Carbon rock board supply and installation",
        ),
    ];

    let mut estimated_value = BASE_VALUE;
    let mut special_requirements = Vec::new();
    for (present, value, requirement) in lines {
        if present {
            estimated_value += value;
            special_requirements.push(requirement.to_string());
        }
    }
    let product_count = special_requirements.len();

    let (priority, complexity) = if estimated_value > PREMIUM_THRESHOLD {
        (Priority::Premium, Complexity::Premium)
    } else if product_count > URGENT_PRODUCT_COUNT {
        (Priority::Urgent, Complexity::Complex)
    } else {
        (Priority::Standard, Complexity::Standard)
    };

    tracing::debug!(target: "quote_task",
        "Classified quote: value={} products={} priority={}",
        estimated_value, product_count, priority
    );

    Classification {
        priority,
        estimated_value,
        product_count,
        complexity,
        special_requirements,
    }
}

/// How quickly the team commits to respond for a priority tier.
pub(crate) fn estimated_response(priority: Priority) -> &'static str {
    match priority {
        Priority::Premium => "Within 2 business hours",
        Priority::Urgent => "Within 4 business hours",
        Priority::Standard => "Within 24 hours",
    }
}

/// The follow-up steps promised to the customer for a priority tier.
pub(crate) fn next_steps(priority: Priority) -> Vec<&'static str> {
    match priority {
        Priority::Premium => vec![
            "A senior design consultant will call you within 2 business hours",
            "We will arrange a free in-home design consultation at a time that suits you",
            "You will receive a detailed 3D visualisation and itemised proposal",
            "Your dedicated project manager will guide you through installation",
        ],
        Priority::Urgent => vec![
            "Our specialist team will contact you within 4 business hours",
            "We will review your combined product requirements in detail",
            "A site survey will be scheduled to confirm measurements",
            "You will receive a comprehensive written quote",
        ],
        Priority::Standard => vec![
            "Our team will review your requirements and contact you within 24 hours",
            "We will discuss your project and answer any questions",
            "A site survey can be arranged if needed",
            "You will receive a detailed written quote",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CarbonRockBoardsOptions, ClientMetadata, EntryPoint, ProductLines, SafeText,
        SmartDevicesOptions, SmartWallsOptions, WallPanelsOptions,
    };

    fn record(walls: bool, devices: bool, panels: bool, boards: bool) -> QuoteRecord {
        QuoteRecord {
            full_name: SafeText::escape("Test Customer"),
            email: SafeText::escape("test@example.com"),
            phone: SafeText::escape("07700900123"),
            installation_address: None,
            additional_notes: None,
            product_category: None,
            entry_point: EntryPoint::Home,
            products: ProductLines {
                smart_walls: walls.then(SmartWallsOptions::default),
                smart_devices: devices.then(SmartDevicesOptions::default),
                wall_panels: panels.then(WallPanelsOptions::default),
                carbon_rock_boards: boards.then(CarbonRockBoardsOptions::default),
            },
            metadata: ClientMetadata::default(),
        }
    }

    #[test]
    fn test_classification_table() {
        // (walls, devices, panels, boards) -> (value, count, priority, complexity)
        let cases = [
            ((false, false, false, false), 5_000, 0, Priority::Standard, "Standard"),
            ((false, true, false, false), 13_000, 1, Priority::Standard, "Standard"),
            ((true, false, false, true), 30_000, 2, Priority::Standard, "Standard"),
            ((false, true, true, true), 28_000, 3, Priority::Urgent, "Complex"),
            ((true, true, false, false), 28_000, 2, Priority::Standard, "Standard"),
            ((true, true, true, false), 33_000, 3, Priority::Premium, "Premium"),
            ((true, false, true, true), 35_000, 3, Priority::Premium, "Premium"),
            ((true, true, true, true), 43_000, 4, Priority::Premium, "Premium"),
        ];

        for ((w, d, p, b), value, count, priority, complexity) in cases {
            let result = classify(&record(w, d, p, b));
            assert_eq!(result.estimated_value, value, "value for {:?}", (w, d, p, b));
            assert_eq!(result.product_count, count);
            assert_eq!(result.priority, priority, "priority for {:?}", (w, d, p, b));
            assert_eq!(result.complexity.label(), complexity);
            assert_eq!(result.special_requirements.len(), count);
        }
    }

    #[test]
    fn test_classification_is_idempotent() {
        let r = record(true, false, true, false);
        assert_eq!(classify(&r), classify(&r));
    }

    #[test]
    fn test_special_requirements_order() {
        let result = classify(&record(true, true, true, true));
        assert_eq!(
            result.special_requirements,
            vec![
                "Smart wall system design and installation",
                "Smart device integration",
                "Decorative wall panel supply and fitting",
                "Carbon rock board supply and installation",
            ]
        );
    }

    #[test]
    fn test_priority_wording() {
        assert_eq!(estimated_response(Priority::Premium), "Within 2 business hours");
        assert_eq!(next_steps(Priority::Standard).len(), 4);
        assert_ne!(next_steps(Priority::Urgent), next_steps(Priority::Premium));
    }
}
