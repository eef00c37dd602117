//! Offline inference backend that simulates receipt OCR.
//!
//! No image is read. Extraction generates a plausible receipt whose flavour
//! follows keywords in the image path (a `grocery` path yields grocery items),
//! and is deterministic per path: the SHA-256 digest of the path drives every
//! choice. Classification matches keywords in the vendor and item names.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use sha2::{Digest, Sha256};

use expensetracker_shared::{Category, ExpenseError, Result, StageName};

use crate::{InferenceClient, InferenceRequest};

struct Profile {
    keywords: &'static [&'static str],
    vendors: &'static [&'static str],
    items: &'static [(&'static str, f64)],
}

const GROCERY: Profile = Profile {
    keywords: &["grocery", "groceries", "market", "supermarket", "produce"],
    vendors: &["Fresh Fields Market", "Corner Grocer", "Green Basket Foods"],
    items: &[
        ("Whole Milk 1L", 1.89),
        ("Sourdough Loaf", 4.50),
        ("Bananas (bunch)", 2.19),
        ("Free Range Eggs (12)", 5.49),
        ("Cheddar Cheese 200g", 3.99),
        ("Baby Spinach", 2.79),
    ],
};

const FUEL: Profile = Profile {
    keywords: &["fuel", "gas", "petrol", "diesel", "station"],
    vendors: &["Shell", "Chevron", "BP Express"],
    items: &[
        ("Unleaded Fuel (gal)", 3.79),
        ("Premium Fuel (gal)", 4.39),
        ("Windshield Washer Fluid", 5.99),
    ],
};

const DINING: Profile = Profile {
    keywords: &["restaurant", "dining", "dinner", "lunch", "cafe", "coffee", "bistro"],
    vendors: &["The Olive Bistro", "Blue Door Cafe", "Sakura Noodle House"],
    items: &[
        ("Margherita Pizza", 14.00),
        ("Caesar Salad", 9.50),
        ("Flat White", 4.25),
        ("Iced Tea", 3.00),
        ("Tiramisu", 7.50),
    ],
};

const TRAVEL: Profile = Profile {
    keywords: &["travel", "hotel", "flight", "airline", "taxi", "train", "uber"],
    vendors: &["Harbor View Hotel", "SkyLine Airways", "Metro Cab Co."],
    items: &[
        ("Room Night", 139.00),
        ("Checked Bag Fee", 35.00),
        ("Airport Transfer", 42.50),
        ("City Tax", 6.20),
    ],
};

const ENTERTAINMENT: Profile = Profile {
    keywords: &["cinema", "movie", "concert", "theatre", "theater", "ticket", "museum"],
    vendors: &["Grand Cinema", "Riverside Concert Hall", "City Museum"],
    items: &[
        ("Admission Ticket", 16.00),
        ("Popcorn (large)", 7.25),
        ("Event Programme", 5.00),
    ],
};

const GENERIC: Profile = Profile {
    keywords: &[],
    vendors: &["Office Depot", "Hardware Hub", "QuickPrint Services"],
    items: &[
        ("Printer Paper A4", 8.99),
        ("Ballpoint Pens (10)", 4.49),
        ("USB-C Cable", 12.99),
        ("Sticky Notes", 3.29),
    ],
};

const PROFILES: [&Profile; 5] = [&GROCERY, &FUEL, &DINING, &TRAVEL, &ENTERTAINMENT];

/// Keyword table for classification, checked in order.
const CATEGORY_KEYWORDS: [(Category, &[&str]); 5] = [
    (
        Category::Fuel,
        &["fuel", "gas", "petrol", "diesel", "shell", "chevron", "bp "],
    ),
    (
        Category::Groceries,
        &["grocer", "market", "foods", "milk", "eggs", "bananas", "spinach", "loaf"],
    ),
    (
        Category::Dining,
        &["bistro", "cafe", "restaurant", "noodle", "pizza", "salad", "tiramisu"],
    ),
    (
        Category::Travel,
        &["hotel", "airways", "airline", "cab co", "taxi", "room night", "bag fee", "transfer"],
    ),
    (
        Category::Entertainment,
        &["cinema", "concert", "museum", "ticket", "popcorn", "theatre"],
    ),
];

/// Deterministic local stand-in for the model service.
#[derive(Debug, Default)]
pub struct MockReceiptModel;

impl MockReceiptModel {
    pub fn new() -> Self {
        Self
    }

    /// Generate a receipt JSON document for `image_path`.
    pub fn extract(image_path: &str) -> serde_json::Value {
        let digest = Sha256::digest(image_path.as_bytes());
        let lowered = image_path.to_lowercase();
        let profile = PROFILES
            .into_iter()
            .find(|p| p.keywords.iter().any(|k| lowered.contains(k)))
            .unwrap_or(&GENERIC);

        let vendor = profile.vendors[digest[0] as usize % profile.vendors.len()];
        let item_count = 1 + digest[1] as usize % profile.items.len().min(4);

        let mut total_cents: u64 = 0;
        let line_items: Vec<serde_json::Value> = (0..item_count)
            .map(|i| {
                let (description, price) =
                    profile.items[(digest[2] as usize + i) % profile.items.len()];
                let quantity = 1 + u32::from(digest[3 + i] % 3);
                total_cents += u64::from(quantity) * (price * 100.0).round() as u64;
                serde_json::json!({
                    "description": description,
                    "quantity": quantity,
                    "price": price,
                })
            })
            .collect();

        let day_offset = u64::from(u16::from_be_bytes([digest[8], digest[9]]) % 365);
        let date = NaiveDate::from_ymd_opt(2025, 1, 1)
            .and_then(|d| d.checked_add_days(Days::new(day_offset)))
            .unwrap_or_default();

        serde_json::json!({
            "vendor_name": vendor,
            "transaction_date": date.format("%Y-%m-%d").to_string(),
            "total_amount": total_cents as f64 / 100.0,
            "line_items": line_items,
        })
    }

    /// Pick a category from vendor and item keywords.
    pub fn classify(receipt: &serde_json::Value) -> Category {
        let mut haystack = receipt["vendor_name"].as_str().unwrap_or_default().to_lowercase();
        if let Some(items) = receipt["line_items"].as_array() {
            for item in items {
                haystack.push(' ');
                haystack.push_str(&item["description"].as_str().unwrap_or_default().to_lowercase());
            }
        }

        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| haystack.contains(w)))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Other)
    }
}

#[async_trait]
impl InferenceClient for MockReceiptModel {
    async fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let response = match request.stage {
            StageName::Extraction => {
                let image_path = request.payload["image_path"].as_str().ok_or_else(|| {
                    ExpenseError::validation("extraction payload has no image_path")
                })?;
                Self::extract(image_path)
            }
            StageName::Classification => {
                serde_json::json!({ "category": Self::classify(&request.payload) })
            }
            StageName::Logging => {
                return Err(ExpenseError::validation(
                    "the logging stage does not use model inference",
                ));
            }
        };
        Ok(response.to_string())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-ocr"
    }
}
