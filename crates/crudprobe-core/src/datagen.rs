//! Synthetic test data.
//!
//! Every generated record embeds a [`UniqueToken`] in its display field.
//! Tokens are millisecond timestamps made strictly increasing within the
//! process, so two records never share a display value and validators can
//! locate "their" record among concurrent or leftover test data.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::registry::{EntityDescriptor, EntityType};

/// Prefix of every generated display value.
pub const TEST_DATA_PREFIX: &str = "AUTO_TEST";

/// Last token issued anywhere in the process.
static LAST_TOKEN: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing per-process token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UniqueToken(i64);

impl UniqueToken {
    /// The current time in milliseconds, bumped past the last issued token
    /// when the clock has not advanced.
    pub fn next() -> Self {
        let now = Utc::now().timestamp_millis();
        let previous = LAST_TOKEN
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Self(now.max(previous + 1))
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UniqueToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A generated field map for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestDataRecord {
    pub type_name: String,
    pub token: UniqueToken,
    pub display_field: String,
    pub fields: Map<String, Value>,
}

impl TestDataRecord {
    /// Value of the display field as text.
    pub fn display_value(&self) -> String {
        match self.fields.get(&self.display_field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Request body for a create call.
    pub fn to_body(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Produces collision-free payloads per entity type. Every generator draws
/// from the same process-wide token sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataGenerator;

impl DataGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Type-appropriate defaults merged with `overrides` (overrides win).
    ///
    /// An override of the display field replaces the tokenized value as-is.
    pub fn generate(
        &self,
        descriptor: &EntityDescriptor,
        overrides: Map<String, Value>,
    ) -> TestDataRecord {
        let token = UniqueToken::next();
        let mut fields = defaults(descriptor, token);
        fields.extend(overrides);
        TestDataRecord {
            type_name: descriptor.type_name.clone(),
            token,
            display_field: descriptor.display_field.clone(),
            fields,
        }
    }
}

fn date_offset(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

fn pick(options: &[&str], token: UniqueToken) -> Value {
    let len = i64::try_from(options.len()).unwrap_or(1).max(1);
    let index = usize::try_from(token.value().rem_euclid(len)).unwrap_or(0);
    options
        .get(index)
        .map_or(Value::Null, |option| Value::String((*option).to_string()))
}

fn defaults(descriptor: &EntityDescriptor, token: UniqueToken) -> Map<String, Value> {
    let Some(kind) = descriptor.kind else {
        return generic_defaults(descriptor, token);
    };
    let display = format!("{TEST_DATA_PREFIX}_{}_{token}", kind.label());
    let fields = match kind {
        EntityType::SeedVariety => json!({
            "name": display,
            "stockQuantity": 100,
            "minStockLevel": 20,
        }),
        EntityType::Crop => json!({
            "name": display,
            "category": pick(&["LEAFY_GREEN", "ROOT", "FRUITING", "HERB"], token),
            "daysToMaturity": 45,
        }),
        EntityType::CropPlan => json!({
            "name": display,
            "plannedStart": date_offset(7),
            "plannedEnd": date_offset(60),
            "status": "DRAFT",
        }),
        EntityType::Batch => json!({
            "batchCode": display,
            "quantity": 50,
            "sowDate": date_offset(0),
            "expectedHarvestDate": date_offset(45),
        }),
        EntityType::Customer => json!({
            "name": display,
            "email": format!("auto-test-{token}@example.test"),
            "customerType": pick(&["RETAIL", "WHOLESALE", "RESTAURANT"], token),
        }),
        EntityType::Order => json!({
            "reference": display,
            "orderDate": date_offset(0),
            "deliveryDate": date_offset(3),
            "status": "PENDING",
            "totalAmount": 125.5,
        }),
        EntityType::Supplier => json!({
            "name": display,
            "contactEmail": format!("supplier-{token}@example.test"),
        }),
        EntityType::Equipment => json!({
            "name": display,
            "condition": pick(&["GOOD", "FAIR", "NEEDS_REPAIR"], token),
            "purchaseDate": date_offset(-30),
        }),
        EntityType::InventoryTransaction => json!({
            "reference": display,
            "quantity": 10,
            "transactionType": pick(&["ADJUSTMENT", "RECEIPT", "USAGE"], token),
        }),
    };
    match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn generic_defaults(descriptor: &EntityDescriptor, token: UniqueToken) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        descriptor.display_field.clone(),
        Value::String(format!(
            "{TEST_DATA_PREFIX}_{}_{token}",
            descriptor.type_name
        )),
    );
    for field in &descriptor.required_fields {
        fields
            .entry(field.clone())
            .or_insert_with(|| Value::String(format!("{TEST_DATA_PREFIX}_{field}_{token}")));
    }
    fields
}
