//! Raw transaction as received at the system boundary

use crate::error::{ScoringError, ScoringResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Number of anonymized numeric components (`V1`..`V28`).
pub const COMPONENT_COUNT: usize = 28;

/// Names of the anonymized components, in schema order.
pub const COMPONENT_NAMES: [&str; COMPONENT_COUNT] = [
    "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "V10", "V11", "V12", "V13", "V14",
    "V15", "V16", "V17", "V18", "V19", "V20", "V21", "V22", "V23", "V24", "V25", "V26", "V27",
    "V28",
];

/// Training label column; tolerated in payloads but never used as a feature.
const LABEL_FIELD: &str = "Class";

/// Categorical identifiers a caller may supply instead of having them synthesized.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Identifiers {
    pub merchant_id: Option<f64>,
    /// Device code: 0 = mobile, 1 = desktop, 2 = pos, 3 = tablet
    pub device_type: Option<f64>,
    pub geo_bucket: Option<f64>,
    pub account_id: Option<f64>,
}

/// One financial transaction, validated at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct RawTransaction {
    /// Offset in seconds from the dataset epoch
    pub time: f64,
    /// Transaction amount
    pub amount: f64,
    /// Anonymized components `V1`..`V28`
    pub components: [f64; COMPONENT_COUNT],
    /// Position of this row in the training batch, when known
    pub row_index: Option<u64>,
    /// Caller-supplied categorical identifiers
    pub identifiers: Identifiers,
}

impl RawTransaction {
    /// Create a transaction with all components zeroed.
    pub fn new(time: f64, amount: f64) -> Self {
        Self {
            time,
            amount,
            components: [0.0; COMPONENT_COUNT],
            row_index: None,
            identifiers: Identifiers::default(),
        }
    }

    /// Set component `V{n}` (1-based, matching the field name).
    pub fn with_component(mut self, n: usize, value: f64) -> Self {
        if (1..=COMPONENT_COUNT).contains(&n) {
            self.components[n - 1] = value;
        }
        self
    }

    pub fn with_row_index(mut self, row_index: u64) -> Self {
        self.row_index = Some(row_index);
        self
    }

    pub fn with_identifiers(mut self, identifiers: Identifiers) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// Parse and validate a flat JSON object of field name to number.
    pub fn from_json_map(map: &Map<String, Value>) -> ScoringResult<Self> {
        let time = required_number(map, "Time")?;
        let amount = required_number(map, "Amount")?;
        if amount < 0.0 {
            return Err(ScoringError::invalid_input(
                "Amount",
                format!("must be non-negative, got {amount}"),
            ));
        }

        let mut components = [0.0; COMPONENT_COUNT];
        for (slot, name) in components.iter_mut().zip(COMPONENT_NAMES) {
            if let Some(value) = optional_number(map, name)? {
                *slot = value;
            }
        }

        let row_index = match optional_number(map, "row_index")? {
            Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Some(v as u64),
            Some(v) => {
                return Err(ScoringError::invalid_input(
                    "row_index",
                    format!("must be a non-negative integer, got {v}"),
                ))
            }
            None => None,
        };

        let identifiers = Identifiers {
            merchant_id: optional_number(map, "merchant_id")?,
            device_type: optional_number(map, "device_type")?,
            geo_bucket: optional_number(map, "geo_bucket")?,
            account_id: optional_number(map, "account_id")?,
        };

        for key in map.keys() {
            if !is_known_field(key) {
                debug!(field = %key, "Ignoring unknown raw field");
            }
        }

        Ok(Self {
            time,
            amount,
            components,
            row_index,
            identifiers,
        })
    }

    /// Parse a JSON value that must be an object.
    pub fn from_json_value(value: &Value) -> ScoringResult<Self> {
        match value {
            Value::Object(map) => Self::from_json_map(map),
            other => Err(ScoringError::invalid_input(
                "<root>",
                format!("expected a JSON object, got {}", json_type(other)),
            )),
        }
    }

    /// Raw numeric columns in schema order: `Time`, `V1`..`V28`, `Amount`.
    pub fn raw_columns(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        std::iter::once(("Time", self.time))
            .chain(COMPONENT_NAMES.iter().copied().zip(self.components))
            .chain(std::iter::once(("Amount", self.amount)))
    }

    /// Stable 64-bit fingerprint of the raw numeric values.
    ///
    /// Used as a stand-in row index for live transactions so identical
    /// payloads always resolve to the same synthetic identifiers.
    pub fn fingerprint(&self) -> u64 {
        self.raw_columns()
            .fold(0x9E37_79B9_7F4A_7C15, |acc, (_, v)| {
                splitmix64(acc ^ v.to_bits())
            })
    }
}

impl TryFrom<Map<String, Value>> for RawTransaction {
    type Error = ScoringError;

    fn try_from(map: Map<String, Value>) -> ScoringResult<Self> {
        Self::from_json_map(&map)
    }
}

impl From<RawTransaction> for Map<String, Value> {
    fn from(tx: RawTransaction) -> Self {
        let mut map = Map::new();
        for (name, value) in tx.raw_columns() {
            insert_number(&mut map, name, value);
        }
        if let Some(idx) = tx.row_index {
            map.insert("row_index".to_string(), Value::from(idx));
        }
        let ids = tx.identifiers;
        for (name, value) in [
            ("merchant_id", ids.merchant_id),
            ("device_type", ids.device_type),
            ("geo_bucket", ids.geo_bucket),
            ("account_id", ids.account_id),
        ] {
            if let Some(v) = value {
                insert_number(&mut map, name, v);
            }
        }
        map
    }
}

/// SplitMix64 finalizer; a cheap, well-distributed 64-bit mix.
pub(crate) fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn is_known_field(key: &str) -> bool {
    matches!(
        key,
        "Time"
            | "Amount"
            | "row_index"
            | "merchant_id"
            | "device_type"
            | "geo_bucket"
            | "account_id"
            | LABEL_FIELD
    ) || COMPONENT_NAMES.contains(&key)
}

fn required_number(map: &Map<String, Value>, field: &str) -> ScoringResult<f64> {
    optional_number(map, field)?
        .ok_or_else(|| ScoringError::invalid_input(field, "required field is missing"))
}

fn optional_number(map: &Map<String, Value>, field: &str) -> ScoringResult<Option<f64>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let v = n
                .as_f64()
                .ok_or_else(|| ScoringError::invalid_input(field, "number out of range"))?;
            if v.is_finite() {
                Ok(Some(v))
            } else {
                Err(ScoringError::invalid_input(field, "number must be finite"))
            }
        }
        Some(other) => Err(ScoringError::invalid_input(
            field,
            format!("expected a number, got {}", json_type(other)),
        )),
    }
}

fn insert_number(map: &mut Map<String, Value>, name: &str, value: f64) {
    if let Some(n) = Number::from_f64(value) {
        map.insert(name.to_string(), Value::Number(n));
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
