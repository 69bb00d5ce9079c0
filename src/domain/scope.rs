//! Config scope: the predicate deciding which trades a view includes.

use crate::domain::{ScopeField, Trade};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tagged scope variant persisted as JSON with a `type` discriminator.
///
/// `{"type":"ALL"}` matches every trade;
/// `{"type":"CRITERIA","criteria":{"BOOK":"EQ1",...}}` requires every entry
/// to match (AND semantics). Unknown tags fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    All,
    Criteria {
        // BTreeMap keeps the serialized form canonical, so the
        // (config_type, key_format, scope) uniqueness check compares equal
        // scopes equal regardless of construction order.
        criteria: BTreeMap<ScopeField, String>,
    },
}

impl Scope {
    /// Build a criteria scope from field/value pairs.
    pub fn criteria<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ScopeField, String)>,
    {
        Scope::Criteria {
            criteria: entries.into_iter().collect(),
        }
    }

    /// Whether this scope's view includes the trade.
    pub fn matches(&self, trade: &Trade) -> bool {
        match self {
            Scope::All => true,
            Scope::Criteria { criteria } => criteria
                .iter()
                .all(|(field, value)| field.extract(trade) == value),
        }
    }

    /// Canonical JSON form, as stored in the `scope` column.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("scope serialization cannot fail")
    }

    /// Parse the stored JSON form, rejecting unknown tags.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl ScopeField {
    /// The trade dimension this field matches against.
    pub fn extract<'t>(&self, trade: &'t Trade) -> &'t str {
        match self {
            ScopeField::Book => &trade.book,
            ScopeField::Counterparty => &trade.counterparty,
            ScopeField::Instrument => &trade.instrument,
            ScopeField::Source => &trade.source,
        }
    }
}
