//! Finite tagged enumerations serialized as their SCREAMING_SNAKE names.
//!
//! Every enum here round-trips through both JSON (wire messages, JSON
//! columns) and plain TEXT columns; unknown names are rejected, never
//! defaulted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a persisted or wire enum name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownEnumValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! named_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownEnumValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

named_enum!(DateBasis, "dateBasis", {
    TradeDate => "TRADE_DATE",
    SettlementDate => "SETTLEMENT_DATE",
});

named_enum!(ChangeReason, "changeReason", {
    Initial => "INITIAL",
    LateTrade => "LATE_TRADE",
    Correction => "CORRECTION",
});

named_enum!(CalculationMethod, "calculationMethod", {
    FullRecalc => "FULL_RECALC",
    Incremental => "INCREMENTAL",
});

named_enum!(PriceMethod, "priceMethod", {
    Wac => "WAC",
});

named_enum!(ConfigType, "configType", {
    Official => "OFFICIAL",
    User => "USER",
    Desk => "DESK",
});

named_enum!(ScopeField, "scopeField", {
    Book => "BOOK",
    Counterparty => "COUNTERPARTY",
    Instrument => "INSTRUMENT",
    Source => "SOURCE",
});

named_enum!(KeyFormat, "keyFormat", {
    BookCounterpartyInstrument => "BOOK_COUNTERPARTY_INSTRUMENT",
    BookInstrument => "BOOK_INSTRUMENT",
    CounterpartyInstrument => "COUNTERPARTY_INSTRUMENT",
    Instrument => "INSTRUMENT",
    Book => "BOOK",
});

/// Nullable dimension projection of a position key.
///
/// Only the dimensions relevant to the key format are populated; the rest
/// stay None both here and in the `position_keys` columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub book: Option<String>,
    pub counterparty: Option<String>,
    pub instrument: Option<String>,
}

impl KeyFormat {
    /// Join the relevant dimensions with `#` in format order.
    pub fn generate(&self, book: &str, counterparty: &str, instrument: &str) -> String {
        match self {
            KeyFormat::BookCounterpartyInstrument => {
                format!("{}#{}#{}", book, counterparty, instrument)
            }
            KeyFormat::BookInstrument => format!("{}#{}", book, instrument),
            KeyFormat::CounterpartyInstrument => format!("{}#{}", counterparty, instrument),
            KeyFormat::Instrument => instrument.to_string(),
            KeyFormat::Book => book.to_string(),
        }
    }

    /// Project the dimensions this format keys on.
    pub fn dimensions(&self, book: &str, counterparty: &str, instrument: &str) -> Dimensions {
        let mut dims = Dimensions::default();
        if self.uses_book() {
            dims.book = Some(book.to_string());
        }
        if self.uses_counterparty() {
            dims.counterparty = Some(counterparty.to_string());
        }
        if self.uses_instrument() {
            dims.instrument = Some(instrument.to_string());
        }
        dims
    }

    /// Split a position key on `#` and map segments positionally.
    ///
    /// # Errors
    /// Returns the offending key when the segment count does not match the
    /// format's arity.
    pub fn parse_key(&self, key: &str) -> Result<Dimensions, KeyParseError> {
        let parts: Vec<&str> = key.split('#').collect();
        let expected = self.arity();
        if parts.len() != expected {
            return Err(KeyParseError {
                format: *self,
                key: key.to_string(),
                expected,
                actual: parts.len(),
            });
        }

        let mut dims = Dimensions::default();
        match self {
            KeyFormat::BookCounterpartyInstrument => {
                dims.book = Some(parts[0].to_string());
                dims.counterparty = Some(parts[1].to_string());
                dims.instrument = Some(parts[2].to_string());
            }
            KeyFormat::BookInstrument => {
                dims.book = Some(parts[0].to_string());
                dims.instrument = Some(parts[1].to_string());
            }
            KeyFormat::CounterpartyInstrument => {
                dims.counterparty = Some(parts[0].to_string());
                dims.instrument = Some(parts[1].to_string());
            }
            KeyFormat::Instrument => {
                dims.instrument = Some(parts[0].to_string());
            }
            KeyFormat::Book => {
                dims.book = Some(parts[0].to_string());
            }
        }
        Ok(dims)
    }

    /// Number of `#`-separated segments in keys of this format.
    pub fn arity(&self) -> usize {
        match self {
            KeyFormat::BookCounterpartyInstrument => 3,
            KeyFormat::BookInstrument | KeyFormat::CounterpartyInstrument => 2,
            KeyFormat::Instrument | KeyFormat::Book => 1,
        }
    }

    fn uses_book(&self) -> bool {
        matches!(
            self,
            KeyFormat::BookCounterpartyInstrument | KeyFormat::BookInstrument | KeyFormat::Book
        )
    }

    fn uses_counterparty(&self) -> bool {
        matches!(
            self,
            KeyFormat::BookCounterpartyInstrument | KeyFormat::CounterpartyInstrument
        )
    }

    fn uses_instrument(&self) -> bool {
        !matches!(self, KeyFormat::Book)
    }
}

/// A position key whose segment count does not match its format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("position key '{key}' has {actual} segment(s), {format} expects {expected}")]
pub struct KeyParseError {
    pub format: KeyFormat,
    pub key: String,
    pub expected: usize,
    pub actual: usize,
}
