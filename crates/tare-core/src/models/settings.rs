//! Application settings model

use serde::{Deserialize, Serialize};

/// Unit weights are displayed and printed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    /// Kilograms
    #[default]
    Kg,
    /// Metric tonnes
    Tonne,
}

/// Operator settings, backed up alongside the business collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Company printed on tickets
    pub company_name: String,
    /// Company address printed on tickets
    pub company_address: String,
    /// Company registration number, also used as producer id on waste documents
    pub registration_number: String,
    /// Prefix of generated ticket numbers (e.g. "T-")
    pub ticket_prefix: String,
    /// Next ticket sequence number
    pub next_ticket_number: u32,
    /// Display unit
    pub weight_unit: WeightUnit,
    /// ISO currency code for prices
    pub currency: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            company_name: String::new(),
            company_address: String::new(),
            registration_number: String::new(),
            ticket_prefix: "T-".to_string(),
            next_ticket_number: 1,
            weight_unit: WeightUnit::Kg,
            currency: "EUR".to_string(),
        }
    }
}

impl Settings {
    /// Format a ticket number from the prefix and a sequence value
    #[must_use]
    pub fn format_ticket_number(&self, sequence: u32) -> String {
        format!("{}{sequence:06}", self.ticket_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.next_ticket_number, 1);
        assert_eq!(settings.weight_unit, WeightUnit::Kg);
    }

    #[test]
    fn test_format_ticket_number() {
        let settings = Settings::default();
        assert_eq!(settings.format_ticket_number(42), "T-000042");
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"company_name":"Quarry"}"#).unwrap();
        assert_eq!(settings.company_name, "Quarry");
        assert_eq!(settings.currency, "EUR");
    }
}
