use serde::{Deserialize, Serialize};

/// Country prefix rules used to turn free-form phone input into the digit
/// string the messaging surface dials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialPlan {
    pub country_prefix: String,
    /// Digit strings at or under this length are local numbers and get the
    /// country prefix prepended.
    pub local_number_max_len: usize,
}

impl Default for DialPlan {
    fn default() -> Self {
        Self {
            country_prefix: "55".to_string(),
            local_number_max_len: 11,
        }
    }
}

impl DialPlan {
    pub fn new(country_prefix: impl Into<String>, local_number_max_len: usize) -> Self {
        Self {
            country_prefix: country_prefix.into(),
            local_number_max_len,
        }
    }

    /// Returns an empty string when `raw` carries no digits.
    pub fn normalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return digits;
        }
        if !digits.starts_with(&self.country_prefix) && digits.len() <= self.local_number_max_len
        {
            return format!("{}{}", self.country_prefix, digits);
        }
        digits
    }
}
