use serde::{Deserialize, Serialize};

use crate::locale::Locale;
use crate::types::LeadFields;

/// Placeholder values some backends fill in before the visitor has answered.
pub const SENTINEL_EMAIL: &str = "a@example.com";
pub const SENTINEL_PHONE: &str = "1234567890";

const REFUSALS: &[&str] = &[
    "no",
    "nope",
    "no thanks",
    "no thank you",
    "not now",
    "later",
    "non",
    "non merci",
    "pas maintenant",
    "plus tard",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadField {
    Name,
    Email,
    Phone,
}

impl LeadField {
    pub const ALL: [LeadField; 3] = [LeadField::Name, LeadField::Email, LeadField::Phone];

    pub fn label(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::Name, Locale::En) => "name",
            (Self::Name, Locale::Fr) => "nom",
            (Self::Email, _) => "email",
            (Self::Phone, Locale::En) => "phone number",
            (Self::Phone, Locale::Fr) => "téléphone",
        }
    }

    fn sentinel(self) -> Option<&'static str> {
        match self {
            Self::Name => None,
            Self::Email => Some(SENTINEL_EMAIL),
            Self::Phone => Some(SENTINEL_PHONE),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl Lead {
    pub fn get(&self, field: LeadField) -> &str {
        match field {
            LeadField::Name => &self.name,
            LeadField::Email => &self.email,
            LeadField::Phone => &self.phone,
        }
    }

    fn slot(&mut self, field: LeadField) -> &mut String {
        match field {
            LeadField::Name => &mut self.name,
            LeadField::Email => &mut self.email,
            LeadField::Phone => &mut self.phone,
        }
    }

    /// Blank values and sentinel placeholders both count as not provided.
    pub fn is_provided(&self, field: LeadField) -> bool {
        let value = self.get(field).trim();
        !value.is_empty() && field.sentinel() != Some(value)
    }

    pub fn missing_fields(&self) -> Vec<LeadField> {
        LeadField::ALL
            .into_iter()
            .filter(|field| !self.is_provided(*field))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Takes every non-blank value from `incoming`; blank or absent values
    /// never erase what is already known. Returns whether anything changed.
    pub fn merge(&mut self, incoming: &LeadFields) -> bool {
        let mut changed = false;
        for (field, value) in [
            (LeadField::Name, &incoming.name),
            (LeadField::Email, &incoming.email),
            (LeadField::Phone, &incoming.phone),
        ] {
            let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let slot = self.slot(field);
            if *slot != value {
                *slot = value.to_string();
                changed = true;
            }
        }
        changed
    }

    pub fn to_fields(&self) -> LeadFields {
        LeadFields {
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
            phone: Some(self.phone.clone()),
        }
    }
}

/// Prompt asking for exactly the fields in `missing`, or `None` when nothing is.
pub fn missing_fields_prompt(missing: &[LeadField], locale: Locale) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    let labels = missing
        .iter()
        .map(|field| field.label(locale))
        .collect::<Vec<_>>();
    Some(locale.missing_prompt(&locale.join_list(&labels)))
}

pub fn lead_summary(lead: &Lead, locale: Locale) -> String {
    locale.lead_summary(lead.name.trim(), lead.email.trim(), lead.phone.trim())
}

pub fn is_refusal(input: &str) -> bool {
    let normalized = input
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    REFUSALS.iter().any(|phrase| *phrase == normalized)
}
