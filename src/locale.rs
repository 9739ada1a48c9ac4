use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Language for every string the widget produces on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Fr,
}

impl Locale {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "fr" => Ok(Self::Fr),
            _ => Err(ConfigError::invalid("locale", value)),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
        }
    }

    pub fn default_welcome(self) -> &'static str {
        match self {
            Self::En => "Hello! How can I help you today?",
            Self::Fr => "Bonjour ! Comment puis-je vous aider aujourd'hui ?",
        }
    }

    pub fn apology(self) -> &'static str {
        match self {
            Self::En => "Sorry, something went wrong. Please try again in a moment.",
            Self::Fr => "Désolé, une erreur est survenue. Merci de réessayer dans un instant.",
        }
    }

    pub fn lead_request(self) -> &'static str {
        match self {
            Self::En => {
                "To help you better, could you give me your name, email and phone number?"
            }
            Self::Fr => {
                "Pour mieux vous aider, puis-je connaître votre nom, email et téléphone ?"
            }
        }
    }

    pub fn refusal_ack(self) -> &'static str {
        match self {
            Self::En => "No problem! Feel free to keep asking me anything.",
            Self::Fr => "Pas de souci ! N'hésitez pas à continuer à me poser vos questions.",
        }
    }

    pub fn idle_prompt(self) -> &'static str {
        match self {
            Self::En => "Are you still there? Can I help you with anything else?",
            Self::Fr => "Êtes-vous toujours là ? Puis-je vous aider pour autre chose ?",
        }
    }

    pub fn yes_no(self) -> [&'static str; 2] {
        match self {
            Self::En => ["Yes", "No"],
            Self::Fr => ["Oui", "Non"],
        }
    }

    pub fn missing_prompt(self, list: &str) -> String {
        match self {
            Self::En => format!("Could you give me your {list}?"),
            Self::Fr => format!("Pourriez-vous me donner votre {list} ?"),
        }
    }

    pub fn lead_summary(self, name: &str, email: &str, phone: &str) -> String {
        match self {
            Self::En => format!(
                "Thank you! Here is what I noted:\nName: {name}\nEmail: {email}\nPhone: {phone}"
            ),
            Self::Fr => format!(
                "Merci, vos informations ont bien été enregistrées !\nNom : {name}\nEmail : {email}\nTéléphone : {phone}"
            ),
        }
    }

    /// Joins labels the way a sentence would list them.
    pub fn join_list(self, items: &[&str]) -> String {
        let conjunction = match self {
            Self::En => "and",
            Self::Fr => "et",
        };
        match items {
            [] => String::new(),
            [one] => (*one).to_string(),
            [first, second] => format!("{first} {conjunction} {second}"),
            [head @ .., last] => {
                let serial = match self {
                    Self::En => ",",
                    Self::Fr => "",
                };
                format!("{}{serial} {conjunction} {last}", head.join(", "))
            }
        }
    }
}
