//! Inbound and outbound contracts of the engine.
//!
//! The query payload arrives pre-validated from the natural-language layer;
//! the engine attaches it to an attempt without interpreting it. The report
//! goes back out to the formatting layer, which owns field extraction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::escalation::{AttemptCounts, Outcome, Tier};

/// Structured lookup payload. The engine only serializes this onto the
/// outbound request; it never inspects the fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPayload {
    Person {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        date_of_birth: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        country: Option<String>,
    },
    Identifier(String),
}

impl QueryPayload {
    /// Flatten into form fields for the target's search endpoint.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            QueryPayload::Person {
                name,
                date_of_birth,
                country,
            } => {
                let mut fields = vec![("name", name.clone())];
                if let Some(dob) = date_of_birth {
                    fields.push(("dob", dob.clone()));
                }
                if let Some(country) = country {
                    fields.push(("country", country.clone()));
                }
                fields
            }
            QueryPayload::Identifier(id) => vec![("id", id.clone())],
        }
    }
}

/// One person-lookup query as handed over by the parsing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub payload: QueryPayload,
    /// BCP 47 language tag forwarded to the target.
    pub language: String,
    pub fuzzy: bool,
}

impl SearchQuery {
    pub fn person(name: impl Into<String>) -> Self {
        Self {
            payload: QueryPayload::Person {
                name: name.into(),
                date_of_birth: None,
                country: None,
            },
            language: "en".to_string(),
            fuzzy: false,
        }
    }

    pub fn identifier(id: impl Into<String>) -> Self {
        Self {
            payload: QueryPayload::Identifier(id.into()),
            language: "en".to_string(),
            fuzzy: false,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    /// Full set of request parameters, payload plus routing flags.
    pub fn request_params(&self) -> Vec<(&'static str, String)> {
        let mut params = self.payload.form_fields();
        params.push(("lang", self.language.clone()));
        if self.fuzzy {
            params.push(("fuzzy", "1".to_string()));
        }
        params
    }
}

/// Terminal report handed to the caller. The raw payload is opaque page
/// content for the downstream extraction collaborator.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: Outcome,
    pub raw_payload: Option<String>,
    pub tier_reached: Tier,
    pub attempt_counts: AttemptCounts,
    pub elapsed_ms: u64,
    /// Populated only when `outcome` is `Error`.
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl SearchReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
