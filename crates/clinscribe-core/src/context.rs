//! Clinical input passed to the pipeline
//!
//! These are read-only views of data owned elsewhere; the pipeline never
//! mutates them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Patient details used in prompts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientData {
    /// Age in years
    #[serde(default)]
    pub age: Option<u32>,
}

impl PatientData {
    /// Patient with a known age
    #[must_use]
    pub fn with_age(age: u32) -> Self {
        Self { age: Some(age) }
    }
}

/// Structured SOAP note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapData {
    /// Subjective
    #[serde(default)]
    pub subjective: String,
    /// Objective
    #[serde(default)]
    pub objective: String,
    /// Assessment
    #[serde(default)]
    pub assessment: String,
    /// Plan
    #[serde(default)]
    pub plan: String,
}

impl SoapData {
    /// Whether every section is empty or whitespace
    #[must_use]
    pub fn is_blank(&self) -> bool {
        [&self.subjective, &self.objective, &self.assessment, &self.plan]
            .iter()
            .all(|s| s.trim().is_empty())
    }
}

/// Output language of generated text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Norwegian (bokmål)
    #[default]
    No,
    /// English
    En,
}

impl Language {
    /// Parse a language code; unknown codes fall back to Norwegian
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "no" | "nb" | "nn" | "nor" | "norwegian" | "norsk" => Self::No,
            "en" | "eng" | "english" => Self::En,
            other => {
                warn!(code = %other, "Unsupported language, using Norwegian");
                Self::No
            }
        }
    }

    /// Returns the language code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Per-run pipeline options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Output language
    pub language: Language,
    /// Run the differential-diagnosis step
    pub include_differential: bool,
    /// Run the referral-letter step
    pub include_letter_draft: bool,
    /// Overall deadline for the run
    pub deadline: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            language: Language::No,
            include_differential: true,
            include_letter_draft: false,
            deadline: None,
        }
    }
}

impl PipelineOptions {
    /// Set the language
    #[must_use]
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Enable or disable the differential step
    #[must_use]
    pub fn with_differential(mut self, include: bool) -> Self {
        self.include_differential = include;
        self
    }

    /// Enable or disable the letter step
    #[must_use]
    pub fn with_letter_draft(mut self, include: bool) -> Self {
        self.include_letter_draft = include;
        self
    }

    /// Set an overall deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_soap() {
        assert!(SoapData::default().is_blank());
        let soap = SoapData {
            plan: "  \n".to_string(),
            ..Default::default()
        };
        assert!(soap.is_blank());

        let soap = SoapData {
            subjective: "Ryggsmerter".to_string(),
            ..Default::default()
        };
        assert!(!soap.is_blank());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("NO"), Language::No);
        assert_eq!(Language::parse("nb"), Language::No);
        assert_eq!(Language::parse("en"), Language::En);
        assert_eq!(Language::parse("de"), Language::No);
    }

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert_eq!(options.language, Language::No);
        assert!(options.include_differential);
        assert!(!options.include_letter_draft);
        assert!(options.deadline.is_none());
    }

    #[test]
    fn test_soap_deserializes_with_missing_fields() {
        let soap: SoapData = serde_json::from_str(r#"{"subjective":"Hodepine"}"#).unwrap();
        assert_eq!(soap.subjective, "Hodepine");
        assert!(soap.plan.is_empty());
    }
}
