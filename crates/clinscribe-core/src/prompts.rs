//! Prompt templates for each pipeline step

use crate::context::{Language, PatientData, SoapData};
use crate::pipeline::StepKind;
use std::fmt::Write;

struct Labels {
    age: &'static str,
    subjective: &'static str,
    objective: &'static str,
    assessment: &'static str,
    plan: &'static str,
}

const LABELS_NO: Labels = Labels {
    age: "Alder",
    subjective: "Subjektivt",
    objective: "Objektivt",
    assessment: "Vurdering",
    plan: "Plan",
};

const LABELS_EN: Labels = Labels {
    age: "Age",
    subjective: "Subjective",
    objective: "Objective",
    assessment: "Assessment",
    plan: "Plan",
};

fn labels(language: Language) -> &'static Labels {
    match language {
        Language::No => &LABELS_NO,
        Language::En => &LABELS_EN,
    }
}

/// Render patient details and the non-empty SOAP sections.
///
/// The age line is omitted entirely when the age is unknown.
fn render_note(patient: &PatientData, soap: &SoapData, language: Language) -> String {
    let labels = labels(language);
    let mut note = String::new();

    if let Some(age) = patient.age {
        let _ = writeln!(note, "{}: {}", labels.age, age);
    }

    for (label, text) in [
        (labels.subjective, &soap.subjective),
        (labels.objective, &soap.objective),
        (labels.assessment, &soap.assessment),
        (labels.plan, &soap.plan),
    ] {
        let text = text.trim();
        if !text.is_empty() {
            let _ = writeln!(note, "{label}: {text}");
        }
    }

    note.trim_end().to_string()
}

/// System prompt fixing the answer language
#[must_use]
pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::No => "Svar på norsk (bokmål). Ikke finn på opplysninger som ikke står i notatet.",
        Language::En => "Answer in English. Do not invent information that is not in the note.",
    }
}

/// Red-flag screening prompt
#[must_use]
pub fn safety_prompt(patient: &PatientData, soap: &SoapData, language: Language) -> String {
    let note = render_note(patient, soap, language);
    match language {
        Language::No => format!(
            "Vurder følgende kliniske notat for røde flagg.\n\n{note}\n\n\
             Start svaret med risikonivå (KRITISK, HØY, MODERAT eller LAV) og list \
             hvert røde flagg på egen linje som begynner med \"- \"."
        ),
        Language::En => format!(
            "Screen the following clinical note for red flags.\n\n{note}\n\n\
             Start the answer with the risk level (CRITICAL, HIGH, MODERATE or LOW) and \
             list each red flag on its own line starting with \"- \"."
        ),
    }
}

/// Clinical summary prompt
#[must_use]
pub fn clinical_prompt(patient: &PatientData, soap: &SoapData, language: Language) -> String {
    let note = render_note(patient, soap, language);
    match language {
        Language::No => format!("Skriv en kort klinisk oppsummering av følgende notat.\n\n{note}"),
        Language::En => format!("Write a concise clinical summary of the following note.\n\n{note}"),
    }
}

/// Differential diagnosis prompt
#[must_use]
pub fn differential_prompt(patient: &PatientData, soap: &SoapData, language: Language) -> String {
    let note = render_note(patient, soap, language);
    match language {
        Language::No => format!(
            "Foreslå rangerte differensialdiagnoser med funn som støtter og svekker hver av dem.\n\n{note}"
        ),
        Language::En => format!(
            "Propose a ranked differential diagnosis with supporting and opposing findings for each.\n\n{note}"
        ),
    }
}

/// Referral letter prompt
#[must_use]
pub fn letter_prompt(patient: &PatientData, soap: &SoapData, language: Language) -> String {
    let note = render_note(patient, soap, language);
    match language {
        Language::No => format!(
            "Skriv et utkast til henvisningsbrev til spesialist basert på følgende notat.\n\n{note}"
        ),
        Language::En => format!(
            "Draft a referral letter to a specialist based on the following note.\n\n{note}"
        ),
    }
}

/// Synthesis prompt over the sections that produced text
#[must_use]
pub fn synthesis_prompt(sections: &[(&str, &str)], language: Language) -> String {
    let mut prompt = match language {
        Language::No => {
            "Slå sammen følgende seksjoner til én sammenhengende klinisk tekst uten gjentakelser.\n"
                .to_string()
        }
        Language::En => {
            "Merge the following sections into one coherent clinical text without repetition.\n"
                .to_string()
        }
    };

    for (title, text) in sections {
        let _ = write!(prompt, "\n## {title}\n{}\n", text.trim());
    }
    prompt
}

/// Section heading used in the synthesis prompt
#[must_use]
pub fn section_title(step: StepKind, language: Language) -> &'static str {
    match (step, language) {
        (StepKind::Safety, Language::No) => "Sikkerhetsvurdering",
        (StepKind::Clinical, Language::No) => "Klinisk oppsummering",
        (StepKind::Differential, Language::No) => "Differensialdiagnoser",
        (StepKind::Letter, Language::No) => "Henvisningsbrev",
        (StepKind::Synthesis, Language::No) => "Sammenstilling",
        (StepKind::Safety, Language::En) => "Safety assessment",
        (StepKind::Clinical, Language::En) => "Clinical summary",
        (StepKind::Differential, Language::En) => "Differential diagnosis",
        (StepKind::Letter, Language::En) => "Referral letter",
        (StepKind::Synthesis, Language::En) => "Synthesis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soap() -> SoapData {
        SoapData {
            subjective: "Korsryggsmerter i 3 uker".to_string(),
            objective: "Nedsatt fleksjon".to_string(),
            assessment: String::new(),
            plan: "Øvelser".to_string(),
        }
    }

    #[test]
    fn test_age_present() {
        let prompt = safety_prompt(&PatientData::with_age(54), &soap(), Language::No);
        assert!(prompt.contains("Alder: 54"));
        assert!(prompt.contains("Subjektivt: Korsryggsmerter i 3 uker"));
        assert!(prompt.contains("KRITISK"));
    }

    #[test]
    fn test_age_absent_is_omitted() {
        let prompt = safety_prompt(&PatientData::default(), &soap(), Language::No);
        assert!(!prompt.contains("Alder"));
        assert!(!prompt.contains("undefined"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let prompt = clinical_prompt(&PatientData::default(), &soap(), Language::No);
        assert!(!prompt.contains("Vurdering:"));
        assert!(prompt.contains("Plan: Øvelser"));
    }

    #[test]
    fn test_english_templates() {
        let prompt = safety_prompt(&PatientData::with_age(40), &soap(), Language::En);
        assert!(prompt.contains("Age: 40"));
        assert!(prompt.contains("CRITICAL"));
        assert!(system_prompt(Language::En).starts_with("Answer in English"));
    }

    #[test]
    fn test_synthesis_prompt_lists_sections_in_order() {
        let prompt = synthesis_prompt(
            &[("Klinisk oppsummering", "A"), ("Differensialdiagnoser", "B")],
            Language::No,
        );
        let a = prompt.find("## Klinisk oppsummering").unwrap();
        let b = prompt.find("## Differensialdiagnoser").unwrap();
        assert!(a < b);
    }
}
