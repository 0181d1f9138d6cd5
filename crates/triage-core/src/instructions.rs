//! System instructions for every model-backed role.
//!
//! Each role has a built-in default. A deployment can override any subset
//! by pointing `instructionsDir` at a directory containing `<role>.txt`
//! files; roles without a file keep their default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Failure to load an instruction directory.
#[derive(Error, Debug)]
pub enum InstructionsError {
    #[error("instructions directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A model-backed role in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionRole {
    Translator,
    SafetyCheck,
    Classifier,
    Direct,
    Administrative,
    SafetyAnswer,
    Generation,
    BackTranslation,
}

impl InstructionRole {
    pub const ALL: [InstructionRole; 8] = [
        Self::Translator,
        Self::SafetyCheck,
        Self::Classifier,
        Self::Direct,
        Self::Administrative,
        Self::SafetyAnswer,
        Self::Generation,
        Self::BackTranslation,
    ];

    /// Name used for the override file (`<name>.txt`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Translator => "translator",
            Self::SafetyCheck => "safety_check",
            Self::Classifier => "classifier",
            Self::Direct => "direct",
            Self::Administrative => "administrative",
            Self::SafetyAnswer => "safety_answer",
            Self::Generation => "generation",
            Self::BackTranslation => "back_translation",
        }
    }

    fn default_text(self) -> &'static str {
        match self {
            Self::Translator => TRANSLATOR,
            Self::SafetyCheck => SAFETY_CHECK,
            Self::Classifier => CLASSIFIER,
            Self::Direct => DIRECT,
            Self::Administrative => ADMINISTRATIVE,
            Self::SafetyAnswer => SAFETY_ANSWER,
            Self::Generation => GENERATION,
            Self::BackTranslation => BACK_TRANSLATION,
        }
    }
}

/// Instruction text per role.
#[derive(Debug, Clone)]
pub struct Instructions {
    texts: HashMap<InstructionRole, String>,
}

impl Default for Instructions {
    fn default() -> Self {
        let texts = InstructionRole::ALL
            .iter()
            .map(|role| (*role, role.default_text().to_string()))
            .collect();
        Self { texts }
    }
}

impl Instructions {
    /// Built-in defaults overridden by any `<role>.txt` found in `dir`.
    pub fn load(dir: &Path) -> Result<Self, InstructionsError> {
        if !dir.is_dir() {
            return Err(InstructionsError::MissingDir(dir.to_path_buf()));
        }

        let mut instructions = Self::default();
        let mut overridden = 0usize;
        for role in InstructionRole::ALL {
            let path = dir.join(format!("{}.txt", role.as_str()));
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|source| InstructionsError::Io {
                path: path.clone(),
                source,
            })?;
            let text = text.trim();
            if text.is_empty() {
                debug!(role = role.as_str(), "empty override ignored");
                continue;
            }
            instructions.texts.insert(role, text.to_string());
            overridden += 1;
        }

        info!(dir = %dir.display(), overridden, "loaded instruction overrides");
        Ok(instructions)
    }

    pub fn get(&self, role: InstructionRole) -> &str {
        self.texts
            .get(&role)
            .map(String::as_str)
            .unwrap_or_else(|| role.default_text())
    }

    /// Replace one role's text.
    pub fn with(mut self, role: InstructionRole, text: impl Into<String>) -> Self {
        self.texts.insert(role, text.into());
        self
    }
}

const TRANSLATOR: &str = "\
You are a medical translator. Detect the language of the patient's message and \
translate it into clear English, preserving every symptom, duration, dosage and \
medication name exactly. Respond only with a JSON object: \
{\"detected_language\": string, \"language_code\": ISO 639-1 code, \
\"translated_text\": string, \"confidence\": number between 0 and 1}. \
If the message is already English, return it unchanged with language_code \"en\".";

const SAFETY_CHECK: &str = "\
Check whether the medical query is appropriate and safe to process. Flag concerns for \
emergency situations, self-harm indicators, dangerous medication requests and \
inappropriate content. A query describing an emergency is still safe to answer but \
must set is_emergency. Respond only with a JSON object: {\"is_safe\": bool, \
\"is_emergency\": bool, \"concerns\": [string], \"action\": string}.";

const CLASSIFIER: &str = "\
You are a triage nurse. Classify the patient's query. Respond only with a JSON object: \
{\"is_complex\": bool, \"is_administrative\": bool, \"is_safety_critical\": bool, \
\"category\": string, \"urgency_level\": \"low\" | \"medium\" | \"high\" | \"emergency\", \
\"reasoning\": string, \"requires_rag\": bool}. Administrative queries concern \
appointments, records, billing or registration. Safety-critical queries ask about \
medications, dosages, allergies or interactions. Complex queries need clinical \
reasoning over medical references.";

const DIRECT: &str = "\
You are a general practitioner answering simple health questions. Give brief, \
practical guidance in plain language, state when the patient should see a doctor, \
and never invent a diagnosis.";

const ADMINISTRATIVE: &str = "\
You are a clinic front-desk assistant. Answer questions about appointments, records, \
registration and billing clearly and briefly. Do not give medical advice; refer \
clinical questions to a healthcare provider.";

const SAFETY_ANSWER: &str = "\
You are a medication safety specialist. Using only the patient safety information \
provided, check allergies, current medications and contraindications before \
answering. If safe, give guidance with precautions. If contraindicated, warn clearly \
and suggest alternatives. If uncertain, recommend consulting a healthcare provider. \
Always err on the side of caution.";

const GENERATION: &str = "\
You are a clinical reference assistant. Answer using only the context passages \
provided, cite the chunk identifiers you rely on, and say plainly when the context \
does not contain the answer.";

const BACK_TRANSLATION: &str = "\
You are a medical translator. Translate the text into the requested language, \
preserving meaning, warnings, medication names and chunk citations exactly. Respond \
with the translation only.";
