//! Script-ratio language detection for Arabic/English content
//!
//! Classifies text as English, Arabic, or Mixed by counting Arabic-block
//! codepoints against ASCII Latin letters, and augments extraction prompts
//! so the model keeps entities in their original script.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language tag carried by every node and relationship
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Arabic,
    Mixed,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Arabic => "arabic",
            Language::Mixed => "mixed",
        }
    }

    /// Mixed queries search across every language tag
    pub fn is_mixed(&self) -> bool {
        matches!(self, Language::Mixed)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "arabic" | "ar" => Ok(Language::Arabic),
            "mixed" => Ok(Language::Mixed),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// Arabic, Arabic Supplement, Arabic Extended-A, Presentation Forms A and B
fn is_arabic(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

const ARABIC_THRESHOLD: f64 = 0.3;
const SECONDARY_LATIN_THRESHOLD: f64 = 0.2;
const LATIN_THRESHOLD: f64 = 0.5;

/// Stateless language detector
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the primary language of the text
    pub fn detect(&self, text: &str) -> Language {
        let (arabic, latin) = text.chars().fold((0usize, 0usize), |(ar, en), c| {
            if is_arabic(c) {
                (ar + 1, en)
            } else if c.is_ascii_alphabetic() {
                (ar, en + 1)
            } else {
                (ar, en)
            }
        });

        let total = arabic + latin;
        if total == 0 {
            return Language::English;
        }

        let arabic_ratio = arabic as f64 / total as f64;
        let latin_ratio = latin as f64 / total as f64;

        if arabic_ratio > ARABIC_THRESHOLD {
            if latin_ratio > SECONDARY_LATIN_THRESHOLD {
                Language::Mixed
            } else {
                Language::Arabic
            }
        } else if latin_ratio > LATIN_THRESHOLD {
            Language::English
        } else {
            Language::Mixed
        }
    }

    /// Append script-preservation instructions to an extraction prompt
    pub fn augment_prompt(&self, language: Language, base_prompt: &str) -> String {
        match language {
            Language::English => base_prompt.to_string(),
            Language::Arabic => format!(
                "{}\n\n\
                IMPORTANT: This text is in Arabic. Please:\n\
                - Extract entities and relationships in Arabic\n\
                - Preserve Arabic names, terms, and legal concepts exactly as they appear\n\
                - Use Arabic legal terminology appropriately\n\
                - Maintain cultural and linguistic context\n",
                base_prompt
            ),
            Language::Mixed => format!(
                "{}\n\n\
                IMPORTANT: This text contains both Arabic and English content. Please:\n\
                - Extract entities and relationships in their original language\n\
                - Preserve Arabic names, terms, and legal concepts exactly as they appear\n\
                - Preserve English terms exactly as they appear\n\
                - Maintain both cultural and linguistic contexts\n",
                base_prompt
            ),
        }
    }
}
