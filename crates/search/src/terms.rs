//! Search term extraction
//!
//! Heuristic, legal-domain tuned:
//! - Arabic "ف" + "ال" compounds are reduced to their root noun
//! - Tokens are split on Unicode word boundaries
//! - Articles, question words and filler verbs are dropped
//! - Queries with nothing left fall back to fixed term sets

use kgforge_common::Language;
use std::collections::HashSet;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

/// Prefixed compounds and their roots
const ARABIC_COMPOUNDS: &[(&str, &str)] = &[
    ("فالملف", "ملف"),
    ("فالمستند", "مستند"),
    ("فالمحتوى", "محتوى"),
    ("فالمعلومات", "معلومات"),
    ("فالتفاصيل", "تفاصيل"),
    ("فالعقد", "عقد"),
    ("فالعقار", "عقار"),
    ("فالشقة", "شقة"),
    ("فالمنزل", "منزل"),
    ("فالإيجار", "إيجار"),
    ("فالدفع", "دفع"),
    ("فالمبلغ", "مبلغ"),
    ("فالمدة", "مدة"),
    ("فالتأمين", "تأمين"),
    ("فالغرامة", "غرامة"),
    ("فالبند", "بند"),
    ("فالمادة", "مادة"),
    ("فالقانون", "قانون"),
    ("فالمحكمة", "محكمة"),
    ("فالاختصاص", "اختصاص"),
    ("فالطرف", "طرف"),
    ("فالأطراف", "أطراف"),
    ("فالمؤجر", "مؤجر"),
    ("فالمستأجر", "مستأجر"),
];

const ENGLISH_STOP_WORDS: &[&str] = &[
    "what", "is", "are", "in", "the", "a", "an", "and", "or", "but", "for", "with", "by", "how",
    "when", "where", "why", "who", "which", "tell", "me", "about", "can", "you", "please", "of",
    "this", "it", "does", "do", "describe", "explain", "show", "give",
];

const ARABIC_STOP_WORDS: &[&str] = &[
    "ماذا", "ما", "هو", "هي", "في", "من", "إلى", "على", "مع", "ب", "ل", "كيف", "متى", "أين",
    "لماذا", "أي", "أخبر", "ني", "عن", "هل", "يمكن", "أن", "تخبرني", "يوجد", "موجود", "يحتوي",
    "يضم", "هذا", "هذه", "اوصف", "اشرح", "وضح",
];

/// Words marking a question about the document as a whole
const GENERAL_INDICATORS: &[&str] = &[
    "ملف", "مستند", "محتوى", "معلومات", "تفاصيل", "عقد", "document", "file", "content",
    "information", "details",
];

/// Describe/explain intent markers
const DESCRIPTIVE_PATTERNS: &[&str] = &[
    "اوصف", "اشرح", "وضح", "تفاصيل", "describe", "explain", "details", "detail",
];

const GENERAL_DEFAULT_TERMS: &[&str] = &["عقد"];
const DESCRIPTIVE_DEFAULT_TERMS: &[&str] = &["عقد", "مستند", "محتوى", "تفاصيل"];

/// Derives search terms from raw queries
#[derive(Debug, Clone)]
pub struct TermExtractor {
    english_stop_words: HashSet<&'static str>,
    arabic_stop_words: HashSet<&'static str>,
}

impl Default for TermExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TermExtractor {
    pub fn new() -> Self {
        Self {
            english_stop_words: ENGLISH_STOP_WORDS.iter().copied().collect(),
            arabic_stop_words: ARABIC_STOP_WORDS.iter().copied().collect(),
        }
    }

    /// Both lists apply whatever the query language
    fn is_stop_word(&self, word: &str) -> bool {
        self.english_stop_words.contains(word) || self.arabic_stop_words.contains(word)
    }

    /// Lower-case, trim and reduce known compounds to their roots
    pub fn normalize(&self, query: &str) -> String {
        ARABIC_COMPOUNDS
            .iter()
            .fold(query.trim().to_lowercase(), |text, (compound, root)| {
                text.replace(compound, root)
            })
    }

    /// Ordered, deduplicated, lower-cased search terms. Empty only for a blank query.
    pub fn extract(&self, query: &str, language: Language) -> Vec<String> {
        let cleaned = self.normalize(query);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = cleaned
            .unicode_words()
            .filter(|w| !self.is_stop_word(w))
            .filter(|w| seen.insert(*w))
            .map(str::to_string)
            .collect();

        if !terms.is_empty() {
            debug!(?terms, %language, "Extracted search terms");
            return terms;
        }

        let fallback: Vec<String> = if GENERAL_INDICATORS.iter().any(|i| cleaned.contains(i)) {
            GENERAL_DEFAULT_TERMS.iter().map(|t| t.to_string()).collect()
        } else if DESCRIPTIVE_PATTERNS.iter().any(|p| cleaned.contains(p)) {
            DESCRIPTIVE_DEFAULT_TERMS.iter().map(|t| t.to_string()).collect()
        } else {
            vec![cleaned]
        };

        debug!(terms = ?fallback, %language, "No meaningful terms, using fallback");
        fallback
    }
}
