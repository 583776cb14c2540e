use tracing::{debug, warn};

pub const DEFAULT_DENYLIST: [&str; 5] = ["nudity", "violence", "weapon", "blood", "gore"];
pub const FILTERED_PLACEHOLDER: &str = "[filtered]";

/// Best-effort substring filter applied to every image-generation request.
///
/// Matching is case-sensitive and purely lexical; paraphrases pass through.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    terms: Vec<String>,
}

impl Default for SafetyFilter {
    fn default() -> Self {
        SafetyFilter {
            terms: DEFAULT_DENYLIST.iter().map(|term| term.to_string()).collect(),
        }
    }
}

impl SafetyFilter {
    /// Adds terms to the denylist.
    ///
    /// Empty terms, terms that occur inside the placeholder, and terms containing
    /// `[` or `]` are ignored: a match can then never overlap an inserted
    /// placeholder, so one pass leaves nothing for a second pass to replace.
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for term in terms {
            let term = term.into();
            if term.is_empty() || FILTERED_PLACEHOLDER.contains(term.as_str()) {
                continue;
            }
            if term.contains(['[', ']']) {
                warn!("Ignoring denylist term '{}': brackets are reserved", term);
                continue;
            }
            if !self.terms.contains(&term) {
                self.terms.push(term);
            }
        }
        self
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut sanitized = text.to_string();
        for term in &self.terms {
            if sanitized.contains(term.as_str()) {
                debug!("Filtering denylisted term '{}' from generation prompt", term);
                sanitized = sanitized.replace(term.as_str(), FILTERED_PLACEHOLDER);
            }
        }
        sanitized
    }
}
