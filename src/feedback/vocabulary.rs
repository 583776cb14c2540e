use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Most shot types a single recommendation may carry.
pub const MAX_SHOT_TYPES: usize = 3;

/// Closed set of camera framings used by pose recommendations and generation prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShotType {
    Head,
    UpperBody,
    HalfBody,
    FullBody,
    BirdsEye,
    Drone,
    HighAngle,
    FromBelow,
    FromAbove,
    Knee,
    Medium,
    FullBodyPerspective,
    UpperBodyPerspective,
    DutchAngle,
    Bust,
}

impl ShotType {
    pub const ALL: [ShotType; 15] = [
        ShotType::Head,
        ShotType::UpperBody,
        ShotType::HalfBody,
        ShotType::FullBody,
        ShotType::BirdsEye,
        ShotType::Drone,
        ShotType::HighAngle,
        ShotType::FromBelow,
        ShotType::FromAbove,
        ShotType::Knee,
        ShotType::Medium,
        ShotType::FullBodyPerspective,
        ShotType::UpperBodyPerspective,
        ShotType::DutchAngle,
        ShotType::Bust,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ShotType::Head => "head",
            ShotType::UpperBody => "upper body",
            ShotType::HalfBody => "half body",
            ShotType::FullBody => "full body",
            ShotType::BirdsEye => "bird's-eye",
            ShotType::Drone => "drone",
            ShotType::HighAngle => "high-angle",
            ShotType::FromBelow => "from-below",
            ShotType::FromAbove => "from-above",
            ShotType::Knee => "knee",
            ShotType::Medium => "medium",
            ShotType::FullBodyPerspective => "full-body-perspective",
            ShotType::UpperBodyPerspective => "upper-body-perspective",
            ShotType::DutchAngle => "dutch-angle",
            ShotType::Bust => "bust",
        }
    }

    /// Normalized spellings accepted for this entry besides its label.
    const fn aliases(self) -> &'static [&'static str] {
        match self {
            ShotType::Head => &["headshot", "close-up-head"],
            ShotType::UpperBody => &[],
            ShotType::HalfBody => &[],
            ShotType::FullBody => &[],
            ShotType::BirdsEye => &["bird-eye", "birds-eye-view", "bird-eye-view"],
            ShotType::Drone => &["aerial-drone"],
            ShotType::HighAngle => &[],
            ShotType::FromBelow => &["low-angle"],
            ShotType::FromAbove => &[],
            ShotType::Knee => &["knee-length"],
            ShotType::Medium => &[],
            ShotType::FullBodyPerspective => &["perspective-full-body"],
            ShotType::UpperBodyPerspective => &["perspective-upper-body"],
            ShotType::DutchAngle => &["dutch", "dutch-tilt"],
            ShotType::Bust => &[],
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        let normalized = normalize_token(value)?;
        ShotType::ALL.into_iter().find(|shot| {
            normalize_token(shot.label()).as_deref() == Some(normalized.as_str())
                || shot.aliases().contains(&normalized.as_str())
        })
    }
}

/// Comma-separated labels of the whole vocabulary, in declaration order.
pub fn vocabulary_list() -> String {
    ShotType::ALL
        .iter()
        .map(|shot| shot.label())
        .collect::<Vec<_>>()
        .join(", ")
}

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•]+|\d+\s*[.)])\s*").expect("list marker pattern is valid")
});
static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("separator pattern is valid"));

fn normalize_token(value: &str) -> Option<String> {
    let lowered = value.to_lowercase().replace(['’', '\''], "");
    let without_marker = LIST_MARKER.replace(&lowered, "");
    let trimmed = without_marker
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '`' | '.' | ';' | ':' | '*'))
        .trim();
    let trimmed = trimmed.strip_suffix(" shot").unwrap_or(trimmed);
    let slug = NON_WORD.replace_all(trimmed, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShotTypeSelection {
    pub accepted: Vec<ShotType>,
    pub rejected: Vec<String>,
}

/// Reads a model answer that should list vocabulary entries one per line.
///
/// Lines that do not match as a whole are split on commas so that answers in the
/// older comma-joined format still parse. Unknown entries are reported in `rejected`
/// and never reach `accepted`; duplicates are dropped and at most
/// [`MAX_SHOT_TYPES`] entries are kept.
pub fn parse_shot_types(answer: &str) -> ShotTypeSelection {
    let mut selection = ShotTypeSelection::default();

    for line in answer.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(shot) = ShotType::from_label(line) {
            push_unique(&mut selection.accepted, shot);
            continue;
        }
        for token in line.split(',') {
            if token.trim().is_empty() {
                continue;
            }
            match ShotType::from_label(token) {
                Some(shot) => push_unique(&mut selection.accepted, shot),
                None => selection.rejected.push(token.trim().to_string()),
            }
        }
    }

    if selection.accepted.len() > MAX_SHOT_TYPES {
        debug!(
            "Model suggested {} shot types; keeping the first {}",
            selection.accepted.len(),
            MAX_SHOT_TYPES
        );
        selection.accepted.truncate(MAX_SHOT_TYPES);
    }
    if !selection.rejected.is_empty() {
        warn!(
            "Discarded shot types outside the vocabulary: {:?}",
            selection.rejected
        );
    }

    selection
}

fn push_unique(accepted: &mut Vec<ShotType>, shot: ShotType) {
    if !accepted.contains(&shot) {
        accepted.push(shot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_label_round_trips() {
        for shot in ShotType::ALL {
            assert_eq!(ShotType::from_label(shot.label()), Some(shot));
        }
    }

    #[test]
    fn parses_one_entry_per_line_with_list_markers() {
        let answer = "1. Full body shot\n2. high angle\n- Bird eye shot\n";
        let selection = parse_shot_types(answer);
        assert_eq!(
            selection.accepted,
            vec![ShotType::FullBody, ShotType::HighAngle, ShotType::BirdsEye]
        );
        assert!(selection.rejected.is_empty());
    }

    #[test]
    fn falls_back_to_commas_and_keeps_perspective_pairs_together() {
        let selection = parse_shot_types("perspective, full body\nknee shot, dutch angle");
        assert_eq!(
            selection.accepted,
            vec![
                ShotType::FullBodyPerspective,
                ShotType::Knee,
                ShotType::DutchAngle
            ]
        );
    }

    #[test]
    fn discards_entries_outside_the_vocabulary() {
        let selection = parse_shot_types("Selfie\nmedium shot\nfisheye, bust");
        assert_eq!(selection.accepted, vec![ShotType::Medium, ShotType::Bust]);
        assert_eq!(selection.rejected, vec!["Selfie", "fisheye"]);
    }

    #[test]
    fn never_returns_more_than_three_unique_entries() {
        let selection = parse_shot_types("head\nhead\nbust\nknee\ndrone\nmedium");
        assert_eq!(
            selection.accepted,
            vec![ShotType::Head, ShotType::Bust, ShotType::Knee]
        );
        assert!(selection.accepted.len() <= MAX_SHOT_TYPES);
    }

    #[test]
    fn free_text_answer_yields_nothing() {
        let selection = parse_shot_types("I would suggest trying something more dynamic.");
        assert!(selection.accepted.is_empty());
        assert_eq!(selection.rejected.len(), 1);
    }

    #[test]
    fn vocabulary_list_names_every_entry() {
        let list = vocabulary_list();
        for shot in ShotType::ALL {
            assert!(list.contains(shot.label()));
        }
    }
}
