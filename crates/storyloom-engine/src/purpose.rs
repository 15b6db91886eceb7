//! Labels attached to every generation call.
//!
//! The label travels with the invocation to the backend (for logs) and lets
//! scripted backends route responses without inspecting prompt text.

use strum::{AsRefStr, Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Purpose {
    TranslatePrompt,
    BaseContext,
    StoryElements,
    InitialOutline,
    OutlineCritique,
    OutlineRating,
    OutlineRevision,
    StoryInfo,
    ChapterCount,
    ChapterOutline,
    ChapterPlan,
    ChapterSummary,
    StagePlot,
    StageCharacter,
    StageDialogue,
    SceneBreakdown,
    SceneList,
    SceneWrite,
    CheckWorkSummary,
    CheckOutlineSummary,
    CheckCompare,
    ChapterCritique,
    ChapterRating,
    ChapterRevision,
    EditPass,
    ScrubPass,
    TranslatePass,
}

impl Purpose {
    /// Whether calls with this purpose expect a JSON payload back.
    #[must_use]
    pub fn is_structured(self) -> bool {
        matches!(
            self,
            Self::OutlineRating
                | Self::StoryInfo
                | Self::ChapterCount
                | Self::SceneList
                | Self::CheckCompare
                | Self::ChapterRating
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn labels_are_kebab_case() {
        assert_eq!(Purpose::ChapterCount.to_string(), "chapter-count");
        assert_eq!(Purpose::CheckOutlineSummary.as_ref(), "check-outline-summary");
        assert_eq!(Purpose::from_str("scene-write").unwrap(), Purpose::SceneWrite);
    }

    #[test]
    fn every_label_parses_back() {
        for purpose in Purpose::iter() {
            assert_eq!(Purpose::from_str(purpose.as_ref()).unwrap(), purpose);
        }
    }
}
