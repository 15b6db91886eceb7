//! Text statistics shared by the generation engine and output writer.

/// Count whitespace-separated words.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Summary line used in the header of a finished story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub words: usize,
    pub characters: usize,
    pub lines: usize,
}

impl TextStats {
    #[must_use]
    pub fn of(text: &str) -> Self {
        Self {
            words: word_count(text),
            characters: text.chars().count(),
            lines: text.lines().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_ignores_runs_of_whitespace() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   "), 0);
        assert_eq!(word_count("one  two\tthree\nfour"), 4);
    }

    #[test]
    fn test_text_stats() {
        let stats = TextStats::of("a b\nc");
        assert_eq!(stats.words, 3);
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.characters, 5);
    }
}
