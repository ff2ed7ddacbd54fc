use std::collections::VecDeque;

use crate::chunk::Chunk;
use crate::reader::PageText;

/// Separators tried in order: paragraph, line, word, character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters carried over from the end of one chunk into the next
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk every page independently so each chunk keeps its page label.
    pub fn chunk_pages(&self, doc_id: &str, source: &str, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for page in pages {
            for text in self.split_text(&page.text) {
                let ordinal = chunks.len();
                chunks.push(Chunk::new(
                    doc_id.to_string(),
                    text,
                    source.to_string(),
                    page.page,
                    ordinal,
                ));
            }
        }

        chunks
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let (separator, finer) = pick_separator(text, separators);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }

            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }

        chunks
    }

    /// Greedily pack pieces up to `chunk_size`, keeping up to `chunk_overlap`
    /// characters of the previous chunk at the start of the next.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let sep_len = char_len(separator);

        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = |pieces: usize| if pieces == 0 { 0 } else { sep_len };

            if total + len + joiner(window.len()) > size && !window.is_empty() {
                push_joined(&window, separator, &mut docs);

                while total > overlap || (total > 0 && total + len + joiner(window.len()) > size) {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    total = total.saturating_sub(char_len(first) + joiner(window.len()));
                }
            }

            window.push_back(piece);
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }

        push_joined(&window, separator, &mut docs);
        docs
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (*separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn push_joined(window: &VecDeque<&str>, separator: &str, docs: &mut Vec<String>) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::PageLabel;

    fn small(chunk_size: usize, chunk_overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap,
        })
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.split_text("Parking Space With No Action: 42\n\nParking Space With Action: 10");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("42"));
        assert!(chunks[0].contains("10"));
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let chunker = small(50, 10);
        let text = (0..40).map(|i| format!("w{:02}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunker.split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {}", chunk);
        }
        // consecutive chunks share their boundary words
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(pair[1].contains(last_word));
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "a".repeat(2000);
        let chunks = chunker.split_text(&text);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 400);
    }

    #[test]
    fn test_paragraphs_are_preferred_boundaries() {
        let chunker = small(30, 0);
        let chunks = chunker.split_text("first paragraph here\n\nsecond paragraph here");
        assert_eq!(chunks, vec!["first paragraph here", "second paragraph here"]);
    }

    #[test]
    fn test_chunk_pages_keeps_page_labels() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let pages = vec![
            PageText { page: PageLabel::Number(0), text: "page one".into() },
            PageText { page: PageLabel::Number(1), text: "   ".into() },
            PageText { page: PageLabel::Number(2), text: "page three".into() },
        ];
        let chunks = chunker.chunk_pages("doc", "a.pdf", &pages);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, PageLabel::Number(0));
        assert_eq!(chunks[1].page, PageLabel::Number(2));
        assert_eq!(chunks[0].doc_id, "doc");
    }
}
