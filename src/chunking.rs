//! Groups classified lines into size-bounded, single-category text chunks and
//! turns every extracted table into a chunk of its own.
//!
//! A new chunk starts whenever a header line switches the topical category.
//! When the running buffer grows past `chunk_size` words it is re-split on
//! sentence boundaries; a sentence is never cut, so a chunk may exceed the
//! bound only when it holds exactly one oversized sentence.

use crate::config::ChunkingConfig;
use crate::model::{
    Chunk, ChunkMetadata, ExtractedLine, ExtractedTable, SectionCategory, TableChunkMetadata,
    TextChunkMetadata,
};
use crate::util::now_utc_string;

const ABBREVIATIONS: &[&str] = &[
    "e.g.", "i.e.", "etc.", "vs.", "no.", "nos.", "mr.", "mrs.", "ms.", "dr.", "inc.", "co.",
    "ltd.", "art.", "sec.", "approx.",
];

#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    config: ChunkingConfig,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Single pass over `lines` in document order, then one chunk per table.
    pub fn build(&self, lines: &[ExtractedLine], tables: &[ExtractedTable]) -> Vec<Chunk> {
        let created_at = now_utc_string();
        let mut chunks = Vec::<Chunk>::new();
        let mut buffer = Vec::<String>::new();
        let mut buffer_words = 0usize;
        let mut current_section = SectionCategory::General;

        for line in lines {
            if line.is_header && line.section != current_section {
                if !buffer.is_empty() {
                    chunks.push(text_chunk(
                        buffer.join(" "),
                        current_section,
                        &created_at,
                    ));
                }
                buffer = vec![line.text.clone()];
                buffer_words = word_count(&line.text);
                current_section = line.section;
            } else {
                buffer.push(line.text.clone());
                buffer_words += word_count(&line.text);
            }

            if buffer_words > self.config.chunk_size {
                buffer = self.split_overflow(
                    &buffer.join(" "),
                    current_section,
                    &created_at,
                    &mut chunks,
                );
                buffer_words = buffer.iter().map(|part| word_count(part)).sum();
            }
        }

        if buffer_words > 0 {
            chunks.push(text_chunk(buffer.join(" "), current_section, &created_at));
        }

        chunks.extend(tables.iter().filter_map(table_chunk));
        chunks
    }

    /// Emits every full sentence group and returns the unemitted remainder,
    /// which becomes the new working buffer.
    fn split_overflow(
        &self,
        text: &str,
        section: SectionCategory,
        created_at: &str,
        chunks: &mut Vec<Chunk>,
    ) -> Vec<String> {
        let mut pending = Vec::<String>::new();
        let mut pending_words = 0usize;

        for sentence in split_sentences(text) {
            let sentence_words = word_count(&sentence);
            if !pending.is_empty() && pending_words + sentence_words > self.config.chunk_size {
                chunks.push(text_chunk(pending.join(" "), section, created_at));
                pending.clear();
                pending_words = 0;
            }
            pending_words += sentence_words;
            pending.push(sentence);
        }

        pending
    }
}

fn text_chunk(content: String, section: SectionCategory, created_at: &str) -> Chunk {
    let metadata = TextChunkMetadata {
        section_type: section,
        word_count: word_count(&content),
        char_count: content.chars().count(),
        created_at: created_at.to_string(),
    };
    Chunk {
        content,
        metadata: ChunkMetadata::Text(metadata),
    }
}

fn table_chunk(table: &ExtractedTable) -> Option<Chunk> {
    let content = table.flattened_text();
    if content.trim().is_empty() {
        return None;
    }

    Some(Chunk {
        content,
        metadata: ChunkMetadata::Table(TableChunkMetadata {
            page: table.page,
            table_index: table.table_index,
            method: table.method.clone(),
            confidence: table.confidence,
        }),
    })
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits after `.`, `!` or `?` when followed by whitespace and a character that
/// can open a sentence. Common abbreviations do not end a sentence. Only
/// whitespace between sentences is dropped, so word counts are preserved.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::<String>::new();
    let words = text.split_whitespace().collect::<Vec<&str>>();
    let mut current = Vec::<&str>::new();

    for (index, word) in words.iter().copied().enumerate() {
        current.push(word);

        let next_opens_sentence = words
            .get(index + 1)
            .and_then(|next| next.chars().next())
            .map(|character| {
                character.is_uppercase()
                    || character.is_ascii_digit()
                    || matches!(character, '"' | '\'' | '(' | '“' | '‘')
            })
            .unwrap_or(false);

        if next_opens_sentence && ends_sentence(word) {
            sentences.push(current.join(" "));
            current.clear();
        }
    }

    if !current.is_empty() {
        sentences.push(current.join(" "));
    }
    sentences
}

fn ends_sentence(word: &str) -> bool {
    let trimmed = word.trim_end_matches(['"', '\'', ')', '”', '’']);
    if !trimmed.ends_with(['.', '!', '?']) {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !ABBREVIATIONS.contains(&lowered.as_str())
}
