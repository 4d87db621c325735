use crate::error::IngestError;
use crate::models::{ChunkMetadata, ChunkingStrategy, DocumentChunk, IngestionOptions};

/// Furthest distance, in characters, that a fixed-size boundary may move back
/// to land on a sentence terminator.
const SENTENCE_SEARCH_WINDOW: usize = 100;

const SENTENCE_TERMINATORS: [[char; 2]; 4] = [['.', ' '], ['.', '\n'], ['?', ' '], ['!', ' ']];

const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(IngestionOptions::default())
    }
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
            min_chunk_size: value.min_chunk_size,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chunk_size {} exceeds chunk_size {}",
                self.min_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

pub trait Chunker: Send + Sync {
    /// Splits `text` into ordered chunks. Offsets are character positions in
    /// `text`; `base` is copied into every chunk with its position filled in.
    fn chunk(&self, text: &str, base: &ChunkMetadata) -> Vec<DocumentChunk>;
}

/// Fixed windows that snap back to the last sentence end and overlap the
/// previous window by `chunk_overlap` characters.
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeChunker {
    config: ChunkingConfig,
}

impl FixedSizeChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str, base: &ChunkMetadata) -> Vec<DocumentChunk> {
        let chars: Vec<char> = text.chars().collect();
        let length = chars.len();
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        } = self.config;

        let mut spans = Vec::new();
        let mut start = 0;
        while start < length {
            let mut end = (start + chunk_size).min(length);

            if end < length {
                let floor =
                    (start + min_chunk_size).max(end.saturating_sub(SENTENCE_SEARCH_WINDOW));
                if let Some(terminator) = last_sentence_end(&chars, floor, end) {
                    if terminator > floor {
                        end = terminator + 1;
                    }
                }
            }

            let (span_start, span_end) = trim_span(&chars, start, end);
            if span_end > span_start && span_end - span_start >= min_chunk_size {
                spans.push((span_start, span_end));
            }

            // A snapped window shorter than the overlap would step back past
            // its own start, so the next one begins where it ended.
            start = if end < length {
                let next = end.saturating_sub(chunk_overlap);
                if next > start {
                    next
                } else {
                    end
                }
            } else {
                length
            };
        }

        assemble(&chars, &spans, base)
    }
}

/// Greedily merges blank-line separated paragraphs up to `chunk_size`.
/// Each chunk is the exact source span from its first paragraph to its last,
/// so offsets stay exact even when paragraphs carried surrounding whitespace.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
    config: ChunkingConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, base: &ChunkMetadata) -> Vec<DocumentChunk> {
        let chars: Vec<char> = text.chars().collect();
        let paragraphs = paragraph_spans(text);

        let mut spans = Vec::new();
        let mut buffer: Option<(usize, usize)> = None;
        let mut buffered_length = 0;

        for (start, end) in paragraphs {
            let paragraph_length = end - start;
            if let Some(span) = buffer {
                if buffered_length + paragraph_length > self.config.chunk_size {
                    spans.push(span);
                    buffer = None;
                    buffered_length = 0;
                }
            }

            buffer = Some(match buffer {
                Some((first, _)) => (first, end),
                None => (start, end),
            });
            buffered_length += paragraph_length + PARAGRAPH_BREAK.len();
        }

        if let Some(span) = buffer {
            spans.push(span);
        }

        assemble(&chars, &spans, base)
    }
}

pub fn chunker_for(
    strategy: ChunkingStrategy,
    config: ChunkingConfig,
) -> Result<Box<dyn Chunker>, IngestError> {
    Ok(match strategy {
        ChunkingStrategy::FixedSize => Box::new(FixedSizeChunker::new(config)?),
        ChunkingStrategy::Paragraph => Box::new(ParagraphChunker::new(config)?),
    })
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rightmost index `i` in `floor..=end-2` where a sentence terminator pair
/// starts, i.e. the pair lies entirely inside `floor..end`.
fn last_sentence_end(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    if end < floor + 2 {
        return None;
    }
    (floor..=end - 2)
        .rev()
        .find(|&index| SENTENCE_TERMINATORS.contains(&[chars[index], chars[index + 1]]))
}

fn trim_span(chars: &[char], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start, end)
}

/// Character spans of the trimmed, non-empty paragraphs of `text`.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut char_offset = 0;

    for paragraph in text.split(PARAGRAPH_BREAK) {
        let paragraph_chars = paragraph.chars().count();
        let leading = paragraph
            .chars()
            .take_while(|character| character.is_whitespace())
            .count();
        let trimmed_chars = paragraph.trim().chars().count();

        if trimmed_chars > 0 {
            let start = char_offset + leading;
            spans.push((start, start + trimmed_chars));
        }

        char_offset += paragraph_chars + PARAGRAPH_BREAK.len();
    }

    spans
}

fn assemble(chars: &[char], spans: &[(usize, usize)], base: &ChunkMetadata) -> Vec<DocumentChunk> {
    let total_chunks = spans.len();
    spans
        .iter()
        .enumerate()
        .map(|(chunk_index, &(start_char, end_char))| {
            let mut metadata = base.with_position(chunk_index, start_char, end_char);
            metadata.total_chunks = Some(total_chunks);
            DocumentChunk {
                text: chars[start_char..end_char].iter().collect(),
                metadata,
                chunk_index,
                start_char,
                end_char,
            }
        })
        .collect()
}
