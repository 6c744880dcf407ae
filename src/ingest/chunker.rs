use crate::config::IngestConfig;

/// Turns a document into an ordered sequence of chunk texts.
///
/// Implementations must be deterministic: chunk ids are hashes of the
/// returned texts, so the same input has to produce the same chunks.
pub trait Splitter {
    fn split(&self, text: &str) -> Vec<String>;
}

impl<F> Splitter for F
where
    F: Fn(&str) -> Vec<String>,
{
    fn split(&self, text: &str) -> Vec<String> {
        self(text)
    }
}

/// Size-bounded splitter with overlap between consecutive chunks
#[derive(Debug, Clone, Copy)]
pub struct CharacterSplitter {
    /// Maximum chunk length in bytes
    pub chunk_size: usize,
    /// Bytes repeated from the end of one chunk at the start of the next
    pub chunk_overlap: usize,
}

impl CharacterSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl Default for CharacterSplitter {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl Splitter for CharacterSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.chunk_size, self.chunk_overlap)
    }
}

/// Chunk text with overlap
///
/// Prefers to end a chunk at whitespace or sentence punctuation found in the
/// last 20% of the window. All slicing happens on UTF-8 character
/// boundaries. Chunks are trimmed and empty ones dropped.
fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();

    // Largest char boundary at or before byte_pos
    let find_char_boundary = |byte_pos: usize| -> usize {
        if byte_pos >= text.len() {
            return text.len();
        }
        (0..=byte_pos)
            .rev()
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(0)
    };

    let mut start_byte = 0;

    while start_byte < text.len() {
        start_byte = find_char_boundary(start_byte);

        let end_byte = find_char_boundary((start_byte + chunk_size).min(text.len()));
        // A window narrower than one character still has to advance
        let end_byte = if end_byte <= start_byte {
            text[start_byte..]
                .char_indices()
                .nth(1)
                .map(|(offset, _)| start_byte + offset)
                .unwrap_or(text.len())
        } else {
            end_byte
        };

        let chunk_end_byte = if end_byte < text.len() {
            let search_start_byte = find_char_boundary(end_byte.saturating_sub(chunk_size / 5).max(start_byte));
            text.get(search_start_byte..end_byte)
                .and_then(|window| {
                    window
                        .char_indices()
                        .rev()
                        .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                        .map(|(offset, c)| search_start_byte + offset + c.len_utf8())
                })
                .filter(|&boundary| boundary > start_byte)
                .unwrap_or(end_byte)
        } else {
            end_byte
        };

        if let Some(chunk) = text.get(start_byte..chunk_end_byte) {
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        }

        if chunk_end_byte >= text.len() {
            break;
        }

        let next_start_byte = find_char_boundary(chunk_end_byte.saturating_sub(chunk_overlap));
        start_byte = if next_start_byte <= start_byte {
            chunk_end_byte
        } else {
            next_start_byte
        };
    }

    chunks
}
