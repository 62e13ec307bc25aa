//! Chunking: split normalised text into speech-request-sized pieces.
//!
//! Sentences (split on `.`, `!`, `?`) are greedily packed into chunks joined
//! by `". "`. A sentence that cannot fit in an empty chunk is packed word by
//! word instead, and its tail stays open so following sentences can join it.
//! A single word longer than the limit is cut at character boundaries; this
//! is the only case where a word is split.
//!
//! Lengths are counted in `char`s, and the length checked against the limit
//! is the exact length of the joined chunk.

use serde::Serialize;

/// One piece of text destined for a single speech request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// 0-based position; also the ordinal in the chunk file name.
    pub index: usize,
    pub text: String,
}

impl TextChunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

const SENTENCE_SEP: &str = ". ";
const WORD_SEP: &str = " ";

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Never returns an empty chunk. `max_chars == 0` is treated as 1.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max = max_chars.max(1);
    let mut packer = Packer::new(max);

    for sentence in text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if packer.try_append(sentence, SENTENCE_SEP) {
            continue;
        }
        packer.flush();

        if char_len(sentence) <= max {
            packer.start(sentence);
            continue;
        }

        // Over-long sentence: pack word by word. The last partial chunk
        // becomes the open chunk.
        for word in sentence.split_whitespace() {
            for piece in hard_split(word, max) {
                if !packer.try_append(piece, WORD_SEP) {
                    packer.flush();
                    packer.start(piece);
                }
            }
        }
    }
    packer.flush();

    packer
        .done
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index, text })
        .collect()
}

struct Packer {
    max: usize,
    current: String,
    current_len: usize,
    done: Vec<String>,
}

impl Packer {
    fn new(max: usize) -> Self {
        Self {
            max,
            current: String::new(),
            current_len: 0,
            done: Vec::new(),
        }
    }

    /// Append `piece` with `sep` if the joined result fits. An empty chunk
    /// takes the piece without a separator.
    fn try_append(&mut self, piece: &str, sep: &str) -> bool {
        let piece_len = char_len(piece);
        let joined = if self.current.is_empty() {
            piece_len
        } else {
            self.current_len + sep.len() + piece_len
        };
        if joined > self.max {
            return false;
        }
        if !self.current.is_empty() {
            self.current.push_str(sep);
        }
        self.current.push_str(piece);
        self.current_len = joined;
        true
    }

    fn start(&mut self, piece: &str) {
        self.current = piece.to_string();
        self.current_len = char_len(piece);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.done.push(std::mem::take(&mut self.current));
        }
        self.current_len = 0;
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `word` into pieces of at most `max` chars. Words that fit come back whole.
fn hard_split(word: &str, max: usize) -> Vec<&str> {
    if char_len(word) <= max {
        return vec![word];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (byte_idx, _) in word.char_indices() {
        if count == max {
            pieces.push(&word[start..byte_idx]);
            start = byte_idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&word[start..]);
    pieces
}
