//! Response chunking into synthesis units
//!
//! Streamed LLM text is split into sentence-bounded units for the TTS
//! provider. A unit closes at sentence-terminal punctuation followed by
//! whitespace, or at the soft character cap when no boundary appears, or
//! at end of stream. Unit text is preserved verbatim: concatenating all
//! units plus the remaining tail reproduces the streamed text exactly.

/// One contiguous text span sent to TTS as a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthUnit {
    /// Position within the turn; strictly increasing from zero.
    pub index: usize,
    pub text: String,
}

/// Sentence-terminal characters.
fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '?' | '!')
}

/// Accumulates streamed fragments and emits synthesis units.
pub struct SynthChunker {
    buffer: String,
    soft_cap: usize,
    next_index: usize,
}

impl SynthChunker {
    pub fn new(soft_cap: usize) -> Self {
        Self {
            buffer: String::new(),
            soft_cap,
            next_index: 0,
        }
    }

    /// Feed a fragment; returns every unit it completed, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<SynthUnit> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        while let Some(cut) = self.find_cut() {
            let rest = self.buffer.split_off(cut);
            let text = std::mem::replace(&mut self.buffer, rest);
            units.push(self.make_unit(text));
        }
        units
    }

    /// End of stream: the non-empty tail becomes the final unit.
    pub fn finish(&mut self) -> Option<SynthUnit> {
        let text = std::mem::take(&mut self.buffer);
        if text.trim().is_empty() {
            return None;
        }
        Some(self.make_unit(text))
    }

    /// Byte position of the next unit boundary, if one is ready.
    ///
    /// A sentence boundary within the first `soft_cap` characters wins;
    /// otherwise a forced cut fires once the buffer exceeds the cap. A
    /// terminal character at the end of the buffer is not a boundary
    /// yet: the following character decides.
    fn find_cut(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        let mut seen = 0usize;

        while let Some((_, c)) = chars.next() {
            seen += 1;
            if is_terminal(c) {
                if let Some(&(next_pos, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(next_pos);
                    }
                }
            }
            if seen == self.soft_cap {
                if let Some(&(next_pos, _)) = chars.peek() {
                    return Some(next_pos);
                }
            }
        }
        None
    }

    fn make_unit(&mut self, text: String) -> SynthUnit {
        let unit = SynthUnit {
            index: self.next_index,
            text,
        };
        self.next_index += 1;
        unit
    }
}
