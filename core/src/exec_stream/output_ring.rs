use std::collections::VecDeque;

/// Default tail size handed back in yield payloads and poll responses.
pub(crate) const DEFAULT_TAIL_CHARS: usize = 2_048;

/// Bounded, character-counted buffer of output chunks. Appends keep the most
/// recent characters; once any prefix has been dropped the ring reports
/// `truncated` for the rest of its life. Chunks are always well-formed
/// strings, so trims can never split a multi-byte sequence.
#[derive(Debug)]
pub(crate) struct OutputRing {
    chunks: VecDeque<String>,
    chars: usize,
    cap: usize,
    truncated: bool,
}

impl OutputRing {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            chars: 0,
            cap,
            truncated: false,
        }
    }

    pub(crate) fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.chars += chunk.chars().count();
        self.chunks.push_back(chunk.to_string());

        let mut excess = self.chars.saturating_sub(self.cap);
        while excess > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let front_chars = front.chars().count();
            if front_chars <= excess {
                excess -= front_chars;
                self.chars -= front_chars;
                self.chunks.pop_front();
            } else {
                let cut = front
                    .char_indices()
                    .nth(excess)
                    .map(|(idx, _)| idx)
                    .unwrap_or(front.len());
                front.drain(..cut);
                self.chars -= excess;
                excess = 0;
            }
            self.truncated = true;
        }
    }

    pub(crate) fn aggregated(&self) -> String {
        let mut out = String::with_capacity(self.chunks.iter().map(String::len).sum());
        for chunk in &self.chunks {
            out.push_str(chunk);
        }
        out
    }

    /// The last `n` characters, or everything if the ring holds fewer.
    pub(crate) fn tail(&self, n: usize) -> String {
        if n == 0 {
            return String::new();
        }
        let mut needed = n;
        let mut pieces: Vec<&str> = Vec::new();
        for chunk in self.chunks.iter().rev() {
            let count = chunk.chars().count();
            if count <= needed {
                pieces.push(chunk.as_str());
                needed -= count;
                if needed == 0 {
                    break;
                }
            } else {
                let skip = count - needed;
                let idx = chunk
                    .char_indices()
                    .nth(skip)
                    .map(|(i, _)| i)
                    .unwrap_or(chunk.len());
                pieces.push(&chunk[idx..]);
                break;
            }
        }
        pieces.reverse();
        pieces.concat()
    }

    /// Characters currently held.
    pub(crate) fn len(&self) -> usize {
        self.chars
    }

    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }
}
