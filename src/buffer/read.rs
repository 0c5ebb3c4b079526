use super::search::SearchStrategy;

/// Cursor over borrowed bytes.
///
/// Searches never move the cursor when the delimiter is missing, so a caller
/// can append more input and retry the same logical read.
#[derive(Clone, Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    index: usize,
    strategy: SearchStrategy,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            index: 0,
            strategy: SearchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn read_index(&self) -> usize {
        self.index
    }

    /// Moves the cursor; positions past the end are clamped.
    pub fn set_read_index(&mut self, index: usize) {
        self.index = index.min(self.data.len());
    }

    /// Bytes between the cursor and the end.
    pub fn available(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.index..]
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.index)?;
        self.index += 1;
        Some(b)
    }

    /// Exactly `n` bytes, or `None` if fewer are available.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.available() < n {
            return None;
        }
        let out = &self.data[self.index..self.index + n];
        self.index += n;
        Some(out)
    }

    /// Bytes before the next `delim`; the cursor moves past the delimiter.
    ///
    /// An empty slice means the delimiter sits at the cursor. `None` means it
    /// was not found and the cursor did not move.
    pub fn read_until(&mut self, delim: u8) -> Option<&'a [u8]> {
        let rest = self.remaining();
        let at = self.strategy.find(rest, delim)?;
        self.index += at + 1;
        Some(&rest[..at])
    }

    /// Two-byte form of [`read_until`](Self::read_until), e.g. CR LF.
    pub fn read_until2(&mut self, first: u8, second: u8) -> Option<&'a [u8]> {
        let rest = self.remaining();
        let at = self.strategy.find2(rest, first, second)?;
        self.index += at + 2;
        Some(&rest[..at])
    }
}
