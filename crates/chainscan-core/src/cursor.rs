//! Scan cursor — the persisted position of one asset's scanner.

use serde::{Deserialize, Serialize};

/// The `(height, hash)` pointer marking the last block fully scanned.
///
/// The cursor is owned by the scan store and mutated only by the scan loop:
/// forward after a block is fully processed, backward during fork rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// Height of the last fully scanned block.
    pub height: u64,
    /// Hash of the last fully scanned block.
    pub hash: String,
}

impl ScanCursor {
    /// Create a cursor at the given position.
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// `(0, "")` means "never scanned". The engine bootstraps such a cursor
    /// to just below the chain head instead of walking up from genesis.
    pub fn is_unset(&self) -> bool {
        self.height == 0 && self.hash.is_empty()
    }

    /// Move the cursor forward to a newly scanned block.
    pub fn advance(&mut self, height: u64, hash: impl Into<String>) {
        self.height = height;
        self.hash = hash.into();
    }

    /// The next height to scan (cursor + 1).
    pub fn next_height(&self) -> u64 {
        self.height + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unset() {
        assert!(ScanCursor::default().is_unset());
        assert!(!ScanCursor::new(0, "0xgenesis").is_unset());
        assert!(!ScanCursor::new(5, "").is_unset());
    }

    #[test]
    fn cursor_advance() {
        let mut cursor = ScanCursor::new(100, "0xaaa");
        cursor.advance(101, "0xbbb");
        assert_eq!(cursor.height, 101);
        assert_eq!(cursor.hash, "0xbbb");
    }

    #[test]
    fn cursor_next_height() {
        let cursor = ScanCursor::new(500, "0x123");
        assert_eq!(cursor.next_height(), 501);
    }
}
