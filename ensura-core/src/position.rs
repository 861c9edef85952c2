use std::fmt;

use serde::{Deserialize, Serialize};

/// A location in a `.ens` source file, attached to every token and AST node
/// so diagnostics can point back at the text that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub filename: String,
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Position {
    pub fn start(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            line: 1,
            column: 1,
            byte_offset: 0,
        }
    }
}

// Position equality is identity-free: two positions from unrelated files or
// offsets are simply unequal, but we don't want derived Eq/Hash since
// ResourceRef equality (§3) is defined over normalized type:path, not
// position. Comparisons here are only used by tests and diagnostics.
impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.line == other.line
            && self.column == other.column
            && self.byte_offset == other.byte_offset
    }
}
impl Eq for Position {}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}
