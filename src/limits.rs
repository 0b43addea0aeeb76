//! Processing limits to mitigate malicious documents.

/// Maximum level of nesting for XInclude processing.
///
/// Direct and indirect self-inclusion is detected exactly, by keeping the
/// stack of `(url, fragid)` pairs currently being included.  That check does
/// not bound chains of *distinct* inclusions, so a generated document could
/// still drive the processor into unbounded recursion.  This value caps the
/// nesting depth; exceeding it is a fatal error.
pub const MAX_XINCLUDE_DEPTH: usize = 20;
