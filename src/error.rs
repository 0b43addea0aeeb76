//! Error types.

use std::error;
use std::fmt;

use crate::limits;

/// Errors for implementation-defined limits, to mitigate malicious documents.
#[non_exhaustive]
#[derive(Debug, Copy, Clone)]
pub enum ImplementationLimit {
    /// Document exceeded the maximum nesting level for inclusions.
    ///
    /// Cyclic inclusion chains are caught exactly by the include stack, but a
    /// long non-cyclic chain of `xi:include` elements can still be used to
    /// make the processor recurse arbitrarily deep.  This limit bounds the
    /// recursion independently of cycle detection.
    TooDeeplyNestedIncludes,
}

impl fmt::Display for ImplementationLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ImplementationLimit::TooDeeplyNestedIncludes => write!(
                f,
                "exceeded maximum level of {} nested inclusions",
                limits::MAX_XINCLUDE_DEPTH
            ),
        }
    }
}

/// A recoverable failure to fetch an inclusion target.
///
/// This is deliberately a separate type from [`TransclusionError`]: a fetch
/// failure may be handled by an `xi:fallback`, while everything else aborts
/// the run.  Callers that exhaust the fallback route upgrade this to
/// [`TransclusionError::NoFallback`].
#[derive(Debug, Clone)]
pub struct ResourceError {
    /// URL of the target that could not be fetched.
    pub url: String,

    /// URL of the document that contains the offending `xi:include`.
    pub file: String,

    /// Source line of the `xi:include` element.
    pub line: usize,

    /// Human-readable reason from the loader.
    pub reason: String,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Warning at {}:{}: Could not get target \"{}\": {}",
            self.file, self.line, self.url, self.reason
        )
    }
}

/// Fatal errors that abort a transclusion run.
///
/// All variants render as a single diagnostic line in the form
/// `Error at <file>:<line>: <message>`, where `<file>` is the URL of the
/// document the offending element came from (possibly empty for documents
/// read from stdin).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum TransclusionError {
    /// A document (input or included) is not well-formed XML.
    XmlParse { url: String, reason: String },

    /// Included content is not valid UTF-8.
    Utf8 { url: String },

    /// `xi:include` has neither an `href` nor a `fragid`.
    MissingHref { file: String, line: usize },

    /// An unknown unnamespaced attribute on `xi:include`.
    InvalidAttribute {
        name: String,
        file: String,
        line: usize,
    },

    /// `xpointer` is not implemented; `fragid` covers the supported subset.
    XPointerUnsupported { file: String, line: usize },

    /// The `parse` attribute is neither `xml` nor `text/plain`.
    InvalidParse {
        value: String,
        file: String,
        line: usize,
    },

    /// `xi:include` has children other than a single `xi:fallback`.
    InvalidFallback { file: String, line: usize },

    /// The target could not be fetched and there is no `xi:fallback`.
    NoFallback { file: String, line: usize },

    /// No single element with a matching `xml:id` in the target document.
    FragidNotFound {
        fragid: String,
        url: String,
        file: String,
        line: usize,
    },

    /// The `(url, fragid)` pair is already being included further up.
    InfiniteRecursion {
        url: String,
        file: String,
        line: usize,

        /// The chain of inclusions that led back to `url`.
        chain: Vec<String>,
    },

    /// Unknown `trans:idfixup` value.
    BadIdfixup {
        value: String,
        file: String,
        line: usize,
    },

    /// `trans:idfixup="suffix"` without an inherited `trans:suffix`.
    MissingSuffix { file: String, line: usize },

    /// Unknown `trans:linkscope` value.
    BadLinkscope {
        value: String,
        file: String,
        line: usize,
    },

    /// An IDREF token does not resolve to any element in scope.
    UnresolvedReference {
        reference: String,
        file: String,
        line: usize,
    },

    /// A particular implementation-defined limit was exceeded.
    LimitExceeded(ImplementationLimit),
}

impl error::Error for TransclusionError {}

impl fmt::Display for TransclusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TransclusionError::*;
        match *self {
            XmlParse {
                ref url,
                ref reason,
            } => write!(f, "Error: Could not parse \"{url}\": {reason}"),

            Utf8 { ref url } => {
                write!(f, "Error: Content of \"{url}\" is not valid UTF-8")
            }

            MissingHref { ref file, line } => write!(
                f,
                "Error at {file}:{line}: Missing href attribute and no fragid provided"
            ),

            InvalidAttribute {
                ref name,
                ref file,
                line,
            } => write!(f, "Error at {file}:{line}: Invalid attribute {name:?}"),

            XPointerUnsupported { ref file, line } => write!(
                f,
                "Error at {file}:{line}: The xpointer attribute is not supported, use fragid instead"
            ),

            InvalidParse {
                ref value,
                ref file,
                line,
            } => write!(
                f,
                "Error at {file}:{line}: Invalid value for parse: {value:?}. \
                 Expected 'xml' or 'text/plain'."
            ),

            InvalidFallback { ref file, line } => write!(
                f,
                "Error at {file}:{line}: Only one xi:fallback can be a child of xi:include"
            ),

            NoFallback { ref file, line } => write!(
                f,
                "Error at {file}:{line}: Target not available and no fallback provided"
            ),

            FragidNotFound {
                ref fragid,
                ref url,
                ref file,
                line,
            } => write!(
                f,
                "Error at {file}:{line}: Could not find fragid {fragid:?} in target {url:?}"
            ),

            InfiniteRecursion {
                ref url,
                ref file,
                line,
                ref chain,
            } => {
                write!(
                    f,
                    "Error at {file}:{line}: Infinite recursion detected while including {url:?}"
                )?;
                if !chain.is_empty() {
                    write!(f, " (inclusion chain: {})", chain.join(" -> "))?;
                }
                Ok(())
            }

            BadIdfixup {
                ref value,
                ref file,
                line,
            } => write!(
                f,
                "Error at {file}:{line}: idfixup type {value:?} not implemented"
            ),

            MissingSuffix { ref file, line } => write!(
                f,
                "Error at {file}:{line}: idfixup requires a suffix but no trans:suffix is in scope"
            ),

            BadLinkscope {
                ref value,
                ref file,
                line,
            } => write!(
                f,
                "Error at {file}:{line}: linkscope type {value:?} not implemented"
            ),

            UnresolvedReference {
                ref reference,
                ref file,
                line,
            } => write!(
                f,
                "Error at {file}:{line}: Could not resolve reference {reference:?}"
            ),

            LimitExceeded(ref l) => write!(f, "Error: {l}"),
        }
    }
}
