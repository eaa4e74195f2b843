pub type StencilResult<T> = std::result::Result<T, StencilError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnexpectedChar {
        found: char,
    },
    UnexpectedEOF {
        /// Describes what was expected, e.g., "(expected '}')"
        expected_what: String,
    },
    InvalidNumber {
        literal: String,
    },
    UnknownEscape {
        escape: char,
    },
    Expected {
        description: String,
    },
    Message(String),
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedChar { found } => {
                write!(f, "Unexpected character '{}'", found)
            }
            Self::UnexpectedEOF { expected_what } => {
                write!(f, "Unexpected EOF{}", expected_what)
            }
            Self::InvalidNumber { literal } => {
                write!(f, "Invalid number literal '{}'", literal)
            }
            Self::UnknownEscape { escape } => {
                write!(f, "Unknown escape sequence '\\{}'", escape)
            }
            Self::Expected { description } => {
                write!(f, "Expected {}", description)
            }
            Self::Message(msg) => {
                write!(f, "Parser error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ParseErrorKind {}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Error returned from a [`Helper`](crate::Helper) invocation.
///
/// Surfaces as a [`StencilError::Evaluation`] carrying the name of the
/// template whose marker invoked the helper.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HelperError {
    pub message: String,
}

impl HelperError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HelperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Helper error: {}", self.message)
    }
}

impl std::error::Error for HelperError {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StencilError {
    /// `render` or `include` targeted a name with no registered template.
    TemplateNotFound {
        template_name: String,
    },
    /// An interpolation expression failed to parse or to evaluate.
    Evaluation {
        template_name: String,
        message: String,
    },
    /// Walking or reading the template directory failed.
    Discover {
        path: String,
        message: String,
    },
}

impl std::fmt::Display for StencilError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TemplateNotFound { template_name } => {
                write!(f, "Template not found: {}", template_name)
            }
            Self::Evaluation {
                template_name,
                message,
            } => {
                write!(f, "Template error in \"{}\": {}", template_name, message)
            }
            Self::Discover { path, message } => {
                write!(f, "Template discovery failed at {}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for StencilError {}
