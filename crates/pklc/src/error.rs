use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Invalid node rejected while building the tree.
    Construction,
    /// A memo variable was loaded before it was assigned.
    Resolution,
    /// The stream uses an instruction set a pass does not model.
    Compatibility,
    /// A source construct outside the supported subset.
    Unsupported,
    Parse,
    Internal,
}

impl CompileErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompileErrorKind::Construction => "construction",
            CompileErrorKind::Resolution => "resolution",
            CompileErrorKind::Compatibility => "compatibility",
            CompileErrorKind::Unsupported => "unsupported",
            CompileErrorKind::Parse => "parse",
            CompileErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompilerError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(construct: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            CompileErrorKind::Unsupported,
            format!("unsupported construct {construct}: {detail}"),
        )
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for CompilerError {}

pub type Result<T> = std::result::Result<T, CompilerError>;
