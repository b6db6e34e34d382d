use serde::Serialize;

use crate::error::{CompileErrorKind, CompilerError};
use pkl_opcodes::PKLC_REPORT_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Pipeline stage a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Lower,
    Codegen,
    Optimize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Machine-readable compilation outcome, mirroring the report surface other
/// tooling in this workspace consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: PKLC_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn from_error(err: &CompilerError) -> Self {
        Self {
            schema_version: PKLC_REPORT_SCHEMA_VERSION.to_string(),
            ok: false,
            diagnostics: vec![diagnostic_for(err)],
        }
    }
}

pub fn diagnostic_for(err: &CompilerError) -> Diagnostic {
    let stage = match err.kind {
        CompileErrorKind::Parse => Stage::Parse,
        CompileErrorKind::Unsupported => Stage::Lower,
        CompileErrorKind::Construction | CompileErrorKind::Resolution => Stage::Codegen,
        CompileErrorKind::Compatibility => Stage::Optimize,
        CompileErrorKind::Internal => Stage::Codegen,
    };
    Diagnostic {
        code: format!("pklc.{}", err.kind.as_str()),
        severity: Severity::Error,
        stage,
        message: err.message.clone(),
        notes: Vec::new(),
    }
}
