//! Semantic trace endpoints and the enhanced trace itself
//!
//! Input and output endpoints are closed tagged sums with a `to_string` /
//! `parse` pair per tag (the CSV loader round-trips through these). Each
//! carries enough ground data (names, indices, codes) to be matched across
//! builds without pointer identity; the SEG anchors (`used_node`,
//! `used_site`) tie the endpoint back into the current build's trace.

use crate::features::condition::CondId;
use crate::features::slicing::SegTrace;
use crate::shared::models::{PatchSpecError, Result, SegNodeId, SegSiteId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TAG_INDIRECT_CALL: &str = "Indirect call: ";
pub const TAG_RETURN_OF_API: &str = "Return of API: ";
pub const TAG_ERROR_CODE: &str = "Error code: ";
pub const TAG_GLOBAL_VARIABLE: &str = "Global variable: ";
pub const TAG_SENSITIVE_INPUT: &str = "Sensitive Input Value: ";

pub const TAG_RETURN_OF_INDIRECT: &str = "Return of indirect call: ";
pub const TAG_SENSITIVE_OPCODE: &str = "Used in sensitive opcode: ";
pub const TAG_SENSITIVE_API: &str = "Used in sensitive API: ";
pub const TAG_CUSTOMIZED_API: &str = "Used in customized API: ";

/// Semantic input classification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputKind {
    /// Argument of an indirectly-invoked function; `func` is `file:name`,
    /// `arg` is `arg_<i>` with an optional `:<offsets>` access-path suffix
    IndirectArg { func: String, arg: String },
    /// Return value of a kernel/common API call
    ArgRetOfApi { api: String, index: i32 },
    /// Error-code constant whose guard traces back to a failing API
    ErrorCode { cause: Box<InputKind>, code: i64 },
    GlobalVarIn { global: String },
    SensitiveIn { value_type: String },
}

impl InputKind {
    pub fn to_spec_string(&self) -> String {
        match self {
            InputKind::IndirectArg { func, arg } => {
                format!("{}{} Arg Name: {}", TAG_INDIRECT_CALL, func, arg)
            }
            InputKind::ArgRetOfApi { api, index } => {
                format!("{}{}#{}", TAG_RETURN_OF_API, api, index)
            }
            InputKind::ErrorCode { cause, code } => format!(
                "{}{} Caused by Input Node: {}",
                TAG_ERROR_CODE,
                code,
                cause.to_spec_string()
            ),
            InputKind::GlobalVarIn { global } => format!("{}{}", TAG_GLOBAL_VARIABLE, global),
            InputKind::SensitiveIn { value_type } => {
                format!("{}{}", TAG_SENSITIVE_INPUT, value_type)
            }
        }
    }

    /// Inverse of [`to_spec_string`]; unknown tags are `SpecMalformed`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(TAG_INDIRECT_CALL) {
            let (func, arg) = rest.split_once(" Arg Name: ").ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad indirect-call input: {:?}", text))
            })?;
            return Ok(InputKind::IndirectArg {
                func: func.to_string(),
                arg: arg.to_string(),
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_RETURN_OF_API) {
            let (api, index) = rest.rsplit_once('#').ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad API-return input: {:?}", text))
            })?;
            let index = index.parse::<i32>().map_err(|_| {
                PatchSpecError::spec_malformed(format!("bad API-return index: {:?}", text))
            })?;
            return Ok(InputKind::ArgRetOfApi {
                api: api.to_string(),
                index,
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_ERROR_CODE) {
            let (code, cause) = rest.split_once(" Caused by Input Node: ").ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad error-code input: {:?}", text))
            })?;
            let code = code.parse::<i64>().map_err(|_| {
                PatchSpecError::spec_malformed(format!("bad error code: {:?}", text))
            })?;
            return Ok(InputKind::ErrorCode {
                cause: Box::new(InputKind::parse(cause)?),
                code,
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_GLOBAL_VARIABLE) {
            return Ok(InputKind::GlobalVarIn {
                global: rest.to_string(),
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_SENSITIVE_INPUT) {
            return Ok(InputKind::SensitiveIn {
                value_type: rest.to_string(),
            });
        }
        Err(PatchSpecError::spec_malformed(format!(
            "unknown input tag: {:?}",
            text
        )))
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_spec_string())
    }
}

/// Semantic output classification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputKind {
    /// Return value of an indirectly-invoked function (`file:name`)
    IndirectRet { func: String },
    /// Operand of a sensitive opcode (div, deref, ...)
    SensitiveOp { opcode: String, operand_index: i32 },
    /// Argument of a known-sensitive API (memcpy length, ...)
    SensitiveApi { api: String, arg_index: u32 },
    /// Pointer argument of a module-external API
    CustomizedApi { api: String, arg_index: u32 },
    GlobalVarOut { global: String },
}

impl OutputKind {
    pub fn to_spec_string(&self) -> String {
        match self {
            OutputKind::IndirectRet { func } => format!("{}{}", TAG_RETURN_OF_INDIRECT, func),
            OutputKind::SensitiveOp {
                opcode,
                operand_index,
            } => format!(
                "{}{} Operand idx: {}",
                TAG_SENSITIVE_OPCODE, opcode, operand_index
            ),
            OutputKind::SensitiveApi { api, arg_index } => {
                format!("{}{} Arg idx: {}", TAG_SENSITIVE_API, api, arg_index)
            }
            OutputKind::CustomizedApi { api, arg_index } => {
                format!("{}{} Arg idx: {}", TAG_CUSTOMIZED_API, api, arg_index)
            }
            OutputKind::GlobalVarOut { global } => format!("{}{}", TAG_GLOBAL_VARIABLE, global),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(TAG_RETURN_OF_INDIRECT) {
            return Ok(OutputKind::IndirectRet {
                func: rest.to_string(),
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_SENSITIVE_OPCODE) {
            let (opcode, index) = rest.split_once(" Operand idx: ").ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad sensitive-opcode output: {:?}", text))
            })?;
            let operand_index = index.parse::<i32>().map_err(|_| {
                PatchSpecError::spec_malformed(format!("bad operand index: {:?}", text))
            })?;
            return Ok(OutputKind::SensitiveOp {
                opcode: opcode.to_string(),
                operand_index,
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_SENSITIVE_API) {
            let (api, index) = rest.split_once(" Arg idx: ").ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad sensitive-API output: {:?}", text))
            })?;
            let arg_index = index.parse::<u32>().map_err(|_| {
                PatchSpecError::spec_malformed(format!("bad arg index: {:?}", text))
            })?;
            return Ok(OutputKind::SensitiveApi {
                api: api.to_string(),
                arg_index,
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_CUSTOMIZED_API) {
            let (api, index) = rest.split_once(" Arg idx: ").ok_or_else(|| {
                PatchSpecError::spec_malformed(format!("bad customized-API output: {:?}", text))
            })?;
            let arg_index = index.parse::<u32>().map_err(|_| {
                PatchSpecError::spec_malformed(format!("bad arg index: {:?}", text))
            })?;
            return Ok(OutputKind::CustomizedApi {
                api: api.to_string(),
                arg_index,
            });
        }
        if let Some(rest) = text.strip_prefix(TAG_GLOBAL_VARIABLE) {
            return Ok(OutputKind::GlobalVarOut {
                global: rest.to_string(),
            });
        }
        Err(PatchSpecError::spec_malformed(format!(
            "unknown output tag: {:?}",
            text
        )))
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_spec_string())
    }
}

/// An input endpoint anchored into a concrete trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputNode {
    pub kind: InputKind,
    pub used_node: Option<SegNodeId>,
    pub used_site: Option<SegSiteId>,
}

impl InputNode {
    pub fn new(kind: InputKind) -> Self {
        Self {
            kind,
            used_node: None,
            used_site: None,
        }
    }

    pub fn at_node(kind: InputKind, node: SegNodeId) -> Self {
        Self {
            kind,
            used_node: Some(node),
            used_site: None,
        }
    }
}

/// An output endpoint anchored into a concrete trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub kind: OutputKind,
    /// Name of the function the output lives in
    pub node_func: String,
    pub used_node: Option<SegNodeId>,
    pub used_site: Option<SegSiteId>,
}

impl OutputNode {
    pub fn new(kind: OutputKind, node_func: impl Into<String>) -> Self {
        Self {
            kind,
            node_func: node_func.into(),
            used_node: None,
            used_site: None,
        }
    }
}

/// Data flow + control flow + flow order
#[derive(Debug, Clone)]
pub struct EnhancedTrace {
    pub trace: SegTrace,
    pub input: InputNode,
    pub output: OutputNode,
    pub cond: CondId,
    /// 1-based priority within the input group; 0 before ordering ran
    pub output_order: u32,
}

impl EnhancedTrace {
    pub fn new(trace: SegTrace, input: InputNode, output: OutputNode, cond: CondId) -> Self {
        Self {
            trace,
            input,
            output,
            cond,
            output_order: 0,
        }
    }

    /// Anchor equality of both endpoints (node + site identity).
    pub fn same_io_anchors(&self, other: &EnhancedTrace) -> bool {
        self.input.used_node == other.input.used_node
            && self.input.used_site == other.input.used_site
            && self.output.used_node == other.output.used_node
            && self.output.used_site == other.output.used_site
    }
}
