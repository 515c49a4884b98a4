//! Registry-intrinsic tools.
//!
//! These three are resolved by the registry itself rather than a handler
//! struct: `any_call` because it re-enters dispatch, the other two because
//! they introspect the registry. They still get declarations and
//! activation flags so the model and the panel see them like any tool.

use serde_json::{Value, json};

use crate::core::llm::ToolSpec;
use crate::core::store::activation::ToolFlag;

use super::category;

/// Escape hatch: call any registered tool by name, active or not.
pub const ANY_CALL: &str = "any_call";
/// Name and one-line description of every registered tool.
pub const GET_MY_TOOLS: &str = "get_my_tools";
/// Full declaration (including the argument schema) of one tool.
pub const GET_TOOL_DETAIL: &str = "get_tool_detail";

pub(crate) fn intrinsic_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: ANY_CALL.into(),
            description: "Call any tool by name, even one that is not currently offered. \
                          Use get_my_tools to discover names and get_tool_detail for the \
                          argument shape."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "toolName": { "type": "string", "description": "Name of the tool to run." },
                    "toolParams": {
                        "type": "object",
                        "description": "Arguments for that tool.",
                    },
                },
                "required": ["toolName"],
            }),
        },
        ToolSpec {
            name: GET_MY_TOOLS.into(),
            description: "List every available tool with a short description.".into(),
            parameters: empty_object(),
        },
        ToolSpec {
            name: GET_TOOL_DETAIL.into(),
            description: "Get the full declaration of one tool, including its argument schema."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "toolName": { "type": "string" },
                },
                "required": ["toolName"],
            }),
        },
    ]
}

pub(crate) fn intrinsic_flags() -> Vec<ToolFlag> {
    intrinsic_specs()
        .into_iter()
        .map(|spec| ToolFlag {
            name: spec.name,
            description: spec.description,
            category: category::ETC.to_string(),
            is_activated: false,
        })
        .collect()
}

pub(crate) fn empty_object() -> Value {
    json!({ "type": "object", "properties": {} })
}
