//! Get File Content By Part Of It Tool
//!
//! Finds the first file whose text contains a phrase.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use chat_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolResult, ToolSchema};

use super::{format_file, require_non_blank};
use crate::directory::{DocumentDirectory, FileText};

const NAME: &str = "GetFileContentByPartOfIt";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    part_of_content: String,
}

/// Tool returning the first file, in name order, containing the requested text
pub struct GetFileContentByPartOfItTool {
    directory: Arc<dyn DocumentDirectory>,
}

impl GetFileContentByPartOfItTool {
    pub fn new(directory: Arc<dyn DocumentDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for GetFileContentByPartOfItTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Get the content of a file that contains the given text".into(),
            parameters: vec![ParameterSchema {
                name: "partOfContent".into(),
                param_type: "string".into(),
                description: "Text the file must contain (case-sensitive)".into(),
                required: true,
                enum_values: None,
            }],
            category: Some("files".into()),
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let args: Args = call.parse_arguments()?;
        let needle = require_non_blank(NAME, "partOfContent", &args.part_of_content)?;

        let names = match self.directory.list().await {
            Ok(names) => names,
            Err(e) => return Ok(ToolResult::failure(NAME, e.to_string())),
        };

        for name in names {
            match self.directory.read(&name).await {
                Ok(FileText::Text(content)) if content.contains(needle) => {
                    tracing::debug!(file = %name, "File content matched");
                    return Ok(ToolResult::success(NAME, format_file(&name, &content)));
                }
                Ok(FileText::Text(_)) => {}
                Ok(skipped) => tracing::debug!(file = %name, ?skipped, "Skipping unreadable file"),
                Err(e) => tracing::warn!(file = %name, error = %e, "Failed to read file"),
            }
        }

        Ok(ToolResult::success(
            NAME,
            format!("No file containing '{needle}' was found."),
        ))
    }
}
