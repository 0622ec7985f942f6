//! Get File Content Tool
//!
//! Looks a file up by (part of) its name and returns its text.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use chat_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolResult, ToolSchema};

use super::{format_file, require_non_blank};
use crate::directory::{DocumentDirectory, FileText};

const NAME: &str = "GetFileContent";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    file_name: String,
}

/// Tool returning the first file whose name contains the requested text
pub struct GetFileContentTool {
    directory: Arc<dyn DocumentDirectory>,
}

impl GetFileContentTool {
    pub fn new(directory: Arc<dyn DocumentDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for GetFileContentTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Get the content of a file by its name or part of its name".into(),
            parameters: vec![ParameterSchema {
                name: "fileName".into(),
                param_type: "string".into(),
                description: "File name, or any part of it (case-sensitive)".into(),
                required: true,
                enum_values: None,
            }],
            category: Some("files".into()),
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let args: Args = call.parse_arguments()?;
        let needle = require_non_blank(NAME, "fileName", &args.file_name)?;

        let names = match self.directory.list().await {
            Ok(names) => names,
            Err(e) => return Ok(ToolResult::failure(NAME, e.to_string())),
        };

        let Some(name) = names.into_iter().find(|n| n.contains(needle)) else {
            tracing::debug!(needle, "No file name matched");
            return Ok(ToolResult::success(
                NAME,
                format!("No file with a name containing '{needle}' was found."),
            ));
        };

        tracing::debug!(file = %name, "Reading file by name");
        let result = match self.directory.read(&name).await {
            Ok(FileText::Text(content)) => ToolResult::success(NAME, format_file(&name, &content)),
            Ok(FileText::TooLarge { limit }) => ToolResult::failure(
                NAME,
                format!("File {name} is larger than the {limit} byte read limit"),
            ),
            Ok(FileText::Binary) => {
                ToolResult::failure(NAME, format!("File {name} is not a text file"))
            }
            Err(e) => ToolResult::failure(NAME, format!("Could not read {name}: {e}")),
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{FileToolsConfig, LocalDirectory};
    use chat_core::AgentError;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, GetFileContentTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quarterly_report.txt"), "Q3 revenue grew 12%").unwrap();
        std::fs::write(dir.path().join("summary.txt"), "All good").unwrap();
        let tool = GetFileContentTool::new(Arc::new(LocalDirectory::at(dir.path())));
        (dir, tool)
    }

    fn call(args: &str) -> ToolCall {
        ToolCall::new("call_1", NAME, args)
    }

    #[tokio::test]
    async fn test_partial_name_match() {
        let (_dir, tool) = fixture();

        let result = tool.execute(&call(r#"{"fileName":"report"}"#)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "File: quarterly_report.txt\n\nQ3 revenue grew 12%");
    }

    #[tokio::test]
    async fn test_match_is_case_sensitive() {
        let (_dir, tool) = fixture();

        let result = tool.execute(&call(r#"{"fileName":"REPORT"}"#)).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("No file"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found_text() {
        let (_dir, tool) = fixture();

        let result = tool.execute(&call(r#"{"fileName":"invoice"}"#)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "No file with a name containing 'invoice' was found.");
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let (_dir, tool) = fixture();

        let err = tool.execute(&call(r#"{"fileName":"  "}"#)).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolArguments(_)));
    }

    #[tokio::test]
    async fn test_oversized_file_is_reported() {
        let (dir, _) = fixture();
        let tool = GetFileContentTool::new(Arc::new(LocalDirectory::new(FileToolsConfig {
            root: dir.path().to_path_buf(),
            max_file_bytes: 4,
        })));

        let result = tool.execute(&call(r#"{"fileName":"summary"}"#)).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("4 byte"));
    }

    #[tokio::test]
    async fn test_missing_root_is_tool_failure() {
        let tool = GetFileContentTool::new(Arc::new(LocalDirectory::at("/no/such/files")));

        let result = tool.execute(&call(r#"{"fileName":"a"}"#)).await.unwrap();
        assert!(!result.success);
    }
}
