//! The code-executor contract and its state-backed context.
//!
//! Executors run fenced code blocks the model emits and hand back stdout,
//! stderr, and output files. The core only extracts blocks, tracks input
//! files and per-invocation error counts in session state, and formats
//! results; running code is the executor's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::JsonMap;
use crate::context::InvocationContext;
use crate::error::Result;

/// Opening delimiter of a formatted execution-result block.
pub const EXECUTION_RESULT_OPEN: &str = "```tool_output";

/// State key holding the registered input files.
const INPUT_FILES_KEY: &str = "_code_executor_input_files";
/// State key holding per-invocation error counts.
const ERROR_COUNTS_KEY: &str = "_code_execution_error_counts";

/// A file made available to (or produced by) executed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionFile {
    /// File name as visible to the code.
    pub name: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Raw content, base64-encoded on the wire.
    #[serde(with = "crate::content::base64_bytes")]
    pub content: Vec<u8>,
}

/// One execution request.
#[derive(Debug, Clone, Default)]
pub struct CodeExecutionInput {
    /// The code to run.
    pub code: String,
    /// Files the code may read.
    pub input_files: Vec<CodeExecutionFile>,
    /// Executor-session id for stateful executors.
    pub execution_id: Option<String>,
}

/// One execution outcome.
#[derive(Debug, Clone, Default)]
pub struct CodeExecutionResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Files the code produced.
    pub output_files: Vec<CodeExecutionFile>,
}

/// The execution contract consumed by the flow.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Whether inline data files should be extracted from the request and
    /// pre-loaded into the executor.
    fn optimize_data_file(&self) -> bool {
        false
    }

    /// Whether executions within one session share state.
    fn is_stateful(&self) -> bool {
        false
    }

    /// How many failed executions to tolerate per invocation.
    fn error_retry_attempts(&self) -> usize {
        2
    }

    /// Delimiter pairs recognized as executable code blocks.
    fn code_block_delimiters(&self) -> Vec<(String, String)> {
        vec![
            ("```tool_code\n".to_string(), "\n```".to_string()),
            ("```python\n".to_string(), "\n```".to_string()),
        ]
    }

    /// Delimiters wrapping a formatted execution result.
    fn execution_result_delimiters(&self) -> (String, String) {
        (format!("{EXECUTION_RESULT_OPEN}\n"), "\n```".to_string())
    }

    /// Run one piece of code.
    async fn execute_code(
        &self,
        ctx: &InvocationContext,
        input: CodeExecutionInput,
    ) -> Result<CodeExecutionResult>;
}

/// Code-execution bookkeeping layered over session state: registered
/// input files and per-invocation error counts. Writes accumulate in a
/// delta for the caller to emit as a state-carrying event.
#[derive(Debug, Clone)]
pub struct CodeExecutorContext {
    state: JsonMap,
    delta: JsonMap,
}

impl CodeExecutorContext {
    /// Wrap a state snapshot.
    #[must_use]
    pub fn new(state: JsonMap) -> Self {
        Self {
            state,
            delta: JsonMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.delta.get(key).or_else(|| self.state.get(key))
    }

    /// The input files registered so far.
    #[must_use]
    pub fn input_files(&self) -> Vec<CodeExecutionFile> {
        self.get(INPUT_FILES_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Register additional input files.
    pub fn add_input_files(&mut self, files: Vec<CodeExecutionFile>) -> Result<()> {
        let mut all = self.input_files();
        all.extend(files);
        self.delta
            .insert(INPUT_FILES_KEY.to_string(), serde_json::to_value(all)?);
        Ok(())
    }

    /// The error count recorded for an invocation.
    #[must_use]
    pub fn error_count(&self, invocation_id: &str) -> usize {
        self.get(ERROR_COUNTS_KEY)
            .and_then(Value::as_object)
            .and_then(|m| m.get(invocation_id))
            .and_then(Value::as_u64)
            .map_or(0, |n| n as usize)
    }

    /// Record one more failed execution for an invocation.
    pub fn increment_error_count(&mut self, invocation_id: &str) {
        let mut counts = self
            .get(ERROR_COUNTS_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let next = counts
            .get(invocation_id)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        counts.insert(invocation_id.to_string(), Value::from(next));
        self.delta
            .insert(ERROR_COUNTS_KEY.to_string(), Value::Object(counts));
    }

    /// Clear the error count for an invocation.
    pub fn reset_error_count(&mut self, invocation_id: &str) {
        let Some(mut counts) = self
            .get(ERROR_COUNTS_KEY)
            .and_then(Value::as_object)
            .cloned()
        else {
            return;
        };
        if counts.remove(invocation_id).is_some() {
            self.delta
                .insert(ERROR_COUNTS_KEY.to_string(), Value::Object(counts));
        }
    }

    /// The accumulated state writes.
    #[must_use]
    pub fn state_delta(&self) -> JsonMap {
        self.delta.clone()
    }
}

/// A fenced code block found in model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Text preceding the block.
    pub leading: String,
    /// The code inside the fences.
    pub code: String,
    /// The opening delimiter that matched.
    pub open: String,
    /// The closing delimiter that matched.
    pub close: String,
}

impl CodeBlock {
    /// The text truncated at the end of the block: everything up to and
    /// including the closing fence.
    #[must_use]
    pub fn truncated(&self) -> String {
        format!("{}{}{}{}", self.leading, self.open, self.code, self.close)
    }
}

/// Find the first fenced code block in `text` for any of the delimiter
/// pairs.
#[must_use]
pub fn extract_code_block(text: &str, delimiters: &[(String, String)]) -> Option<CodeBlock> {
    let mut best: Option<(usize, &(String, String))> = None;
    for pair in delimiters {
        if let Some(idx) = text.find(pair.0.as_str())
            && best.is_none_or(|(b, _)| idx < b)
        {
            best = Some((idx, pair));
        }
    }
    let (start, (open, close)) = best?;
    let code_start = start + open.len();
    let code_end = text[code_start..].find(close.as_str())? + code_start;
    Some(CodeBlock {
        leading: text[..start].to_string(),
        code: text[code_start..code_end].to_string(),
        open: open.clone(),
        close: close.clone(),
    })
}

/// Format an execution result for the model.
#[must_use]
pub fn format_execution_result(
    result: &CodeExecutionResult,
    delimiters: &(String, String),
) -> String {
    let body = if !result.stderr.is_empty() {
        format!("stderr:\n{}", result.stderr)
    } else if result.stdout.is_empty() {
        "(no output)".to_string()
    } else {
        result.stdout.clone()
    };
    format!("{}{}{}", delimiters.0, body, delimiters.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimiters() -> Vec<(String, String)> {
        vec![("```python\n".to_string(), "\n```".to_string())]
    }

    #[test]
    fn test_extract_code_block() {
        let text = "Let me compute.\n```python\nprint(1 + 1)\n```\nand more";
        let block = extract_code_block(text, &delimiters()).expect("block");
        assert_eq!(block.leading, "Let me compute.\n");
        assert_eq!(block.code, "print(1 + 1)");
        assert_eq!(
            block.truncated(),
            "Let me compute.\n```python\nprint(1 + 1)\n```"
        );
    }

    #[test]
    fn test_no_block_is_none() {
        assert!(extract_code_block("plain text", &delimiters()).is_none());
    }

    #[test]
    fn test_error_count_round_trip() {
        let mut ctx = CodeExecutorContext::new(JsonMap::new());
        assert_eq!(ctx.error_count("inv-1"), 0);
        ctx.increment_error_count("inv-1");
        ctx.increment_error_count("inv-1");
        assert_eq!(ctx.error_count("inv-1"), 2);
        ctx.reset_error_count("inv-1");
        assert_eq!(ctx.error_count("inv-1"), 0);
        assert!(ctx.state_delta().contains_key("_code_execution_error_counts"));
    }

    #[test]
    fn test_input_files_accumulate() {
        let mut ctx = CodeExecutorContext::new(JsonMap::new());
        ctx.add_input_files(vec![CodeExecutionFile {
            name: "data.csv".to_string(),
            mime_type: "text/csv".to_string(),
            content: b"a,b\n".to_vec(),
        }])
        .expect("add");
        let files = ctx.input_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "data.csv");
    }
}
