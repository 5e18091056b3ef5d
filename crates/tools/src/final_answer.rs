//! `final_answer`: the terminal tool.
//!
//! Executing it only validates the shape of the answer; the loop returns
//! its arguments verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use talk2sql_core::error::ToolError;
use talk2sql_core::tool::{ExecutionContext, Observation, Tool};

/// The payload the model hands back when it is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        "final_answer"
    }

    fn description(&self) -> &str {
        "Use this tool to provide a final answer to the user. The answer should be \
         in natural language. Provide a list of the tools used to get the answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The answer to the user's question, in natural language"
                },
                "tools_used": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Names of the tools used to reach the answer"
                }
            },
            "required": ["answer", "tools_used"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<Observation, ToolError> {
        let answer: FinalAnswer = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::InvalidArguments(format!("final_answer: {e}")))?;

        Ok(Observation::success(answer.answer).with_data(arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_answer_payload() {
        let args = serde_json::json!({
            "answer": "Found 7 rows",
            "tools_used": ["execute_query"]
        });
        let obs = FinalAnswerTool
            .execute(args.clone(), &mut ExecutionContext::new())
            .await
            .unwrap();

        assert!(obs.success);
        assert_eq!(obs.output, "Found 7 rows");
        assert_eq!(obs.data, Some(args));
    }

    #[tokio::test]
    async fn rejects_missing_answer() {
        let err = FinalAnswerTool
            .execute(
                serde_json::json!({"tools_used": []}),
                &mut ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
