//! Bounded tool-calling agent.
//!
//! ```text
//! system + question
//!      │
//!      ▼
//! ┌──────────┐  tool_calls   ┌───────────────┐
//! │  model   │──────────────▶│ run each call │── results ─┐
//! └──────────┘               └───────────────┘            │
//!      ▲  │ text                                          │
//!      │  └──────▶ answer                                 │
//!      └──────────────────────────────────────────────────┘
//! ```
//!
//! A step is one model reply that requested tools. After
//! `max_iterations` steps the model is asked once more, with tools
//! withdrawn, for the best answer it can give from what it has gathered.
//!
//! Tool problems (unknown name, malformed arguments, execution failure)
//! are reported back to the model as text and never end the run; only a
//! failing model call does.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::error::AssistantError;
use crate::llm::{ChatMessage, ChatModel, ToolCall};
use crate::tools::{ToolContext, ToolRegistry};

pub const SYSTEM_PROMPT: &str = "You are an expert Smart Building Operations Assistant. \
     Use the provided tools to answer the user's questions. \
     Be concise and cite information sources when possible.";

const FINAL_ANSWER_PROMPT: &str = "You have used the maximum number of tool steps. \
     Using only the tool results above, give your best final answer now.";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub answer: String,
    /// Model replies that requested tools.
    pub steps: usize,
}

pub struct Agent {
    llm: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    max_iterations: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
        max_iterations: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            ctx,
            max_iterations: max_iterations.max(1),
        }
    }

    pub async fn run(&self, question: &str) -> Result<AgentOutcome> {
        let specs = self.tools.specs();
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(question)];
        let mut steps = 0usize;

        while steps < self.max_iterations {
            let reply = self.llm.complete(&messages, &specs).await?;
            if reply.tool_calls.is_empty() {
                return Ok(AgentOutcome {
                    answer: reply.content.unwrap_or_default().trim().to_string(),
                    steps,
                });
            }

            steps += 1;
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                let result = self.call_tool(call).await;
                messages.push(ChatMessage::tool_result(&call.id, result));
            }
        }

        tracing::info!(steps, "agent step limit reached, asking for a final answer");
        messages.push(ChatMessage::user(FINAL_ANSWER_PROMPT));
        let reply = self.llm.complete(&messages, &[]).await?;
        let answer = reply.content.unwrap_or_default().trim().to_string();

        Ok(AgentOutcome {
            answer: if answer.is_empty() {
                format!("No final answer after {} tool steps.", steps)
            } else {
                answer
            },
            steps,
        })
    }

    /// Run one call and render its result as text for the model.
    async fn call_tool(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        let Some(tool) = self.tools.find(name) else {
            let available: Vec<&str> = self.tools.tools().iter().map(|t| t.name()).collect();
            return format!(
                "Error: unknown tool '{}'. Available tools: {}",
                name,
                available.join(", ")
            );
        };

        let raw = call.function.arguments.trim();
        let params: Value = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw) {
                Ok(v) => v,
                Err(e) => return format!("Error: invalid arguments for '{}': {}", name, e),
            }
        };

        tracing::debug!(tool = name, %params, "tool call");
        match tool.execute(params, &self.ctx).await {
            Ok(Value::String(s)) => s,
            Ok(v) => v.to_string(),
            Err(e) => {
                let err = AssistantError::ToolExecution {
                    tool: name.to_string(),
                    message: format!("{:#}", e),
                };
                tracing::warn!(error = %err, "tool failed");
                format!("Error: {}", err)
            }
        }
    }
}
