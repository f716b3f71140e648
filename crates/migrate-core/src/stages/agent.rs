//! Model-driven stage
//!
//! The model sees the stage instructions and the run transcript. It may
//! ask for work through fenced blocks:
//!
//! ````text
//! ```tool
//! {"tool": "table_schema", "params": {"table_name": "employees"}}
//! ```
//! ```sh
//! gcloud sql instances describe target-instance
//! ```
//! ````
//!
//! Only block kinds the stage's capabilities allow are acted on; anything
//! else stays plain text. Results go back to the model until it answers
//! without requests or the round budget runs out.

use crate::model::{ChatMessage, ChatRequest, LanguageModel};
use async_trait::async_trait;
use migrate_kernel::prelude::*;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

static FENCED_BLOCK: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"(?s)```([A-Za-z0-9_]+)[ \t]*\r?\n(.*?)```").expect("valid regex")
});

const CODE_LANGUAGES: [&str; 6] = ["sh", "bash", "shell", "python", "python3", "py"];

const TOOL_BRIEF: &str = "\n\nTo call a tool, reply with a fenced block tagged `tool` holding \
    {\"tool\": <name>, \"params\": {...}}. Available tools:\n";

const CODE_BRIEF: &str = "\n\nTo run a command, reply with a fenced `sh` or `python` block. \
    Its exit code and output are returned to you.";

/// A request found in a model answer
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    Tool(ToolCall),
    Code(CodeBlock),
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ToolRequest {
    tool: String,
    #[serde(default)]
    params: serde_json::Map<String, Value>,
}

fn param_value(value: Value) -> ParamValue {
    match value {
        Value::Bool(b) => ParamValue::Bool(b),
        Value::Number(n) => n
            .as_i64()
            .map(ParamValue::Int)
            .or_else(|| n.as_f64().map(ParamValue::Float))
            .unwrap_or_else(|| ParamValue::Text(n.to_string())),
        Value::String(s) => ParamValue::Text(s),
        other => ParamValue::Text(other.to_string()),
    }
}

/// Requests in an answer, in order of appearance
pub(crate) fn parse_actions(answer: &str, tools: bool, code: bool) -> Vec<Action> {
    FENCED_BLOCK
        .captures_iter(answer)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            if tag == "tool" && tools {
                Some(match serde_json::from_str::<ToolRequest>(body) {
                    Ok(req) => Action::Tool(
                        req.params
                            .into_iter()
                            .fold(ToolCall::new(req.tool), |call, (k, v)| {
                                call.with_param(k, param_value(v))
                            }),
                    ),
                    Err(e) => Action::Malformed(e.to_string()),
                })
            } else if code && CODE_LANGUAGES.contains(&tag) {
                Some(Action::Code(CodeBlock::new(tag, body.trim_end())))
            } else {
                None
            }
        })
        .collect()
}

fn tool_brief(tools: &[ToolDescription]) -> String {
    let mut brief = TOOL_BRIEF.to_string();
    for t in tools {
        brief.push_str(&format!("- {}({}): {}\n", t.name, t.parameters.join(", "), t.description));
    }
    brief
}

fn render_output(out: &ExecutionOutput) -> String {
    let code = out
        .exit_code
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    format!(
        "exit code: {code}\nstdout:\n{}\nstderr:\n{}",
        out.stdout.trim_end(),
        out.stderr.trim_end()
    )
}

/// Stage backed by a language model
pub struct AgentStage {
    name: String,
    instructions: String,
    capabilities: Vec<Capability>,
    model: Arc<dyn LanguageModel>,
    max_rounds: usize,
    temperature: Option<f32>,
}

impl AgentStage {
    /// Stage with no capabilities and a five-round budget
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            capabilities: Vec::new(),
            model,
            max_rounds: 5,
            temperature: None,
        }
    }

    /// Declare collaborators
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Model calls allowed per invocation (at least one)
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Instructions given to the model
    #[inline]
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

impl std::fmt::Debug for AgentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStage")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("model", &self.model.name())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

#[async_trait]
impl Stage for AgentStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn run(
        &self,
        state: &SharedState,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        let tools = ctx.has(Capability::ToolAccess);
        let code = ctx.has(Capability::CodeExecution);

        let mut system = self.instructions.clone();
        if tools {
            system.push_str(&tool_brief(&ctx.tools()?.describe()));
        }
        if code {
            system.push_str(CODE_BRIEF);
        }
        let mut request = ChatRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(state.transcript()),
        ])
        .with_temperature(self.temperature);

        let mut records = Vec::new();
        let mut code_runs = Vec::new();
        let mut round = 0;
        loop {
            round += 1;
            let answer = self
                .model
                .complete(&request)
                .await
                .map_err(|e| StageFailure::Model(e.to_string()))?;
            let actions = parse_actions(&answer, tools, code);
            tracing::debug!(stage = %self.name, round, actions = actions.len(), "model answered");

            if actions.is_empty() || round >= self.max_rounds {
                if !actions.is_empty() {
                    tracing::warn!(stage = %self.name, round, "round budget exhausted with pending requests");
                }
                return Ok(vec![Reply::text(answer)
                    .with_tool_records(records)
                    .with_code_records(code_runs)]);
            }

            let mut feedback = Vec::with_capacity(actions.len());
            for action in actions {
                match action {
                    Action::Tool(call) => {
                        let record = ctx.call_tool(call).await?;
                        let rendered = serde_json::to_string(&record.result)
                            .unwrap_or_else(|e| format!("unrenderable result: {e}"));
                        feedback.push(format!("Result of {}: {rendered}", record.call.tool));
                        records.push(record);
                    }
                    Action::Code(block) => {
                        let output = ctx.run_code(&block).await?.map_err(|e| e.to_string());
                        feedback.push(match &output {
                            Ok(out) => render_output(out),
                            Err(e) => format!("execution error: {e}"),
                        });
                        code_runs.push(CodeRecord { block, output });
                    }
                    Action::Malformed(reason) => {
                        feedback.push(format!("malformed tool request: {reason}"));
                    }
                }
            }
            request.push(ChatMessage::assistant(answer));
            request.push(ChatMessage::user(feedback.join("\n\n")));
        }
    }
}
