//! Adapter for backends that only produce text.
//!
//! Tool schemas are described in the system message and the model is asked
//! to write calls in an agreed format. How calls are written and found is a
//! [`ToolCallGrammar`]; [`TaggedJsonGrammar`] is the bundled one.

use std::sync::Arc;

use serde_json::{Map, Value};
use toolweave_core::message::{Message, Role};
use toolweave_core::provider::ProviderRequest;
use toolweave_core::schema::ToolDefinition;
use toolweave_core::tool::{ToolCallRequest, ToolExecutionResult};
use tracing::debug;

use super::{AdapterError, ToolCallAdapter};

/// A call found in model text, before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Value,
    /// Set when the call was recognised but its arguments were unusable.
    pub malformed: Option<String>,
}

/// How tool calls are written in plain text.
///
/// `parse` must never fail: text it does not recognise simply contains no calls.
pub trait ToolCallGrammar: Send + Sync {
    /// Instructions appended to the system message.
    fn render_instructions(&self, tools: &[ToolDefinition]) -> String;

    fn parse(&self, text: &str) -> Vec<ParsedCall>;

    /// How one result is written back to the model.
    fn render_result(&self, call: &ToolCallRequest, result: &ToolExecutionResult) -> String;

    /// The text that opens a call.
    fn marker(&self) -> &str;
}

/// `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`
///
/// Parsing is lenient: `tool`/`tool_name` are accepted for the name,
/// `args`/`parameters`/`input` for the arguments, arguments may be a JSON
/// string, the JSON may sit in a code fence, and a final block may be left
/// unterminated.
#[derive(Debug, Clone)]
pub struct TaggedJsonGrammar {
    open: String,
    close: String,
}

impl TaggedJsonGrammar {
    pub fn new() -> Self {
        Self::with_tags("<tool_call>", "</tool_call>")
    }

    pub fn with_tags(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// The bodies between open and close tags.
    fn blocks<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut blocks = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find(&self.open) {
            let after = &rest[start + self.open.len()..];
            match after.find(&self.close) {
                Some(end) => {
                    blocks.push(&after[..end]);
                    rest = &after[end + self.close.len()..];
                }
                None => {
                    blocks.push(after);
                    break;
                }
            }
        }
        blocks
    }

    fn parse_block(block: &str) -> Option<ParsedCall> {
        let body = strip_fence(block.trim());
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable tool call block");
                return None;
            }
        };
        let object = value.as_object()?;

        let name = ["name", "tool", "tool_name"]
            .iter()
            .find_map(|k| object.get(*k).and_then(Value::as_str))?
            .trim()
            .to_string();
        if name.is_empty() {
            return None;
        }

        let raw = ["arguments", "args", "parameters", "input"]
            .iter()
            .find_map(|k| object.get(*k))
            .cloned()
            .unwrap_or(Value::Null);

        let (arguments, malformed) = match raw {
            Value::Object(_) => (raw, None),
            Value::Null => (Value::Object(Map::new()), None),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(v @ Value::Object(_)) => (v, None),
                _ => (Value::Null, Some(format!("arguments string is not a JSON object: {s}"))),
            },
            other => (Value::Null, Some(format!("arguments must be an object, got {other}"))),
        };

        Some(ParsedCall {
            name,
            arguments,
            malformed,
        })
    }
}

impl Default for TaggedJsonGrammar {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_fence(body: &str) -> &str {
    let Some(inner) = body.strip_prefix("```") else {
        return body;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

impl ToolCallGrammar for TaggedJsonGrammar {
    fn render_instructions(&self, tools: &[ToolDefinition]) -> String {
        let mut out = String::from("## Tools\n\n");
        out.push_str("You can call the tools below. To call one, write a block exactly like this:\n");
        out.push_str(&format!(
            "{}{{\"name\": \"tool_name\", \"arguments\": {{\"param\": \"value\"}}}}{}\n",
            self.open, self.close
        ));
        out.push_str(
            "You may write several blocks in one reply. Stop after the blocks and wait for the results. \
             When no tool is needed, answer normally without any block.\n\n",
        );
        for tool in tools {
            out.push_str(&tool.render_text());
            out.push('\n');
        }
        out
    }

    fn parse(&self, text: &str) -> Vec<ParsedCall> {
        self.blocks(text).into_iter().filter_map(Self::parse_block).collect()
    }

    fn render_result(&self, call: &ToolCallRequest, result: &ToolExecutionResult) -> String {
        format!(
            "<tool_result name=\"{}\" id=\"{}\">\n{}\n</tool_result>",
            call.name,
            call.id,
            result.content()
        )
    }

    fn marker(&self) -> &str {
        &self.open
    }
}

/// Embeds schemas in the system message and finds calls in the reply text.
#[derive(Clone)]
pub struct TextParsedAdapter {
    grammar: Arc<dyn ToolCallGrammar>,
}

impl TextParsedAdapter {
    pub fn new() -> Self {
        Self::with_grammar(Arc::new(TaggedJsonGrammar::new()))
    }

    pub fn with_grammar(grammar: Arc<dyn ToolCallGrammar>) -> Self {
        Self { grammar }
    }
}

impl Default for TextParsedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallAdapter for TextParsedAdapter {
    fn name(&self) -> &str {
        "text"
    }

    fn prepare(&self, request: &mut ProviderRequest, tools: &[ToolDefinition]) {
        request.tools.clear();
        if tools.is_empty() {
            return;
        }
        let instructions = self.grammar.render_instructions(tools);
        match request.messages.first_mut() {
            Some(system) if system.role == Role::System => {
                system.content = format!("{}\n\n{instructions}", system.content);
            }
            _ => request.messages.insert(0, Message::system(instructions)),
        }
    }

    fn extract(&self, message: &Message) -> Result<Vec<ToolCallRequest>, AdapterError> {
        Ok(self
            .grammar
            .parse(&message.content)
            .into_iter()
            .enumerate()
            .map(|(i, call)| {
                let id = format!("call_{}", i + 1);
                match call.malformed {
                    Some(reason) => ToolCallRequest::malformed(id, call.name, reason),
                    None => ToolCallRequest::new(id, call.name, call.arguments),
                }
            })
            .collect())
    }

    fn assistant_message(&self, response: &Message, _calls: &[ToolCallRequest]) -> Message {
        Message::assistant(response.content.clone())
    }

    fn result_messages(&self, calls: &[ToolCallRequest], results: &[ToolExecutionResult]) -> Vec<Message> {
        calls
            .iter()
            .zip(results)
            .map(|(call, result)| Message::user(self.grammar.render_result(call, result)))
            .collect()
    }

    fn stream_marker(&self) -> Option<&str> {
        Some(self.grammar.marker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use toolweave_core::schema::{ParamType, ParametersSchema};

    fn parse(text: &str) -> Vec<ParsedCall> {
        TaggedJsonGrammar::new().parse(text)
    }

    #[test]
    fn finds_a_single_call() {
        let calls = parse(r#"Sure. <tool_call>{"name": "echo", "arguments": {"text": "hi"}}</tool_call>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, json!({"text": "hi"}));
    }

    #[test]
    fn finds_several_calls_in_order() {
        let text = r#"<tool_call>{"name":"a","arguments":{}}</tool_call>
<tool_call>{"name":"b","arguments":{"n":1}}</tool_call>"#;
        let names: Vec<String> = parse(text).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn accepts_alternate_spellings_and_fences() {
        let calls = parse("<tool_call>\n```json\n{\"tool\": \"lookup\", \"args\": \"{\\\"q\\\": \\\"rust\\\"}\"}\n```\n</tool_call>");
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn unterminated_final_block_is_accepted() {
        let calls = parse(r#"<tool_call>{"name": "now"}"#);
        assert_eq!(calls[0].name, "now");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn unrecognised_text_is_no_call() {
        assert!(parse("The answer is 42.").is_empty());
        assert!(parse("<tool_call>not json</tool_call>").is_empty());
        assert!(parse(r#"<tool_call>{"arguments": {}}</tool_call>"#).is_empty());
        assert!(parse(r#"<tool_call>["echo"]</tool_call>"#).is_empty());
    }

    #[test]
    fn unusable_arguments_are_marked_malformed() {
        let calls = parse(r#"<tool_call>{"name": "echo", "arguments": 7}</tool_call>"#);
        assert!(calls[0].malformed.is_some());

        let adapter = TextParsedAdapter::new();
        let requests = adapter
            .extract(&Message::assistant(r#"<tool_call>{"name": "echo", "arguments": "nope"}</tool_call>"#))
            .unwrap();
        assert_eq!(requests[0].id, "call_1");
        assert!(requests[0].malformed.is_some());
    }

    #[test]
    fn prepare_embeds_schemas_in_system_message() {
        let adapter = TextParsedAdapter::new();
        let tools = vec![ToolDefinition {
            name: "echo".into(),
            description: "Echo text back".into(),
            parameters: ParametersSchema::new().required("text", ParamType::string(), "Text to echo"),
        }];

        let mut with_system = ProviderRequest::new("m", vec![Message::system("Be brief."), Message::user("hi")]);
        adapter.prepare(&mut with_system, &tools);
        assert_eq!(with_system.messages.len(), 2);
        assert!(with_system.messages[0].content.starts_with("Be brief."));
        assert!(with_system.messages[0].content.contains("### echo"));
        assert!(with_system.messages[0].content.contains("<tool_call>"));
        assert!(with_system.tools.is_empty());

        let mut without_system = ProviderRequest::new("m", vec![Message::user("hi")]);
        adapter.prepare(&mut without_system, &tools);
        assert_eq!(without_system.messages[0].role, Role::System);
        assert_eq!(without_system.messages.len(), 2);
    }

    #[test]
    fn results_go_back_as_user_messages_in_order() {
        let adapter = TextParsedAdapter::new();
        let calls = vec![
            ToolCallRequest::new("call_1", "a", json!({})),
            ToolCallRequest::new("call_2", "b", json!({})),
        ];
        let results = vec![
            ToolExecutionResult::success("call_1", "a", json!("first"), Duration::ZERO),
            ToolExecutionResult::success("call_2", "b", json!("second"), Duration::ZERO),
        ];
        let messages = adapter.result_messages(&calls, &results);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.contains(r#"name="a" id="call_1""#));
        assert!(messages[0].content.contains("first"));
        assert!(messages[1].content.contains("second"));
    }
}
