//! Streaming translation: upstream bytes in, A-shaped SSE frames out.
//!
//! One translator instance lives per connection; the only state carried
//! across reads is a partial SSE frame, the thinking filter, and the
//! per-choice bookkeeping needed to keep the frame order
//! role -> content -> tool_calls -> finish_reason.

use std::collections::HashMap;

use bytes::Bytes;
use tariff_protocol::Dialect;
use tariff_protocol::anthropic::{
    ContentBlock, ContentDelta, StreamEvent as BEvent, map_stop_reason,
};
use tariff_protocol::gemini::{GenerateContentResponse, map_finish_reason};
use tariff_protocol::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ErrorBody, ToolCallDelta, ToolCallFunctionDelta,
    Usage,
};
use tariff_protocol::sse::{SseEvent, SseParser, ShapeDetector, StreamShape, encode_data_frame};

use super::thinking::ThinkingStreamFilter;

/// Vendor comment/keepalive frames that must not reach a strict client.
const VENDOR_KEEPALIVES: &[&str] = &[": PROCESSING", ": keep-alive", ": heartbeat", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    Tool,
}

pub struct StreamTranslator {
    source: Dialect,
    model_id: String,
    chunk_id: String,
    created: i64,
    parser: SseParser,
    shape: ShapeDetector,
    json_buffer: String,
    filter: ThinkingStreamFilter,
    sent_role: bool,
    sent_finish: bool,
    finish_reason: Option<String>,
    finished: bool,
    usage: Option<Usage>,
    prompt_tokens: Option<u64>,
    blocks: HashMap<u32, BlockKind>,
    tool_index: u32,
}

impl StreamTranslator {
    pub fn new(source: Dialect, model_id: &str, chunk_id: &str, created: i64) -> Self {
        Self {
            source,
            model_id: model_id.to_string(),
            chunk_id: chunk_id.to_string(),
            created,
            parser: SseParser::new(),
            shape: ShapeDetector::default(),
            json_buffer: String::new(),
            filter: ThinkingStreamFilter::new(),
            sent_role: false,
            sent_finish: false,
            finish_reason: None,
            finished: false,
            usage: None,
            prompt_tokens: None,
            blocks: HashMap::new(),
            tool_index: 0,
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Feed upstream bytes; returns zero or more client-ready frames in
    /// upstream order.
    pub fn push(&mut self, chunk: &Bytes) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        let shape = self.shape.push(chunk);
        if self.source == Dialect::GenerateContent && shape == StreamShape::Json {
            self.push_json_lines(chunk, &mut out);
            return out;
        }

        for event in self.parser.push_bytes(chunk) {
            self.consume_event(&event, &mut out);
        }
        out
    }

    /// End of upstream: drain buffers and close the stream in order. The
    /// returned frames end with `data: [DONE]`.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        for event in self.parser.finish() {
            self.consume_event(&event, &mut out);
        }
        let tail = self.filter.finish();
        if !tail.is_empty() {
            self.emit_content(&tail, &mut out);
        }
        self.emit_finish(&mut out);
        out.push(tariff_protocol::sse::done_frame());
        self.finished = true;
        out
    }

    fn consume_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>) {
        if event.is_comment() {
            return;
        }
        let data = event.data.trim();
        if data.is_empty() || VENDOR_KEEPALIVES.contains(&data) {
            return;
        }
        if event.is_done() {
            return;
        }
        match self.source {
            Dialect::OpenAiChat => self.consume_openai(data, out),
            Dialect::Messages => self.consume_messages(data, out),
            Dialect::GenerateContent => self.consume_generate(data, out),
        }
    }

    /// A -> A: rewrite the model id, run content through the thinking
    /// filter, drop frames that end up empty.
    fn consume_openai(&mut self, data: &str, out: &mut Vec<Bytes>) {
        // Some aggregators forward raw comment payloads inside data
        // frames; they are not valid chunks and are dropped.
        let Ok(mut chunk) = serde_json::from_str::<ChatCompletionChunk>(data) else {
            return;
        };
        chunk.model = self.model_id.clone();
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let mut keep = chunk.usage.is_some();
        for choice in &mut chunk.choices {
            if choice.delta.role.is_some() {
                self.sent_role = true;
                keep = true;
            }
            if let Some(content) = choice.delta.content.take() {
                let filtered = self.filter.push(&content);
                if !filtered.is_empty() {
                    choice.delta.content = Some(filtered);
                    keep = true;
                }
            }
            if choice.delta.tool_calls.is_some() {
                keep = true;
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
                self.sent_finish = true;
                keep = true;
            }
        }
        if keep && let Ok(data) = serde_json::to_string(&chunk) {
            out.push(encode_data_frame(&data));
        }
    }

    fn consume_messages(&mut self, data: &str, out: &mut Vec<Bytes>) {
        let Ok(event) = serde_json::from_str::<BEvent>(data) else {
            return;
        };
        match event {
            BEvent::MessageStart { message } => {
                self.prompt_tokens = Some(message.usage.input_tokens);
                self.emit_role(out);
            }
            BEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => {
                    self.blocks.insert(index, BlockKind::Text);
                    if !text.is_empty() {
                        let filtered = self.filter.push(&text);
                        if !filtered.is_empty() {
                            self.emit_content(&filtered, out);
                        }
                    }
                }
                ContentBlock::Thinking { .. } => {
                    self.blocks.insert(index, BlockKind::Thinking);
                }
                ContentBlock::ToolUse { id, name, .. } => {
                    self.blocks.insert(index, BlockKind::Tool);
                    self.emit_role(out);
                    let delta = ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![ToolCallDelta {
                            index: self.tool_index,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: Some(ToolCallFunctionDelta {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                    };
                    self.emit_delta(delta, out);
                }
            },
            BEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    if self.blocks.get(&index) == Some(&BlockKind::Thinking) {
                        return;
                    }
                    let filtered = self.filter.push(&text);
                    if !filtered.is_empty() {
                        self.emit_content(&filtered, out);
                    }
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    let delta = ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![ToolCallDelta {
                            index: self.tool_index,
                            id: None,
                            kind: None,
                            function: Some(ToolCallFunctionDelta {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                    };
                    self.emit_delta(delta, out);
                }
                ContentDelta::ThinkingDelta { .. } => {}
            },
            BEvent::ContentBlockStop { index } => {
                if self.blocks.remove(&index) == Some(BlockKind::Tool) {
                    self.tool_index += 1;
                }
            }
            BEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.finish_reason = Some(map_stop_reason(reason));
                }
                if let Some(delta_usage) = usage {
                    self.usage = Some(Usage::new(
                        self.prompt_tokens.unwrap_or(0),
                        delta_usage.output_tokens,
                    ));
                }
            }
            BEvent::MessageStop | BEvent::Ping => {}
            BEvent::Error { error } => {
                let message = error
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("upstream stream error");
                let body = ErrorBody::new("upstream_error", message);
                if let Ok(data) = serde_json::to_string(&body) {
                    out.push(encode_data_frame(&data));
                }
            }
        }
    }

    fn consume_generate(&mut self, data: &str, out: &mut Vec<Bytes>) {
        let Ok(response) = serde_json::from_str::<GenerateContentResponse>(data) else {
            return;
        };
        self.consume_generate_response(response, out);
    }

    fn consume_generate_response(
        &mut self,
        response: GenerateContentResponse,
        out: &mut Vec<Bytes>,
    ) {
        if let Some(meta) = response.usage_metadata {
            self.usage = Some(Usage::new(
                meta.prompt_token_count,
                meta.candidates_token_count,
            ));
        }
        let Some(candidate) = response.candidates.into_iter().next() else {
            return;
        };
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text {
                    let filtered = self.filter.push(&text);
                    if !filtered.is_empty() {
                        self.emit_content(&filtered, out);
                    }
                }
                if let Some(call) = part.function_call {
                    self.emit_role(out);
                    let arguments =
                        serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
                    let delta = ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![ToolCallDelta {
                            index: self.tool_index,
                            id: Some(format!("call_{}", self.tool_index)),
                            kind: Some("function".to_string()),
                            function: Some(ToolCallFunctionDelta {
                                name: Some(call.name),
                                arguments: Some(arguments),
                            }),
                        }]),
                    };
                    self.emit_delta(delta, out);
                    self.tool_index += 1;
                }
            }
        }
        if let Some(reason) = candidate.finish_reason.as_deref() {
            self.finish_reason = Some(map_finish_reason(reason));
        }
    }

    /// The `alt=sse` stream is SSE, but a bare generate-content stream is
    /// newline-delimited JSON (inside a JSON array). Handle both.
    fn push_json_lines(&mut self, chunk: &Bytes, out: &mut Vec<Bytes>) {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return;
        };
        self.json_buffer.push_str(text);
        while let Some(pos) = self.json_buffer.find('\n') {
            let line = self.json_buffer[..pos].to_string();
            self.json_buffer.drain(..=pos);
            let line = line
                .trim()
                .trim_start_matches(['[', ','])
                .trim_end_matches([']', ','])
                .trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(response) = serde_json::from_str::<GenerateContentResponse>(line) {
                self.consume_generate_response(response, out);
            }
        }
    }

    fn emit_role(&mut self, out: &mut Vec<Bytes>) {
        if self.sent_role {
            return;
        }
        self.sent_role = true;
        let delta = ChunkDelta {
            role: Some("assistant".to_string()),
            content: None,
            tool_calls: None,
        };
        // Bypass emit_delta's role guard: this is the role frame itself.
        let chunk = ChatCompletionChunk::new(
            &self.chunk_id,
            self.created,
            &self.model_id,
            ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            },
        );
        if let Ok(data) = serde_json::to_string(&chunk) {
            out.push(encode_data_frame(&data));
        }
    }

    fn emit_content(&mut self, text: &str, out: &mut Vec<Bytes>) {
        self.emit_role(out);
        let delta = ChunkDelta {
            role: None,
            content: Some(text.to_string()),
            tool_calls: None,
        };
        self.emit_delta(delta, out);
    }

    fn emit_finish(&mut self, out: &mut Vec<Bytes>) {
        if self.sent_finish {
            return;
        }
        self.sent_finish = true;
        self.emit_role(out);
        let reason = self
            .finish_reason
            .clone()
            .unwrap_or_else(|| "stop".to_string());
        let mut chunk = ChatCompletionChunk::new(
            &self.chunk_id,
            self.created,
            &self.model_id,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some(reason),
            },
        );
        chunk.usage = self.usage;
        if let Ok(data) = serde_json::to_string(&chunk) {
            out.push(encode_data_frame(&data));
        }
    }

    fn emit_delta(&mut self, delta: ChunkDelta, out: &mut Vec<Bytes>) {
        self.emit_role(out);
        let chunk = ChatCompletionChunk::new(
            &self.chunk_id,
            self.created,
            &self.model_id,
            ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            },
        );
        if let Ok(data) = serde_json::to_string(&chunk) {
            out.push(encode_data_frame(&data));
        }
    }
}
