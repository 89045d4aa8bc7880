//! Private chain-of-thought never reaches the client. Models wrap it in
//! paired tags, stray tags, or sentinel tokens with full-width bars; all
//! of it is stripped from any A-shaped content.

use std::sync::LazyLock;

use regex::Regex;

/// Paired tag blocks, non-greedy across newlines.
static PAIRED_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(think|thinking|thought|antthinking)>.*?</(think|thinking|thought|antthinking)>")
        .expect("paired tag pattern")
});

/// Any stray opening or closing tag of those names.
static STRAY_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?(think|thinking|thought|antthinking)>").expect("stray tag pattern")
});

/// Sentinel-wrapped blocks, ASCII (`<|...|>`) and full-width (`<｜...｜>`)
/// bar variants.
static SENTINEL_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<[|｜]begin[^|｜]*[|｜]>.*?<[|｜]end[^|｜]*[|｜]>")
        .expect("sentinel block pattern")
});

/// Lone sentinel tokens left after a block was cut mid-stream.
static LONE_SENTINELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[|｜](?:begin|end)[^|｜]*[|｜]>").expect("lone sentinel pattern")
});

pub fn strip_thinking(content: &str) -> String {
    if !content.contains('<') {
        return content.to_string();
    }
    let pass = PAIRED_TAGS.replace_all(content, "");
    let pass = SENTINEL_BLOCKS.replace_all(&pass, "");
    let pass = STRAY_TAGS.replace_all(&pass, "");
    LONE_SENTINELS.replace_all(&pass, "").into_owned()
}

/// An opening construct whose closing half has not arrived yet.
static UNCLOSED_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(think|thinking|thought|antthinking)>|<[|｜]begin").expect("unclosed open pattern")
});

/// Every literal a split frame could leave a prefix of.
const TOKEN_STARTS: &[&str] = &[
    "<think>",
    "<thinking>",
    "<thought>",
    "<antthinking>",
    "</think>",
    "</thinking>",
    "</thought>",
    "</antthinking>",
    "<|begin",
    "<｜begin",
    "<|end",
    "<｜end",
];

/// Streaming variant of [`strip_thinking`]. Tags and sentinels may be cut
/// anywhere by frame boundaries, so output is withheld while the tail
/// could still turn into a thinking construct; `finish` drains whatever
/// is left through the non-streaming strip.
#[derive(Debug, Default)]
pub struct ThinkingStreamFilter {
    carry: String,
}

impl ThinkingStreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: &str) -> String {
        self.carry.push_str(input);
        if !self.carry.contains('<') {
            return std::mem::take(&mut self.carry);
        }

        let text = PAIRED_TAGS.replace_all(&self.carry, "");
        let text = SENTINEL_BLOCKS.replace_all(&text, "").into_owned();

        let (emit, hold) = match UNCLOSED_OPEN.find(&text) {
            Some(found) => {
                let at = found.start();
                (text[..at].to_string(), text[at..].to_string())
            }
            None => {
                let split = text.len() - partial_token_suffix(&text);
                (text[..split].to_string(), text[split..].to_string())
            }
        };
        self.carry = hold;

        let emit = STRAY_TAGS.replace_all(&emit, "");
        LONE_SENTINELS.replace_all(&emit, "").into_owned()
    }

    pub fn finish(&mut self) -> String {
        strip_thinking(&std::mem::take(&mut self.carry))
    }
}

/// Length in bytes of the longest suffix that is a proper prefix of some
/// token literal.
fn partial_token_suffix(text: &str) -> usize {
    let window_start = text
        .char_indices()
        .rev()
        .take(16)
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0);
    for (at, c) in text[window_start..].char_indices() {
        if c != '<' {
            continue;
        }
        let suffix = &text[window_start + at..];
        if TOKEN_STARTS
            .iter()
            .any(|token| token.starts_with(suffix) && suffix.len() < token.len())
        {
            return suffix.len();
        }
    }
    0
}
