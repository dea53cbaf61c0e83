//! Output Parser
//!
//! Turns free-text reasoning-service output into a [`ParsedOutput`]:
//!
//! ```text
//! Thought: I should look this up.
//! Action: Search[DeepSeek latest model]
//! ```
//!
//! Parsing runs in two stages. Normalization tolerates the usual near misses
//! (markdown emphasis around markers, list bullets, code fences, wrapping
//! backticks or quotes, an `Action:` marker in the middle of a line or with
//! its value on the next line, an action split across lines). The grammar that
//! follows is strict: a `Thought:`/`Action:` marker keyword, then either
//! `Finish[answer]` or `name[input]` with a plain identifier name. Anything
//! else is a [`ParsedAction::ParseFailure`]; parsing never panics.

use serde::{Deserialize, Serialize};

const THOUGHT: &str = "Thought";
const ACTION: &str = "Action";
const OBSERVATION: &str = "Observation";
const FINISH: &str = "Finish";

/// Structured action extracted from one response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedAction {
    /// `name[input]`; the name is not checked against the registry here
    ToolCall { name: String, input: String },
    /// `Finish[answer]`
    Finish { answer: String },
    /// Missing `Action:` line or malformed action value
    ParseFailure { raw_text: String },
}

impl ParsedAction {
    /// Canonical action text for the ledger
    pub fn render(&self) -> String {
        match self {
            Self::ToolCall { name, input } => format!("{name}[{input}]"),
            Self::Finish { answer } => format!("{FINISH}[{answer}]"),
            Self::ParseFailure { raw_text } => raw_text.clone(),
        }
    }
}

/// Thought and action extracted from one response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedOutput {
    pub thought: Option<String>,
    pub action: ParsedAction,
    /// Raw text after the `Action:` marker, if the marker was present
    pub action_text: Option<String>,
}

/// Parse a full reasoning-service response
pub fn parse(response: &str) -> ParsedOutput {
    let owned = normalized_lines(response);
    let lines: Vec<&str> = owned.iter().map(String::as_str).collect();

    let action_line = lines
        .iter()
        .position(|line| marker_value(line, ACTION).is_some());
    let thought = extract_thought(&lines, action_line.unwrap_or(lines.len()));

    let Some(action_idx) = action_line else {
        return ParsedOutput {
            thought,
            action: ParsedAction::ParseFailure {
                raw_text: response.trim().to_string(),
            },
            action_text: None,
        };
    };

    let segment = action_segment(&lines, action_idx);
    let action = match parse_action(&segment) {
        ParsedAction::ParseFailure { .. } => ParsedAction::ParseFailure {
            raw_text: response.trim().to_string(),
        },
        action => action,
    };

    ParsedOutput {
        thought,
        action,
        action_text: Some(segment),
    }
}

/// Classify the value that follows an `Action:` marker
pub fn parse_action(value: &str) -> ParsedAction {
    let failure = || ParsedAction::ParseFailure {
        raw_text: value.trim().to_string(),
    };

    let text = unwrap_action(value.trim());
    let Some(open) = text.find('[') else {
        return failure();
    };
    let Some(close) = matching_close(text, open).or_else(|| text.rfind(']')) else {
        return failure();
    };
    if close < open {
        return failure();
    }

    let trailing = text[close + 1..].trim();
    if !trailing.chars().all(|c| matches!(c, '.' | '`' | '"' | '\'' | '*')) {
        return failure();
    }

    let name = text[..open].trim().trim_matches(|c| matches!(c, '`' | '*' | '"' | '\''));
    if !is_identifier(name) {
        return failure();
    }

    let inner = text[open + 1..close].trim();
    if name == FINISH {
        ParsedAction::Finish {
            answer: inner.to_string(),
        }
    } else {
        ParsedAction::ToolCall {
            name: name.to_string(),
            input: strip_matching_quotes(inner).to_string(),
        }
    }
}

/// Lines with code fences dropped, trailing whitespace removed and an
/// inline `Action:` marker moved onto its own line
fn normalized_lines(response: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for line in response
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim_start().starts_with("```"))
    {
        match split_inline_action(line) {
            Some((head, tail)) => {
                if !head.is_empty() {
                    lines.push(head.to_string());
                }
                lines.push(tail.to_string());
            }
            None => lines.push(line.to_string()),
        }
    }
    lines
}

/// `("Thought: ...", "Action: ...")` when an `Action:` marker follows other
/// text on the same line
fn split_inline_action(line: &str) -> Option<(&str, &str)> {
    if marker_value(line, ACTION).is_some() {
        return None;
    }

    line.match_indices(ACTION).find_map(|(idx, _)| {
        let standalone = !line[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let marked = line[idx + ACTION.len()..].trim_start_matches('*').starts_with(':');
        if !(standalone && marked) {
            return None;
        }

        let head_end = line[..idx].trim_end_matches('*').len();
        Some((line[..head_end].trim_end(), &line[head_end..]))
    })
}

/// Value after `keyword:` if the line starts with that marker.
///
/// Tolerates list bullets, quote markers, headings and `**bold**` around
/// the keyword; the keyword itself is matched case-sensitively.
fn marker_value<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let start = line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '>' | '#' | '*'));
    let rest = start.strip_prefix(keyword)?.trim_start_matches('*');
    let value = rest.strip_prefix(':')?;
    Some(value.trim_start_matches('*').trim())
}

fn is_marker_line(line: &str) -> bool {
    [THOUGHT, ACTION, OBSERVATION]
        .iter()
        .any(|keyword| marker_value(line, keyword).is_some())
}

/// Thought text: the first `Thought:` line before the action, plus any
/// unmarked continuation lines up to the next marker.
fn extract_thought(lines: &[&str], end: usize) -> Option<String> {
    let start = lines[..end]
        .iter()
        .position(|line| marker_value(line, THOUGHT).is_some())?;

    let mut parts = vec![marker_value(lines[start], THOUGHT).unwrap_or_default()];
    parts.extend(
        lines[start + 1..end]
            .iter()
            .take_while(|line| !is_marker_line(line))
            .map(|line| line.trim()),
    );

    let thought = parts.join("\n").trim().to_string();
    (!thought.is_empty()).then_some(thought)
}

/// Action value, following continuation lines only while the bracket
/// opened on the marker line is still unterminated.
fn action_segment(lines: &[&str], action_idx: usize) -> String {
    let (first, first_idx) = match marker_value(lines[action_idx], ACTION) {
        Some(value) if !value.is_empty() => (value, action_idx),
        // Bare `Action:` takes its value from the next unmarked line
        _ => lines[action_idx + 1..]
            .iter()
            .enumerate()
            .take_while(|(_, line)| !is_marker_line(line))
            .find(|(_, line)| !line.trim().is_empty())
            .map_or(("", action_idx), |(offset, line)| {
                (line.trim(), action_idx + 1 + offset)
            }),
    };

    let unterminated = first
        .find('[')
        .is_some_and(|open| !first[open..].contains(']'));
    if !unterminated {
        return first.to_string();
    }

    let mut segment = first.to_string();
    for line in lines[first_idx + 1..].iter().take_while(|line| !is_marker_line(line)) {
        segment.push('\n');
        segment.push_str(line);
    }
    // Anything after the last closing bracket is trailing chatter
    match segment.rfind(']') {
        Some(close) => segment[..=close].to_string(),
        None => segment,
    }
}

/// Strip wrapping backticks/quotes, and one pair of brackets wrapped around
/// a whole `name[input]` action.
fn unwrap_action(text: &str) -> &str {
    let mut text = text.trim();
    loop {
        let stripped = strip_matching_quotes(text);
        let stripped = match stripped.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            Some(inner) if inner.contains('[') && !inner.trim_start().starts_with('[') => inner.trim(),
            _ => stripped,
        };
        if stripped.len() == text.len() {
            return text;
        }
        text = stripped;
    }
}

/// Index of the `]` that closes the `[` at `open`, if it is ever closed
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_matching_quotes(text: &str) -> &str {
    for quote in ['`', '"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return text[1..text.len() - 1].trim();
        }
    }
    text
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_call(name: &str, input: &str) -> ParsedAction {
        ParsedAction::ToolCall {
            name: name.into(),
            input: input.into(),
        }
    }

    fn finish(answer: &str) -> ParsedAction {
        ParsedAction::Finish {
            answer: answer.into(),
        }
    }

    #[test]
    fn test_parse_action_tool_call() {
        assert_eq!(
            parse_action("Search[DeepSeek latest model]"),
            tool_call("Search", "DeepSeek latest model")
        );
    }

    #[test]
    fn test_parse_action_finish() {
        assert_eq!(
            parse_action("Finish[DeepSeek latest model is V3.2]"),
            finish("DeepSeek latest model is V3.2")
        );
    }

    #[test]
    fn test_parse_thought_and_action() {
        let parsed = parse(
            "Thought: I need fresh information about DeepSeek.\nAction: Search[DeepSeek latest model]",
        );
        assert_eq!(
            parsed.thought.as_deref(),
            Some("I need fresh information about DeepSeek.")
        );
        assert_eq!(parsed.action, tool_call("Search", "DeepSeek latest model"));
        assert_eq!(parsed.action_text.as_deref(), Some("Search[DeepSeek latest model]"));
    }

    #[test]
    fn test_thought_is_optional() {
        let parsed = parse("Action: Finish[42]");
        assert_eq!(parsed.thought, None);
        assert_eq!(parsed.action, finish("42"));
    }

    #[test]
    fn test_multiline_thought() {
        let parsed = parse("Thought: first line\nsecond line\nAction: Finish[ok]");
        assert_eq!(parsed.thought.as_deref(), Some("first line\nsecond line"));
    }

    #[test]
    fn test_finish_preserves_punctuation_and_nested_brackets() {
        let parsed = parse("Action: Finish[It's 3.5°C, (feels like -1); see [1], \"quoted\"!]");
        assert_eq!(
            parsed.action,
            finish("It's 3.5°C, (feels like -1); see [1], \"quoted\"!")
        );
    }

    #[test]
    fn test_missing_action_is_parse_failure() {
        for text in [
            "",
            "   ",
            "I think the answer is 42.",
            "Thought: hmm, let me think",
            "Search[query]",
            "Actions: Search[query]",
            "action: Search[query]",
        ] {
            let parsed = parse(text);
            assert!(
                matches!(parsed.action, ParsedAction::ParseFailure { .. }),
                "expected failure for {text:?}"
            );
            assert_eq!(parsed.action_text, None, "{text:?}");
        }
    }

    #[test]
    fn test_malformed_action_values() {
        for value in [
            "Search",
            "Search(query)",
            "Search]query[",
            "[query]",
            "web search[query]",
            "1tool[query]",
            "Search[query] and then Finish[answer]x",
            "Search[query] please",
        ] {
            assert!(
                matches!(parse_action(value), ParsedAction::ParseFailure { .. }),
                "expected failure for {value:?}"
            );
        }
    }

    #[test]
    fn test_failure_keeps_raw_response() {
        let parsed = parse("Thought: ok\nAction: search the web");
        assert_eq!(
            parsed.action,
            ParsedAction::ParseFailure {
                raw_text: "Thought: ok\nAction: search the web".into()
            }
        );
        assert_eq!(parsed.action_text.as_deref(), Some("search the web"));
        assert_eq!(parsed.thought.as_deref(), Some("ok"));
    }

    #[test]
    fn test_markdown_decorations_tolerated() {
        let parsed = parse("**Thought:** need data\n**Action:** `Search[rust 2024 edition]`");
        assert_eq!(parsed.thought.as_deref(), Some("need data"));
        assert_eq!(parsed.action, tool_call("Search", "rust 2024 edition"));

        let parsed = parse("- **Action**: Finish[done].");
        assert_eq!(parsed.action, finish("done"));
    }

    #[test]
    fn test_code_fence_and_surrounding_text() {
        let parsed = parse(
            "Sure! Here is my reasoning.\n```\nThought: compute it\nAction: calculator[ 6 * 7 ]\n```\nHope that helps.",
        );
        assert_eq!(parsed.action, tool_call("calculator", "6 * 7"));
    }

    #[test]
    fn test_quoted_and_wrapped_inputs() {
        assert_eq!(parse_action("Search[\"rust async\"]"), tool_call("Search", "rust async"));
        assert_eq!(parse_action("`Search`[rust]"), tool_call("Search", "rust"));
        assert_eq!(parse_action("[Search[rust]]"), tool_call("Search", "rust"));
        assert_eq!(parse_action("\"Finish[yes]\""), finish("yes"));
    }

    #[test]
    fn test_empty_input_allowed() {
        assert_eq!(parse_action("datetime[]"), tool_call("datetime", ""));
        assert_eq!(parse_action("Finish[]"), finish(""));
    }

    #[test]
    fn test_first_action_wins_and_observation_ignored() {
        let parsed = parse(
            "Thought: search first\nAction: Search[a]\nObservation: [made up]\nAction: Finish[b]",
        );
        assert_eq!(parsed.action, tool_call("Search", "a"));
    }

    #[test]
    fn test_action_spanning_lines() {
        let parsed = parse("Thought: summarise\nAction: Finish[line one\nline two]\nthanks");
        assert_eq!(parsed.action, finish("line one\nline two"));
    }

    #[test]
    fn test_unterminated_bracket_stops_at_marker() {
        let parsed = parse("Action: Search[rust\nObservation: [fake]");
        assert!(matches!(parsed.action, ParsedAction::ParseFailure { .. }));
    }

    #[test]
    fn test_action_marker_mid_line() {
        let parsed = parse("Thought: I should search for this. Action: Search[rust]");
        assert_eq!(parsed.thought.as_deref(), Some("I should search for this."));
        assert_eq!(parsed.action, tool_call("Search", "rust"));

        let parsed = parse("I'll finish now. **Action:** Finish[done]");
        assert_eq!(parsed.thought, None);
        assert_eq!(parsed.action, finish("done"));

        let parsed = parse("Thought: no ReAction: here");
        assert!(matches!(parsed.action, ParsedAction::ParseFailure { .. }));
    }

    #[test]
    fn test_action_value_on_next_line() {
        let parsed = parse("Thought: look it up\nAction:\nSearch[rust]");
        assert_eq!(parsed.thought.as_deref(), Some("look it up"));
        assert_eq!(parsed.action, tool_call("Search", "rust"));
        assert_eq!(parsed.action_text.as_deref(), Some("Search[rust]"));

        let parsed = parse("Action:\n\n`Finish[multi\nline]`");
        assert_eq!(parsed.action, finish("multi\nline"));

        let parsed = parse("Action:\nObservation: nothing");
        assert!(matches!(parsed.action, ParsedAction::ParseFailure { .. }));
        assert_eq!(parsed.action_text.as_deref(), Some(""));
    }

    #[test]
    fn test_two_bracket_groups_rejected() {
        assert!(matches!(
            parse_action("Finish[a] then Search[b]"),
            ParsedAction::ParseFailure { .. }
        ));
        assert!(matches!(
            parse_action("Search[a][b]"),
            ParsedAction::ParseFailure { .. }
        ));
        assert_eq!(parse_action("Finish[range [0, 1)]"), finish("range [0, 1)"));
    }

    #[test]
    fn test_render_round_trip_text() {
        assert_eq!(tool_call("Search", "x").render(), "Search[x]");
        assert_eq!(finish("y").render(), "Finish[y]");
    }
}
