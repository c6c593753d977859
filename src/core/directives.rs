//! Inline directive extraction.
//!
//! Model responses may embed two bracketed micro-format tags in otherwise
//! free-form text: a confidence rating (`[[CONFIDENCE: High]]`) and a chart
//! specification (`[[CHART:bar:Title:{"W1":40}]]`). The extractors here scan
//! a text buffer for the first occurrence of each tag, parse it, and return
//! the cleaned text alongside the parsed value. They are pure and
//! deterministic, and reapplying one to its own output is a no-op.

use serde_json::Value;
use tracing::debug;

const CONFIDENCE_OPEN: &str = "[[confidence:";
const CHART_OPEN: &str = "[[chart:";
const TAG_CLOSE: &str = "]]";

/// Model-reported confidence in its own answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("high") {
            Some(ConfidenceLevel::High)
        } else if token.eq_ignore_ascii_case("medium") {
            Some(ConfidenceLevel::Medium)
        } else if token.eq_ignore_ascii_case("low") {
            Some(ConfidenceLevel::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Area,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Area => "area",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("bar") {
            Some(ChartKind::Bar)
        } else if token.eq_ignore_ascii_case("line") {
            Some(ChartKind::Line)
        } else if token.eq_ignore_ascii_case("pie") {
            Some(ChartKind::Pie)
        } else if token.eq_ignore_ascii_case("area") {
            Some(ChartKind::Area)
        } else {
            None
        }
    }
}

/// One labelled data point of a chart series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// A chart specification recovered from a chart tag. Derived from the
/// turn's text on demand and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartDirective {
    pub kind: ChartKind,
    pub title: String,
    pub series: Vec<ChartPoint>,
}

/// Extract the first confidence tag from `text`.
///
/// Returns the parsed level and the text with the tag's literal substring
/// removed and the result trimmed. Text without a well-formed tag is
/// returned unchanged. A second tag, if present, stays embedded in the
/// returned text.
pub fn extract_confidence(text: &str) -> (Option<ConfidenceLevel>, String) {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    // Like a scanning regex, an occurrence that is not well-formed does not
    // stop the search; the first occurrence that parses wins.
    while let Some(rel) = lower[search_from..].find(CONFIDENCE_OPEN) {
        let start = search_from + rel;
        let token_start = start + CONFIDENCE_OPEN.len();
        let Some(close) = lower[token_start..].find(TAG_CLOSE) else {
            break;
        };
        let token_end = token_start + close;
        if let Some(level) = ConfidenceLevel::parse(text[token_start..token_end].trim()) {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..start]);
            cleaned.push_str(&text[token_end + TAG_CLOSE.len()..]);
            return (Some(level), cleaned.trim().to_string());
        }
        search_from = token_start;
    }
    (None, text.to_string())
}

/// Extract the first chart tag from `text`.
///
/// On success the tag is removed and the result trimmed. A tag whose data
/// payload fails to parse is reported via `tracing` and left in the text
/// verbatim, so the reader sees the raw tag rather than silently losing
/// content.
pub fn extract_chart(text: &str) -> (Option<ChartDirective>, String) {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    // Structural mismatches (unknown kind, missing colon, no closing
    // brackets) keep the scan moving, exactly as a regex would skip them.
    // A structurally complete tag whose payload is bad JSON is the one
    // case that stops the scan and leaves the raw tag in place.
    while let Some(rel) = lower[search_from..].find(CHART_OPEN) {
        let start = search_from + rel;
        let kind_start = start + CHART_OPEN.len();
        search_from = kind_start;

        let Some(kind_sep) = text[kind_start..].find(':') else {
            continue;
        };
        let kind_end = kind_start + kind_sep;
        let Some(kind) = ChartKind::parse(text[kind_start..kind_end].trim()) else {
            continue;
        };

        let title_start = kind_end + 1;
        let Some(title_sep) = text[title_start..].find(':') else {
            continue;
        };
        let title_end = title_start + title_sep;
        let title = text[title_start..title_end].trim();

        let payload_start = title_end + 1;
        let rest = &text[payload_start..];
        // The payload spans one balanced JSON value so that array payloads
        // (which contain `]` themselves) do not terminate the tag early.
        // Anything unbalanced falls back to the first `]]` and will fail
        // the JSON parse below.
        let payload_len = match json_value_end(rest) {
            Some(end) if rest[end..].trim_start().starts_with(TAG_CLOSE) => end,
            _ => match rest.find(TAG_CLOSE) {
                Some(pos) => pos,
                None => continue,
            },
        };
        let payload = &rest[..payload_len];
        let close = payload_len + rest[payload_len..].find(TAG_CLOSE).unwrap_or(0);
        let tag_end = payload_start + close + TAG_CLOSE.len();

        return match parse_series(payload) {
            Ok(series) => {
                let mut cleaned = String::with_capacity(text.len());
                cleaned.push_str(&text[..start]);
                cleaned.push_str(&text[tag_end..]);
                (
                    Some(ChartDirective {
                        kind,
                        title: title.to_string(),
                        series,
                    }),
                    cleaned.trim().to_string(),
                )
            }
            Err(err) => {
                debug!("discarding chart tag with malformed payload: {err}");
                (None, text.to_string())
            }
        };
    }
    (None, text.to_string())
}

/// Byte offset just past one balanced JSON object or array, tracking string
/// and escape state so brackets inside labels do not count.
fn json_value_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    if idx >= bytes.len() || !matches!(bytes[idx], b'{' | b'[') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(idx) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Resolve a chart payload into the canonical series representation.
///
/// Accepts either a mapping of label to number (entry order preserved) or
/// an array of objects carrying `name`/`label` and `value` fields.
fn parse_series(payload: &str) -> Result<Vec<ChartPoint>, String> {
    let value: Value =
        serde_json::from_str(payload.trim()).map_err(|e| format!("invalid JSON: {e}"))?;
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(label, v)| {
                v.as_f64()
                    .map(|value| ChartPoint {
                        label: label.clone(),
                        value,
                    })
                    .ok_or_else(|| format!("non-numeric value for {label:?}"))
            })
            .collect(),
        Value::Array(entries) => entries.iter().map(point_from_entry).collect(),
        other => Err(format!("expected object or array, got {other}")),
    }
}

fn point_from_entry(entry: &Value) -> Result<ChartPoint, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| format!("series entry is not an object: {entry}"))?;
    let label = obj
        .get("name")
        .or_else(|| obj.get("label"))
        .and_then(Value::as_str)
        .ok_or_else(|| format!("series entry without name/label: {entry}"))?;
    let value = obj
        .get("value")
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("series entry without numeric value: {entry}"))?;
    Ok(ChartPoint {
        label: label.to_string(),
        value,
    })
}

/// A turn's text resolved for display: directives stripped out and parsed.
///
/// Recomputed from the raw text on every render; nothing here is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTurn {
    pub text: String,
    pub confidence: Option<ConfidenceLevel>,
    pub chart: Option<ChartDirective>,
}

impl RenderedTurn {
    pub fn from_text(text: &str) -> Self {
        let (confidence, rest) = extract_confidence(text);
        let (chart, clean) = extract_chart(&rest);
        Self {
            text: clean,
            confidence,
            chart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_parsed_and_stripped() {
        let (level, text) = extract_confidence("The gel should hold. [[CONFIDENCE: High]]");
        assert_eq!(level, Some(ConfidenceLevel::High));
        assert_eq!(text, "The gel should hold.");
        assert!(!text.contains("[[CONFIDENCE:"));
    }

    #[test]
    fn confidence_level_token_is_case_insensitive() {
        let (level, _) = extract_confidence("[[confidence: mEdIuM]]");
        assert_eq!(level, Some(ConfidenceLevel::Medium));
        let (level, _) = extract_confidence("[[CONFIDENCE:low]]");
        assert_eq!(level, Some(ConfidenceLevel::Low));
    }

    #[test]
    fn text_without_confidence_tag_is_unchanged() {
        let input = "No directive here, just [[brackets: maybe]].";
        let (level, text) = extract_confidence(input);
        assert_eq!(level, None);
        assert_eq!(text, input);
    }

    #[test]
    fn invalid_confidence_level_is_not_a_match() {
        let input = "Hmm. [[CONFIDENCE: Maybe]]";
        let (level, text) = extract_confidence(input);
        assert_eq!(level, None);
        assert_eq!(text, input);
    }

    #[test]
    fn only_first_confidence_tag_is_honored() {
        let (level, text) =
            extract_confidence("a [[CONFIDENCE: Low]] b [[CONFIDENCE: High]] c");
        assert_eq!(level, Some(ConfidenceLevel::Low));
        assert_eq!(text, "a  b [[CONFIDENCE: High]] c");
    }

    #[test]
    fn scan_skips_malformed_occurrences() {
        let (level, text) =
            extract_confidence("a [[CONFIDENCE: Maybe]] b [[CONFIDENCE: High]] c");
        assert_eq!(level, Some(ConfidenceLevel::High));
        assert_eq!(text, "a [[CONFIDENCE: Maybe]] b  c");

        let input = r#"[[CHART:scatter:No:{"a":1}]] then [[CHART:bar:Yes:{"a":1}]]"#;
        let (chart, text) = extract_chart(input);
        assert_eq!(chart.unwrap().title, "Yes");
        assert_eq!(text, r#"[[CHART:scatter:No:{"a":1}]] then"#);
    }

    #[test]
    fn confidence_extraction_is_idempotent() {
        let (level, once) = extract_confidence("done [[CONFIDENCE: High]]");
        assert_eq!(level, Some(ConfidenceLevel::High));
        let (again, twice) = extract_confidence(&once);
        assert_eq!(again, None);
        assert_eq!(twice, once);
    }

    #[test]
    fn object_payload_becomes_ordered_series() {
        let input = r#"Breakdown: [[CHART:bar:Degradation:{"W1":40,"W2":30,"W3":20}]]"#;
        let (chart, text) = extract_chart(input);
        let chart = chart.expect("chart");
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.title, "Degradation");
        assert_eq!(
            chart.series,
            vec![
                ChartPoint {
                    label: "W1".into(),
                    value: 40.0
                },
                ChartPoint {
                    label: "W2".into(),
                    value: 30.0
                },
                ChartPoint {
                    label: "W3".into(),
                    value: 20.0
                },
            ]
        );
        assert_eq!(text, "Breakdown:");
        assert!(!text.contains("[[CHART:"));
    }

    #[test]
    fn array_payload_accepts_name_and_label_keys() {
        let input = r#"[[CHART:pie:Mix:[{"name":"PEG","value":60},{"label":"Alginate","value":40}]]]"#;
        let (chart, text) = extract_chart(input);
        let chart = chart.expect("chart");
        assert_eq!(chart.kind, ChartKind::Pie);
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].label, "PEG");
        assert_eq!(chart.series[1].label, "Alginate");
        assert_eq!(chart.series[1].value, 40.0);
        assert_eq!(text, "");
    }

    #[test]
    fn chart_kind_is_case_insensitive() {
        let (chart, _) = extract_chart(r#"[[CHART:AREA:Swelling:{"d1":1.2}]]"#);
        assert_eq!(chart.unwrap().kind, ChartKind::Area);
    }

    #[test]
    fn malformed_payload_leaves_raw_tag_in_place() {
        let input = "See [[CHART:line:Broken:{not json}]] for details.";
        let (chart, text) = extract_chart(input);
        assert_eq!(chart, None);
        assert_eq!(text, input);

        // Re-scanning finds the same malformed tag again.
        let (chart, text) = extract_chart(&text);
        assert_eq!(chart, None);
        assert_eq!(text, input);
    }

    #[test]
    fn non_numeric_object_values_are_malformed() {
        let input = r#"[[CHART:bar:Bad:{"W1":"forty"}]]"#;
        let (chart, text) = extract_chart(input);
        assert_eq!(chart, None);
        assert_eq!(text, input);
    }

    #[test]
    fn unknown_chart_kind_is_not_a_match() {
        let input = r#"[[CHART:scatter:Nope:{"a":1}]]"#;
        let (chart, text) = extract_chart(input);
        assert_eq!(chart, None);
        assert_eq!(text, input);
    }

    #[test]
    fn labels_may_contain_brackets() {
        let input = r#"[[CHART:bar:Odd:{"sample [1]":5,"sample [2]":7}]]"#;
        let (chart, text) = extract_chart(input);
        let chart = chart.expect("chart");
        assert_eq!(chart.series[0].label, "sample [1]");
        assert_eq!(chart.series[1].value, 7.0);
        assert_eq!(text, "");
    }

    #[test]
    fn combined_extraction_matches_the_release_scenario() {
        let input = concat!(
            "Release 40% in week 1.",
            r#"[[CHART:bar:Release:{"W1":40,"W2":30}]]"#,
            " [[CONFIDENCE: High]]"
        );
        let rendered = RenderedTurn::from_text(input);
        assert_eq!(rendered.confidence, Some(ConfidenceLevel::High));
        let chart = rendered.chart.expect("chart");
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.title, "Release");
        assert_eq!(
            chart.series,
            vec![
                ChartPoint {
                    label: "W1".into(),
                    value: 40.0
                },
                ChartPoint {
                    label: "W2".into(),
                    value: 30.0
                },
            ]
        );
        assert_eq!(rendered.text, "Release 40% in week 1.");
    }

    #[test]
    fn rendered_turn_without_directives_is_passthrough() {
        let rendered = RenderedTurn::from_text("plain prose");
        assert_eq!(rendered.text, "plain prose");
        assert_eq!(rendered.confidence, None);
        assert_eq!(rendered.chart, None);
    }
}
