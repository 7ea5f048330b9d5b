//! Judge response parsing for convergence checks, ensemble votes and titles.
//!
//! Judges are asked for JSON but routinely wrap it in prose or code fences,
//! or truncate it. Every parser here is best effort and never fails: when no
//! usable object is found the caller gets a safe default.
//!
//! | Function | Required key | Fallback |
//! |----------|--------------|----------|
//! | [`parse_convergence_response`] | `converged` | `converged = false` with reason |
//! | [`parse_vote_analysis`] | `confidence` or `modelWeights` | `None` (caller uses neutral defaults) |
//! | [`parse_title_response`] | `title` | first non-empty line |

use crate::verdict::convergence::ConvergenceCheck;
use crate::verdict::ensemble::{Outlier, VoteAnalysis};
use crate::util::{excerpt, strip_code_fence};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

type JsonObject = Map<String, Value>;

/// Find a JSON object in `response` that contains `required_key`.
///
/// Tries, in order:
/// 1. the whole response (code fences stripped)
/// 2. the widest `{ ... "key" ... }` span
/// 3. every brace-balanced object, first match wins
pub fn extract_json_object(response: &str, required_key: &str) -> Option<JsonObject> {
    let has_key = |obj: &JsonObject| obj.contains_key(required_key);

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(strip_code_fence(response))
        && has_key(&obj)
    {
        return Some(obj);
    }

    let pattern = format!(r#"(?s)\{{.*"{}".*\}}"#, regex::escape(required_key));
    if let Ok(re) = Regex::new(&pattern)
        && let Some(found) = re.find(response)
        && let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(found.as_str())
        && has_key(&obj)
    {
        return Some(obj);
    }

    balanced_objects(response)
        .filter_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        })
        .find(has_key)
}

/// Iterate over brace-balanced `{...}` spans, honouring JSON string escapes.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    text.match_indices('{').filter_map(move |(start, _)| {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + 1]);
                    }
                }
                _ => {}
            }
        }
        None
    })
}

/// Parse a convergence judge reply.
///
/// # Examples
///
/// ```
/// use roundtable_domain::verdict::parsing::parse_convergence_response;
///
/// let check = parse_convergence_response(r#"{"converged": true, "reason": "All agree"}"#);
/// assert_eq!(check.converged, Some(true));
///
/// let fallback = parse_convergence_response("I think they mostly agree.");
/// assert_eq!(fallback.converged, Some(false));
/// ```
pub fn parse_convergence_response(response: &str) -> ConvergenceCheck {
    let Some(obj) = extract_json_object(response, "converged") else {
        return ConvergenceCheck::not_converged(
            format!(
                "Could not parse convergence response; continuing the debate ({})",
                excerpt(response, 120)
            ),
            response,
        );
    };

    let Some(converged) = obj.get("converged").and_then(as_bool) else {
        return ConvergenceCheck::not_converged(
            "Convergence response had no boolean verdict; continuing the debate",
            response,
        );
    };

    ConvergenceCheck {
        converged: Some(converged),
        confidence: obj.get("confidence").and_then(as_percent),
        reason: obj
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        agreements: string_list(field(&obj, &["agreements", "agreementAreas"])),
        disagreements: string_list(field(&obj, &["disagreements", "disagreementAreas"])),
        raw_response: response.to_string(),
    }
}

/// Parse an ensemble judge reply.
///
/// `answered_models` restricts `modelWeights` and `outliers` to models that
/// actually produced an answer this round. Returns `None` when no usable
/// object is found.
pub fn parse_vote_analysis(response: &str, answered_models: &[String]) -> Option<VoteAnalysis> {
    let obj = extract_json_object(response, "confidence")
        .or_else(|| extract_json_object(response, "modelWeights"))
        .or_else(|| extract_json_object(response, "model_weights"))?;

    let answered = |model: &str| answered_models.iter().any(|m| m == model);

    let model_weights: BTreeMap<String, f64> = field(&obj, &["modelWeights", "model_weights"])
        .and_then(Value::as_object)
        .map(|weights| {
            weights
                .iter()
                .filter(|(model, _)| answered(model))
                .filter_map(|(model, w)| as_f64(w).map(|w| (model.clone(), normalize_weight(w))))
                .collect()
        })
        .unwrap_or_default();

    let outliers = field(&obj, &["outliers"])
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(model) => Some(Outlier {
                        model: model.clone(),
                        reason: String::new(),
                    }),
                    Value::Object(o) => o.get("model").and_then(Value::as_str).map(|model| Outlier {
                        model: model.to_string(),
                        reason: o
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    _ => None,
                })
                .filter(|o| answered(&o.model))
                .collect()
        })
        .unwrap_or_default();

    Some(VoteAnalysis {
        confidence: obj
            .get("confidence")
            .and_then(as_percent)
            .unwrap_or(crate::verdict::ensemble::NEUTRAL_CONFIDENCE),
        outliers,
        agreement_areas: string_list(field(&obj, &["agreementAreas", "agreement_areas"])),
        disagreement_areas: string_list(field(&obj, &["disagreementAreas", "disagreement_areas"])),
        model_weights,
    })
}

/// Parse a title generator reply into `(title, description)`.
pub fn parse_title_response(response: &str) -> Option<(String, String)> {
    if let Some(obj) = extract_json_object(response, "title") {
        let title = obj.get("title").and_then(Value::as_str).map(clean_title)?;
        if title.is_empty() {
            return None;
        }
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(|d| excerpt(d, 240))
            .unwrap_or_default();
        return Some((title, description));
    }

    let line = response.lines().map(clean_title).find(|l| !l.is_empty())?;
    Some((line, String::new()))
}

fn clean_title(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '*')
        .trim();
    excerpt(cleaned, 80)
}

fn field<'a>(obj: &'a JsonObject, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

/// 0–100 confidence; fractions in (0, 1) are read as ratios.
fn as_percent(value: &Value) -> Option<u8> {
    let raw = as_f64(value)?;
    let scaled = if raw > 0.0 && raw < 1.0 { raw * 100.0 } else { raw };
    Some(scaled.clamp(0.0, 100.0).round() as u8)
}

/// Weights are [0, 1]; values above 1 are read as percentages.
fn normalize_weight(raw: f64) -> f64 {
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ==================== extract_json_object ====================

    #[test]
    fn extracts_direct_json() {
        let obj = extract_json_object(r#"{"converged": true}"#, "converged").unwrap();
        assert_eq!(obj["converged"], Value::Bool(true));
    }

    #[test]
    fn extracts_fenced_json() {
        let response = "```json\n{\"converged\": false, \"reason\": \"split\"}\n```";
        assert!(extract_json_object(response, "converged").is_some());
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let response = r#"Here is my verdict: {"converged": true, "reason": "same answer"} Thanks."#;
        let obj = extract_json_object(response, "converged").unwrap();
        assert_eq!(obj["reason"], "same answer");
    }

    #[test]
    fn balanced_scan_skips_unrelated_objects() {
        let response = r#"Example {"a": 1} then {"converged": false, "note": "has } brace"} end {"#;
        let obj = extract_json_object(response, "converged").unwrap();
        assert_eq!(obj["note"], "has } brace");
    }

    #[test]
    fn missing_key_yields_none() {
        assert!(extract_json_object(r#"{"other": 1}"#, "converged").is_none());
        assert!(extract_json_object("no json", "converged").is_none());
    }

    // ==================== parse_convergence_response ====================

    #[test]
    fn convergence_full_payload() {
        let check = parse_convergence_response(
            r#"{"converged": true, "confidence": 0.85, "reason": "Aligned",
                "agreements": ["use Rust"], "disagreements": []}"#,
        );
        assert_eq!(check.converged, Some(true));
        assert_eq!(check.confidence, Some(85));
        assert_eq!(check.agreements, vec!["use Rust".to_string()]);
    }

    #[test]
    fn convergence_accepts_string_booleans() {
        let check = parse_convergence_response(r#"{"converged": "yes", "reason": "ok"}"#);
        assert!(check.has_converged());
    }

    #[test]
    fn convergence_malformed_defaults_to_false() {
        let check = parse_convergence_response("They broadly agree but {converged: maybe");
        assert_eq!(check.converged, Some(false));
        assert!(check.reason.contains("Could not parse"));
        assert_eq!(check.raw_response, "They broadly agree but {converged: maybe");
    }

    #[test]
    fn convergence_non_boolean_verdict_defaults_to_false() {
        let check = parse_convergence_response(r#"{"converged": 3}"#);
        assert_eq!(check.converged, Some(false));
    }

    // ==================== parse_vote_analysis ====================

    #[test]
    fn vote_analysis_filters_unanswered_models() {
        let response = r#"{
            "confidence": 72,
            "outliers": [{"model": "b", "reason": "off topic"}, {"model": "ghost", "reason": "?"}],
            "agreementAreas": ["x"],
            "disagreementAreas": ["y"],
            "modelWeights": {"a": 0.8, "b": 30, "ghost": 1.0}
        }"#;
        let analysis = parse_vote_analysis(response, &models(&["a", "b"])).unwrap();
        assert_eq!(analysis.confidence, 72);
        assert_eq!(analysis.outliers.len(), 1);
        assert_eq!(analysis.model_weights.len(), 2);
        assert_eq!(analysis.model_weights["a"], 0.8);
        assert!((analysis.model_weights["b"] - 0.3).abs() < f64::EPSILON);
        assert!(!analysis.model_weights.contains_key("ghost"));
    }

    #[test]
    fn vote_analysis_accepts_snake_case() {
        let response = r#"{"confidence": 40, "model_weights": {"a": 0.5}, "agreement_areas": ["z"]}"#;
        let analysis = parse_vote_analysis(response, &models(&["a"])).unwrap();
        assert_eq!(analysis.agreement_areas, vec!["z".to_string()]);
        assert_eq!(analysis.model_weights["a"], 0.5);
    }

    #[test]
    fn vote_analysis_unparseable_is_none() {
        assert!(parse_vote_analysis("All answers look fine to me.", &models(&["a"])).is_none());
    }

    // ==================== parse_title_response ====================

    #[test]
    fn title_from_json() {
        let (title, description) =
            parse_title_response(r#"{"title": "Rust errors", "description": "Error handling"}"#)
                .unwrap();
        assert_eq!(title, "Rust errors");
        assert_eq!(description, "Error handling");
    }

    #[test]
    fn title_falls_back_to_first_line() {
        let (title, description) = parse_title_response("\n# \"Async Rust\"\nmore").unwrap();
        assert_eq!(title, "Async Rust");
        assert!(description.is_empty());
    }

    #[test]
    fn empty_title_is_none() {
        assert!(parse_title_response("   \n  ").is_none());
    }
}
