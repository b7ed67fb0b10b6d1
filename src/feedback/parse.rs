use super::AdjustmentResult;
use crate::adjust::{AdjustmentStep, PartTarget, TargetedStep};
use crate::error::FeedbackError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

/// Turns a model reply into steps. The JSON document may stand alone or sit
/// inside a fenced code block surrounded by prose.
pub fn parse_response(text: &str) -> Result<AdjustmentResult, FeedbackError> {
    let json = extract_json(text)
        .ok_or_else(|| FeedbackError::Parse("no JSON object in response".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|err| FeedbackError::Parse(err.to_string()))?;
    parse_document(&value)
}

fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON_RE.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

pub fn parse_document(value: &Value) -> Result<AdjustmentResult, FeedbackError> {
    let doc = value
        .as_object()
        .ok_or_else(|| FeedbackError::Parse("response is not a JSON object".to_string()))?;

    let converged = doc
        .get("satisfied")
        .or_else(|| doc.get("converged"))
        .ok_or_else(|| FeedbackError::Parse("missing `satisfied`".to_string()))?
        .as_bool()
        .ok_or_else(|| FeedbackError::Parse("`satisfied` must be a boolean".to_string()))?;

    let adjustments = doc
        .get("adjustments")
        .ok_or_else(|| FeedbackError::Parse("missing `adjustments`".to_string()))?;
    let steps = match adjustments {
        Value::Null => Vec::new(),
        Value::Object(map) => {
            let mut steps = Vec::new();
            for (key, entry) in map {
                let target = PartTarget::parse(key)?;
                steps.extend(parse_entry(target, entry)?);
            }
            steps
        }
        _ => {
            return Err(FeedbackError::Parse(
                "`adjustments` must be an object".to_string(),
            ));
        }
    };

    let similarity = doc
        .get("comparison_analysis")
        .and_then(|analysis| analysis.get("similarity_score"))
        .or_else(|| doc.get("similarity_score"))
        .and_then(Value::as_f64)
        .map(|score| score as f32);
    let notes = doc
        .get("notes")
        .and_then(Value::as_str)
        .filter(|notes| !notes.trim().is_empty())
        .map(str::to_string);

    Ok(AdjustmentResult {
        steps,
        converged,
        similarity,
        notes,
    })
}

fn parse_entry(target: PartTarget, entry: &Value) -> Result<Vec<TargetedStep>, FeedbackError> {
    match entry {
        Value::Null => Ok(Vec::new()),
        // Shorthand: `"mouth": "up_slight"`.
        Value::String(token) if is_noop(token) => Ok(Vec::new()),
        Value::String(token) => Ok(vec![TargetedStep::new(target, token.parse()?)]),
        Value::Object(fields) => {
            let mut steps = Vec::new();
            if let Some(token) = token_field(fields.get("position"), "position")? {
                steps.push(TargetedStep::new(target, AdjustmentStep::parse_position(token)?));
            }
            if let Some(token) = token_field(fields.get("scale"), "scale")? {
                steps.push(TargetedStep::new(target, AdjustmentStep::parse_scale(token)?));
            }
            Ok(steps)
        }
        _ => Err(FeedbackError::Parse(format!(
            "adjustment for {target} must be an object"
        ))),
    }
}

fn token_field<'a>(
    value: Option<&'a Value>,
    field: &str,
) -> Result<Option<&'a str>, FeedbackError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(token)) if is_noop(token) => Ok(None),
        Some(Value::String(token)) => Ok(Some(token.as_str())),
        Some(_) => Err(FeedbackError::Parse(format!("`{field}` must be a string"))),
    }
}

fn is_noop(token: &str) -> bool {
    matches!(token.trim(), "" | "none" | "keep")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjust::{Direction, Magnitude, ScaleSign};
    use crate::category::{PartCategory, Side};

    #[test]
    fn parses_fenced_response_with_sides() {
        let text = r#"Here is my assessment:
```json
{
  "comparison_analysis": {"similarity_score": 0.72, "main_differences": ["eyes too high"]},
  "adjustments": {
    "eyebrow": {"position": "down_slight", "reason": "closer to the eyes"},
    "eye.left": {"scale": "bigger"}
  },
  "satisfied": false,
  "notes": "minor tweaks"
}
```
"#;
        let result = parse_response(text).unwrap();
        assert!(!result.converged);
        assert_eq!(result.similarity, Some(0.72));
        assert_eq!(result.notes.as_deref(), Some("minor tweaks"));
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.contains(&TargetedStep::new(
            PartTarget::category(PartCategory::Eyebrow),
            AdjustmentStep::moved(Direction::Down, Magnitude::Slight),
        )));
        assert!(result.steps.contains(&TargetedStep::new(
            PartTarget::side(PartCategory::Eye, Side::Left),
            AdjustmentStep::rescaled(ScaleSign::Bigger, Magnitude::Normal),
        )));
    }

    #[test]
    fn bare_json_and_converged_alias() {
        let result = parse_response(r#"{"adjustments": {}, "converged": true}"#).unwrap();
        assert!(result.converged);
        assert!(result.steps.is_empty());
    }

    #[test]
    fn position_and_scale_in_one_entry() {
        let result = parse_response(
            r#"{"adjustments": {"mouth": {"position": "up", "scale": "smaller_slight"}}, "satisfied": false}"#,
        )
        .unwrap();
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.iter().all(|s| s.target.category == PartCategory::Mouth));
    }

    #[test]
    fn empty_tokens_are_ignored() {
        let result = parse_response(
            r#"{"adjustments": {"nose": {"position": "", "scale": "none"}}, "satisfied": false}"#,
        )
        .unwrap();
        assert!(result.steps.is_empty());
    }

    #[test]
    fn rejects_malformed_documents() {
        for text in [
            "no json here",
            r#"{"adjustments": {}}"#,
            r#"{"satisfied": false}"#,
            r#"{"adjustments": [], "satisfied": false}"#,
            r#"{"adjustments": {"tail": {"position": "up"}}, "satisfied": false}"#,
            r#"{"adjustments": {"eye": {"position": "sideways"}}, "satisfied": false}"#,
            r#"{"adjustments": {"nose.left": {"position": "up"}}, "satisfied": false}"#,
            r#"{"adjustments": {}, "satisfied": "yes"}"#,
        ] {
            assert!(
                matches!(parse_response(text), Err(FeedbackError::Parse(_))),
                "accepted: {text}"
            );
        }
    }
}
