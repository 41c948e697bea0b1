//! Prompt construction and response parsing for the LLM assist

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{LlmError, LlmResult};

/// Instructions for measure/column decisions
pub const CLASSIFICATION_PROMPT: &str = r#"# ROLE
You classify Tableau calculated fields for a Power BI semantic model. Each field becomes either a
"measure" or a calculated "column".

# MEASURE
A field is a "measure" when its formula contains any of:
1. An aggregation: SUM, AVG, MIN, MAX, COUNT, COUNTD, DISTINCTCOUNT, ATTR, MEDIAN, STDEV, VAR.
2. A table calculation: TOTAL, WINDOW_*, RUNNING_*, LOOKUP, RANK, INDEX.
3. A level of detail expression: FIXED, INCLUDE, EXCLUDE.
4. A reference to another field that is a measure.
5. A reference to a parameter.

# COLUMN
A field is a "column" only when it is evaluated row by row: arithmetic on source columns,
string manipulation, or row-level IF/CASE logic, with no aggregation and no change of filter
context.

# OUTPUT
Return only a JSON array, no prose and no markdown:
[{"caption": "<caption exactly as given>", "type": "measure" | "column"}]

Do not invent or rename fields. When unsure, answer "measure"."#;

/// Instructions for DAX generation
pub const COMPILATION_PROMPT: &str = r#"# ROLE
You compile Tableau formulas into Power BI DAX expressions. Output must be deterministic and
ready to paste into a model.

# MEASURES ARE ALREADY AGGREGATES
Tableau: [Profit Ratio] = SUM([Profit]) / SUM([Sales])
DAX:     DIVIDE(SUM('Table'[Profit]), SUM('Table'[Sales]))
Any other formula using [Profit Ratio] must write the naked name [Profit Ratio].
Never write SUM([Profit Ratio]), AVERAGE([Profit Ratio]) or 'Table'[Profit Ratio].

# REFERENCES
| Field | DAX |
| source column | 'Table'[Column] |
| calculated column | 'Table'[Column] |
| measure | [Measure] |
| parameter bound to a measure | [Measure] |
| parameter bound to a column | SELECTEDVALUE('Table'[Column]) |

# INLINING
Inline the logic of referenced calculated columns so the result references only source
columns and measures. If inlining leads back to the field being compiled, use the underlying
source columns instead.

# SYNTAX
- DATEDIFF('day', a, b) -> DATEDIFF(a, b, DAY)
- {FIXED [Dim] : SUM([Val])} -> CALCULATE(SUM('Table'[Val]), ALLEXCEPT('Table', 'Table'[Dim]))
- a / b -> DIVIDE(a, b)
- ZN(x) -> COALESCE(x, 0)
- STR(x) -> FORMAT(x, "@")
- INT(x) -> TRUNC(x)

# INPUT
The user message is a JSON object with "metadata" (every field with its table, kind and type)
and "formulas" (the fields to compile).

# OUTPUT
Return only a JSON array, no prose and no markdown:
[{"caption": "<caption exactly as given>", "dax": "<expression>", "type": "measure" | "column"}]

Before answering, remove any aggregation wrapped around a measure and any table prefix in
front of a measure, and make sure quotes inside the DAX are escaped for JSON."#;

/// Classification answer for one field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeSuggestion {
    pub caption: String,
    #[serde(rename = "type")]
    pub powerbi_type: String,
}

/// DAX answer for one field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaxSuggestion {
    pub caption: String,
    pub dax: String,
    #[serde(rename = "type")]
    pub powerbi_type: String,
}

/// Parse a classification response
pub fn parse_type_response(response: &str) -> LlmResult<Vec<TypeSuggestion>> {
    parse_json_array(response)
}

/// Parse a compilation response
pub fn parse_dax_response(response: &str) -> LlmResult<Vec<DaxSuggestion>> {
    parse_json_array(response)
}

/// Parse a JSON array out of a model response
///
/// Accepts the array on its own, inside a markdown fence, or wrapped in an object whose only
/// array-valued member holds it (JSON-object response modes).
fn parse_json_array<T: DeserializeOwned>(response: &str) -> LlmResult<Vec<T>> {
    let json_str = extract_json(response);
    let value: Value = serde_json::from_str(&json_str)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => {
                    return Err(LlmError::InvalidResponse(
                        "expected a JSON array of fields".to_string(),
                    ));
                }
            }
        }
        _ => {
            return Err(LlmError::InvalidResponse(
                "expected a JSON array of fields".to_string(),
            ));
        }
    };

    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(LlmError::from))
        .collect()
}

/// Extract JSON from a response that might contain markdown or other text
fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    // Try to find JSON in code blocks
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            return trimmed[content_start..content_start + end]
                .trim()
                .to_string();
        }
    }

    // Try to find generic code blocks
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        // Skip language identifier if present
        let content_start = trimmed[content_start..]
            .find('\n')
            .map(|n| content_start + n + 1)
            .unwrap_or(content_start);
        if let Some(end) = trimmed[content_start..].find("```") {
            return trimmed[content_start..content_start + end]
                .trim()
                .to_string();
        }
    }

    // Whichever bracket opens first decides between an array and an object
    let open = trimmed.find(['[', '{']);
    if let Some(start) = open {
        let close = if trimmed[start..].starts_with('[') {
            ']'
        } else {
            '}'
        };
        if let Some(end) = trimmed.rfind(close) {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    // Return as-is
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_code_block() {
        let response = r#"Here are the types:
```json
[{"caption": "A", "type": "measure"}]
```
Done."#;
        assert_eq!(extract_json(response), r#"[{"caption": "A", "type": "measure"}]"#);
    }

    #[test]
    fn test_extract_json_bare_array_with_prose() {
        let response = r#"Sure: [{"caption": "A", "type": "column"}] hope that helps"#;
        assert_eq!(extract_json(response), r#"[{"caption": "A", "type": "column"}]"#);
    }

    #[test]
    fn test_parse_type_response() {
        let parsed = parse_type_response(
            r#"[{"caption": "Profit Ratio", "type": "measure"}, {"caption": "Full Name", "type": "column"}]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].powerbi_type, "column");
    }

    #[test]
    fn test_parse_wrapped_object() {
        let parsed = parse_dax_response(
            r#"{"fields": [{"caption": "M", "dax": "SUM('T'[x])", "type": "measure"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed[0].dax, "SUM('T'[x])");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_type_response("I could not decide"),
            Err(LlmError::ParseError(_))
        ));
        assert!(matches!(
            parse_type_response(r#"{"a": 1}"#),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(parse_dax_response(r#"[{"caption": "M"}]"#).is_err());
    }
}
