use std::time::Instant;

use async_trait::async_trait;

use crate::job::SlotValue;

use super::{require_f64_array, require_str, require_str_array, Tool, ToolContext, ToolError, ToolOutput};

/// `create_chart(title, description, chart_type, names[], values[], colors[])`.
///
/// Validates list lengths and colour format, derives the chart key from the
/// (normalised) title, computes percentages from the raw values, and merges
/// the result into the `charts` slot.
pub struct CreateChartTool;

#[async_trait]
impl Tool for CreateChartTool {
    fn name(&self) -> &str {
        "create_chart"
    }

    fn description(&self) -> &str {
        "Create a chart describing part of the portfolio. Provide parallel lists of names, \
         values, and hex colours; percentages are computed automatically."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "description": { "type": "string" },
                "chart_type": { "type": "string", "enum": ["pie", "bar", "donut", "horizontalBar"] },
                "names": { "type": "array", "items": { "type": "string" } },
                "values": { "type": "array", "items": { "type": "number" } },
                "colors": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["title", "description", "chart_type", "names", "values", "colors"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();

        let title = require_str(&params, "title")?;
        let description = require_str(&params, "description")?;
        let chart_type = require_str(&params, "chart_type")?;
        let names = require_str_array(&params, "names")?;
        let values = require_f64_array(&params, "values")?;
        let colors = require_str_array(&params, "colors")?;

        if names.len() != values.len() || names.len() != colors.len() {
            return Err(ToolError::InvalidParameters(format!(
                "names ({}), values ({}), and colors ({}) must have equal length",
                names.len(),
                values.len(),
                colors.len()
            )));
        }
        if names.is_empty() {
            return Err(ToolError::InvalidParameters(
                "a chart needs at least one entry".to_string(),
            ));
        }
        for color in &colors {
            if !is_hex_color(color) {
                return Err(ToolError::InvalidParameters(format!(
                    "invalid colour format: {color}"
                )));
            }
        }
        if values.iter().any(|v| *v < 0.0) {
            return Err(ToolError::InvalidParameters(
                "values must be non-negative".to_string(),
            ));
        }

        let total: f64 = values.iter().sum();
        let percentages: Vec<f64> = if total > 0.0 {
            values.iter().map(|v| v / total * 100.0).collect()
        } else {
            vec![0.0; values.len()]
        };

        let key = normalize_chart_key(title);

        let descriptor = serde_json::json!({
            "title": title,
            "description": description,
            "chart_type": chart_type,
            "names": names,
            "values": values,
            "colors": colors,
            "percentages": percentages,
        });

        let mut merge = serde_json::Map::new();
        merge.insert(key.clone(), descriptor);

        ctx.job_store
            .set_slot(ctx.job_id, SlotValue::Charts(merge))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::text(
            format!("chart '{key}' committed"),
            started.elapsed(),
        ))
    }
}

/// Normalise a chart title into a stable, lowercase snake_case key.
fn normalize_chart_key(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    let mut last_was_sep = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            key.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !key.is_empty() {
            key.push('_');
            last_was_sep = true;
        }
    }
    while key.ends_with('_') {
        key.pop();
    }
    key
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mixed_case_and_punctuation() {
        assert_eq!(normalize_chart_key("Asset Class Breakdown"), "asset_class_breakdown");
        assert_eq!(normalize_chart_key("Region (2026)"), "region_2026");
    }

    #[test]
    fn hex_color_validation_requires_exactly_6_digits() {
        assert!(is_hex_color("#ABCDEF"));
        assert!(!is_hex_color("#fff"));
        assert!(!is_hex_color("ABCDEF"));
        assert!(!is_hex_color("#zzzzzz"));
    }

    #[test]
    fn percentages_sum_to_100_for_positive_values() {
        let values = vec![25.0, 25.0, 50.0];
        let total: f64 = values.iter().sum();
        let pct: Vec<f64> = values.iter().map(|v| v / total * 100.0).collect();
        let sum: f64 = pct.iter().sum();
        assert!((sum - 100.0).abs() < 0.01);
    }
}
