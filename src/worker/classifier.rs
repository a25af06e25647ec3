//! The classifier: a schema-mode pre-processing worker with no tools.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::instrument::{Instrument, InstrumentKind, ASSET_CLASSES, REGIONS, SECTORS};
use crate::llm::{ChatMessage, ModelLoop};

/// Runs the classifier in schema mode for one instrument and returns the
/// allocation triple it produced. The caller (the orchestrator) is
/// responsible for upserting the result into the instrument store — the
/// classifier itself never writes to any store.
pub async fn run_classifier(
    model_loop: &ModelLoop,
    symbol: &str,
    display_name: &str,
    kind: InstrumentKind,
) -> Result<Instrument, WorkerError> {
    let cancel = CancellationToken::new();

    let instructions = "You are a financial instrument classifier. Given a symbol and its \
         display name, produce an allocation across asset class, region, and sector. Each of \
         the three allocations must sum to 100 and use only the provided vocabulary keys."
        .to_string();

    let seed = format!(
        "Classify the instrument with symbol \"{symbol}\", display name \"{display_name}\".\n\
         Allowed asset classes: {}\nAllowed regions: {}\nAllowed sectors: {}",
        ASSET_CLASSES.join(", "),
        REGIONS.join(", "),
        SECTORS.join(", "),
    );

    let schema = classification_schema();
    let messages = vec![ChatMessage::system(instructions), ChatMessage::user(seed)];

    let value = model_loop
        .run_schema(messages, schema, &cancel)
        .await
        .map_err(WorkerError::Llm)?;

    parse_classification(symbol, display_name, kind, value)
}

fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "asset_class_allocation": {
                "type": "object",
                "properties": ASSET_CLASSES.iter().map(|c| (c.to_string(), serde_json::json!({"type": "number"}))).collect::<serde_json::Map<_, _>>(),
            },
            "region_allocation": {
                "type": "object",
                "properties": REGIONS.iter().map(|c| (c.to_string(), serde_json::json!({"type": "number"}))).collect::<serde_json::Map<_, _>>(),
            },
            "sector_allocation": {
                "type": "object",
                "properties": SECTORS.iter().map(|c| (c.to_string(), serde_json::json!({"type": "number"}))).collect::<serde_json::Map<_, _>>(),
            }
        },
        "required": ["asset_class_allocation", "region_allocation", "sector_allocation"]
    })
}

fn parse_classification(
    symbol: &str,
    display_name: &str,
    kind: InstrumentKind,
    value: serde_json::Value,
) -> Result<Instrument, WorkerError> {
    let parse_map = |field: &str| -> Result<std::collections::BTreeMap<String, f64>, WorkerError> {
        value
            .get(field)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .ok_or_else(|| {
                WorkerError::Llm(crate::error::LlmError::InvalidResponse {
                    provider: "classifier".to_string(),
                    reason: format!("missing or malformed '{field}'"),
                })
            })
    };

    Ok(Instrument {
        symbol: symbol.to_string(),
        display_name: display_name.to_string(),
        kind,
        asset_class_allocation: parse_map("asset_class_allocation")?,
        region_allocation: parse_map("region_allocation")?,
        sector_allocation: parse_map("sector_allocation")?,
        updated_at: chrono::Utc::now(),
    })
}

/// Runs the classifier for every missing symbol with bounded parallelism.
/// Individual classifier failures are recorded but non-fatal; the caller
/// proceeds with whatever was successfully classified.
pub async fn classify_missing(
    model_loop: Arc<ModelLoop>,
    missing: Vec<(String, String, InstrumentKind)>,
    parallelism: usize,
) -> Vec<Result<Instrument, WorkerError>> {
    use futures::stream::{self, StreamExt};

    stream::iter(missing)
        .map(|(symbol, display_name, kind)| {
            let model_loop = model_loop.clone();
            async move { run_classifier(&model_loop, &symbol, &display_name, kind).await }
        })
        .buffer_unordered(parallelism)
        .collect()
        .await
}
