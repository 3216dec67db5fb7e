use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic identifier for one layer merge (silver or gold) of one series.
///
/// Derived from the inputs that drove the merge rather than the wall clock,
/// so reprocessing the same inputs writes the same lineage column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRunId(pub String);

impl LayerRunId {
    pub fn derive(layer: &str, series_id: &str, inputs: &[String]) -> Self {
        use serde_json::json;

        let canonical = json!({
            "inputs": inputs,
            "layer": layer,
            "series_id": series_id,
        });
        let hash = blake3::hash(canonical.to_string().as_bytes());
        let hex = hash.to_hex();
        Self(format!("{layer}-{}", &hex.as_str()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
