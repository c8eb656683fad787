//! Typed view of the `outputs` section of a ComfyUI history entry.
//!
//! ```text
//! { "<prompt_id>": { "outputs": { "<node_id>": { "images": [ {filename, subfolder, type} ] } } } }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

/// Raw `outputs` mapping keyed by node ID.
pub type Outputs = Map<String, Value>;

/// One image reported by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    /// Sub-directory of the output root; empty for the root itself.
    #[serde(default)]
    pub subfolder: String,
    /// `output` or `temp`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<OutputImage>,
}

/// The populated `outputs` of `prompt_id`, if its entry is present.
///
/// An entry with a missing or empty `outputs` object is not complete.
pub fn completed_outputs(history: &Value, prompt_id: &str) -> Option<Outputs> {
    history
        .get(prompt_id)?
        .get("outputs")?
        .as_object()
        .filter(|outputs| !outputs.is_empty())
        .cloned()
}

/// Every image listed in `outputs`, in the order the engine reported the
/// nodes.
///
/// Nodes whose output does not follow the `{images: [...]}` shape (text,
/// latents, custom nodes) are skipped.
pub fn output_images(outputs: &Outputs) -> Vec<OutputImage> {
    outputs
        .values()
        .filter_map(|node| serde_json::from_value::<NodeOutput>(node.clone()).ok())
        .flat_map(|node| node.images)
        .collect()
}
