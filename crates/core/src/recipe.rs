//! Generation recipes (ComfyUI API-format workflows).
//!
//! A recipe is a JSON object mapping node IDs to `{class_type, inputs}`
//! descriptors. It is either embedded in the job payload or loaded from a
//! local file chosen statically or from the job's [`GenerationParams`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::job::{GenerationParams, JobRequest};

/// Node class that reads an image from the engine's input directory.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Input field of [`LOAD_IMAGE_CLASS`] nodes holding the filename.
const LOAD_IMAGE_INPUT: &str = "image";

/// Errors raised while resolving or loading a recipe.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("Failed to read workflow file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow file {0} must contain a JSON object")]
    NotAnObject(PathBuf),

    #[error("Missing 'params' parameter")]
    MissingParams,
}

/// Where file-based recipes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeSource {
    /// A single recipe file used for every job.
    Static(PathBuf),
    /// A directory of recipes, one per tiling/denoise combination.
    ByParams(PathBuf),
}

/// A recipe owned by one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GenerationRecipe(Map<String, Value>);

impl GenerationRecipe {
    pub fn from_map(nodes: Map<String, Value>) -> Self {
        Self(nodes)
    }

    /// Read and parse a recipe file.
    pub async fn load(path: &Path) -> Result<Self, RecipeError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| RecipeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| RecipeError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(nodes) => Ok(Self(nodes)),
            _ => Err(RecipeError::NotAnObject(path.to_path_buf())),
        }
    }

    /// Number of nodes in the recipe.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Point every image-loading node at `filename`.
    ///
    /// Returns the number of nodes that were updated.
    pub fn inject_input_image(&mut self, filename: &str) -> usize {
        let mut updated = 0;
        for node in self.0.values_mut() {
            let is_loader = node.get("class_type").and_then(Value::as_str) == Some(LOAD_IMAGE_CLASS);
            if !is_loader {
                continue;
            }
            let Some(node) = node.as_object_mut() else {
                continue;
            };
            let inputs = node
                .entry("inputs")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(inputs) = inputs.as_object_mut() {
                inputs.insert(
                    LOAD_IMAGE_INPUT.to_string(),
                    Value::String(filename.to_string()),
                );
                updated += 1;
            }
        }
        updated
    }
}

/// Recipe file for a tiling/denoise combination inside `dir`.
pub fn recipe_path_for_params(dir: &Path, params: &GenerationParams) -> PathBuf {
    dir.join(format!(
        "workflow_t{}_d{}.json",
        params.tiling,
        params.denoise.as_str()
    ))
}

/// Pick the recipe for a validated request.
///
/// An embedded `workflow` always wins; otherwise the file named by
/// `source` is loaded.
pub async fn resolve_recipe(
    request: &JobRequest,
    source: &RecipeSource,
) -> Result<GenerationRecipe, RecipeError> {
    if let Some(workflow) = &request.workflow {
        return Ok(GenerationRecipe::from_map(workflow.clone()));
    }

    let path = match source {
        RecipeSource::Static(path) => path.clone(),
        RecipeSource::ByParams(dir) => {
            let params = request.params.as_ref().ok_or(RecipeError::MissingParams)?;
            recipe_path_for_params(dir, params)
        }
    };

    tracing::debug!(path = %path.display(), "Loading workflow file");
    GenerationRecipe::load(&path).await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::job::Denoise;

    fn sample_recipe() -> GenerationRecipe {
        let value = json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
            "3": {"class_type": "KSampler", "inputs": {"seed": 42}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["3", 0]}},
        });
        match value {
            Value::Object(map) => GenerationRecipe::from_map(map),
            _ => unreachable!(),
        }
    }

    fn request(workflow: Option<Map<String, Value>>, params: Option<GenerationParams>) -> JobRequest {
        JobRequest {
            source_asset_url: None,
            destination_url: "http://tus/files".into(),
            params,
            workflow,
        }
    }

    #[test]
    fn inject_updates_only_load_image_nodes() {
        let mut recipe = sample_recipe();
        assert_eq!(recipe.inject_input_image("abc.png"), 1);
        assert_eq!(recipe.node("1").unwrap()["inputs"]["image"], "abc.png");
        assert_eq!(recipe.node("3").unwrap()["inputs"], json!({"seed": 42}));
    }

    #[test]
    fn inject_creates_missing_inputs() {
        let mut recipe = GenerationRecipe::from_map(
            json!({"7": {"class_type": "LoadImage"}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(recipe.inject_input_image("x.jpg"), 1);
        assert_eq!(recipe.node("7").unwrap()["inputs"]["image"], "x.jpg");
    }

    #[test]
    fn inject_without_loader_is_a_no_op() {
        let mut recipe = GenerationRecipe::from_map(
            json!({"3": {"class_type": "KSampler", "inputs": {}}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(recipe.inject_input_image("x.jpg"), 0);
    }

    #[test]
    fn params_select_recipe_file() {
        let params = GenerationParams {
            tiling: 3,
            denoise: Denoise::High,
        };
        let path = recipe_path_for_params(Path::new("/workflows"), &params);
        assert_eq!(path, PathBuf::from("/workflows/workflow_t3_d0.6.json"));
    }

    #[test]
    fn recipe_serializes_as_plain_object() {
        let recipe = sample_recipe();
        let value = serde_json::to_value(&recipe).unwrap();
        assert_eq!(value["3"]["class_type"], "KSampler");
    }

    #[tokio::test]
    async fn resolve_prefers_embedded_workflow() {
        let embedded = json!({"5": {"class_type": "KSampler", "inputs": {}}});
        let req = request(embedded.as_object().cloned(), None);
        let recipe = resolve_recipe(&req, &RecipeSource::Static("/does/not/exist.json".into()))
            .await
            .unwrap();
        assert_eq!(recipe.len(), 1);
    }

    #[tokio::test]
    async fn resolve_loads_param_selected_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let params = GenerationParams {
            tiling: 2,
            denoise: Denoise::Low,
        };
        let path = recipe_path_for_params(dir.path(), &params);
        std::fs::write(&path, r#"{"1": {"class_type": "LoadImage", "inputs": {}}}"#).unwrap();

        let req = request(None, Some(params));
        let recipe = resolve_recipe(&req, &RecipeSource::ByParams(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert!(recipe.node("1").is_some());
    }

    #[tokio::test]
    async fn resolve_by_params_without_params_fails() {
        let req = request(None, None);
        let err = resolve_recipe(&req, &RecipeSource::ByParams("/workflows".into()))
            .await
            .unwrap_err();
        assert_matches!(err, RecipeError::MissingParams);
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = GenerationRecipe::load(Path::new("/nonexistent/workflow.json"))
            .await
            .unwrap_err();
        assert_matches!(err, RecipeError::Io { .. });
        assert!(err.to_string().contains("/nonexistent/workflow.json"));
    }

    #[tokio::test]
    async fn load_rejects_non_object_json() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("list.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert_matches!(
            GenerationRecipe::load(&path).await,
            Err(RecipeError::NotAnObject(_))
        );

        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(
            GenerationRecipe::load(&path).await,
            Err(RecipeError::Parse { .. })
        );
    }
}
