use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::ModelCatalogPort;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::ModelId;

#[derive(Default)]
pub struct OnnxModelCatalog;

impl OnnxModelCatalog {
    pub fn new() -> Self { Self }
}

#[async_trait]
impl ModelCatalogPort for OnnxModelCatalog {
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()> {
        if model.onnx_path.trim().is_empty() {
            return Err(DomainError::InvalidInput("onnx_path empty".into()));
        }
        let path = Path::new(&model.onnx_path);
        if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            return Err(DomainError::InvalidInput(format!("not an .onnx file: {}", model.onnx_path)));
        }
        if !path.exists() {
            return Err(DomainError::NotFound(format!("model file not found: {}", model.onnx_path)));
        }
        Ok(())
    }

    async fn load_model(&self, model: &ModelId) -> DomainResult<Vec<u8>> {
        self.validate_model(model).await?;
        let bytes = tokio::fs::read(&model.onnx_path)
            .await
            .map_err(|e| DomainError::OperationFailed(format!("reading {}: {e}", model.onnx_path)))?;
        tracing::info!(model = %model.name, path = %model.onnx_path, bytes = bytes.len(), "Model loaded");
        Ok(bytes)
    }
}
