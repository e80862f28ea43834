use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// One paraphrase/template variant of the elicitation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub system: String,
    pub user: String,
    /// Stable content hash of `system` + `user`, used for rotation offset
    /// derivation and cache-key construction.
    pub hash: String,
}

/// The full set of templates a sampler draws from for one lens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBundle {
    pub lens: String,
    pub templates: Vec<PromptTemplate>,
}

impl PromptBundle {
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.templates.is_empty() {
            return Err(TypesError::EmptyPromptBundle {
                lens: self.lens.clone(),
            });
        }
        Ok(())
    }
}
