use thiserror::Error;

/// Errors raised while constructing or validating core data-model values.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("claim text is empty")]
    EmptyClaim,

    #[error("claim text exceeds {max} bytes (got {actual})")]
    ClaimTooLong { max: usize, actual: usize },

    #[error("run config field `{field}` is invalid: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("prompt bundle has no templates for lens `{lens}`")]
    EmptyPromptBundle { lens: String },

    #[error("rendered prompt of {actual} chars exceeds the configured limit of {max} chars")]
    PromptTooLong { max: usize, actual: usize },
}
