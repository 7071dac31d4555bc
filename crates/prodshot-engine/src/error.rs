use prodshot_contracts::products::ValidationErrors;
use thiserror::Error;

/// Failures callers branch on. Everything else travels as plain
/// `anyhow::Error` with context.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "failed to load model '{requested}' ({requested_error}); \
         fallback '{fallback}' also failed: {fallback_error}"
    )]
    BackendInit {
        requested: String,
        requested_error: String,
        fallback: String,
        fallback_error: String,
    },

    #[error("generation interrupted")]
    Interrupted,

    #[error(transparent)]
    InvalidProduct(#[from] ValidationErrors),
}

impl EngineError {
    pub fn is_interrupted(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Interrupted)
        )
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
