// Storage errors callers may want to branch on.
//
// They travel inside anyhow::Error; use `err.downcast_ref::<StoreError>()`
// to tell a missing reference from a duplicate key.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} '{key}' does not exist")]
    NotFound { entity: &'static str, key: String },
    #[error("uniqueness violation on {entity}: {detail}")]
    Duplicate { entity: &'static str, detail: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> anyhow::Error {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
        .into()
    }

    pub fn duplicate(entity: &'static str, detail: impl ToString) -> anyhow::Error {
        StoreError::Duplicate {
            entity,
            detail: detail.to_string(),
        }
        .into()
    }
}

/// True when `err` is (or wraps) a `StoreError::Duplicate`.
pub fn is_duplicate(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Duplicate { .. })
    )
}

/// True when `err` is (or wraps) a `StoreError::NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { .. })
    )
}
