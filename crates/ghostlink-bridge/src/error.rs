use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Fatal lookup and storage failures. Soft failures (a profile write the
/// local side rejected, a cleanup step during teardown) are logged where they
/// happen and never surface as a `BridgeError`.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to query {kind} {id}")]
    Query {
        kind: &'static str,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to insert new {kind} {id}")]
    Insert {
        kind: &'static str,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to save {kind} {id}")]
    Save {
        kind: &'static str,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("user login {0} is not in portal {1}")]
    NotInPortal(String, String),
}

impl BridgeError {
    pub(crate) fn query(kind: &'static str, id: impl ToString, source: anyhow::Error) -> Self {
        Self::Query {
            kind,
            id: id.to_string(),
            source,
        }
    }

    pub(crate) fn insert(kind: &'static str, id: impl ToString, source: anyhow::Error) -> Self {
        Self::Insert {
            kind,
            id: id.to_string(),
            source,
        }
    }

    pub(crate) fn save(kind: &'static str, id: impl ToString, source: anyhow::Error) -> Self {
        Self::Save {
            kind,
            id: id.to_string(),
            source,
        }
    }
}
