use crate::{dex::raydium::amm::AccountRole, sniper::PositionHandle};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a descriptor could not be assembled from an instruction's account list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingFault {
    /// The instruction addresses fewer accounts than the layout references.
    #[error("need {required} account indices, got {actual}")]
    TooFewIndices { required: usize, actual: usize },
    /// The index points past the transaction's static account keys, which
    /// happens for accounts loaded through an address lookup table.
    #[error("{role:?} points at unresolved account index {index}")]
    UnresolvedKey { role: AccountRole, index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SniperError {
    #[error("Malformed instruction: {0}")]
    MalformedInstruction(String),

    #[error("Account mapping error: {0}")]
    AccountMapping(MappingFault),

    #[error("Invalid {field} address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("Insufficient balance. Required: {required}, Available: {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Execution failed during {stage}: {source}")]
    Execution {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Position {0} not found")]
    PositionNotFound(PositionHandle),
}

impl SniperError {
    pub fn execution(stage: &'static str, cause: anyhow::Error) -> Self {
        SniperError::Execution {
            stage,
            source: cause.into(),
        }
    }

    /// Lookup-table backed accounts show up routinely for unrelated
    /// instructions that match the log filter; they are not worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SniperError::AccountMapping(MappingFault::UnresolvedKey { .. })
        )
    }
}
