use std::path::{Path, PathBuf};

use tracing::info;

use crate::domains::transition::FinalizedTransition;
use crate::error::{LedgerError, Result};

/// Path a transaction exports to under `directory`.
pub fn export_path(directory: &Path, finalized: &FinalizedTransition) -> PathBuf {
    let name = format!("transaction-{}", finalized.id);
    directory.join(&name).join(format!("{name}.json"))
}

/// Writes `finalized` as pretty JSON, replacing any earlier export of the
/// same transaction, and returns the file written.
pub fn export_transaction(finalized: &FinalizedTransition, directory: &Path) -> Result<PathBuf> {
    let path = export_path(directory, finalized);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LedgerError::Runtime(e.to_string()))?;
    }
    let encoded = serde_json::to_vec_pretty(finalized)
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
    std::fs::write(&path, encoded).map_err(|e| LedgerError::Runtime(e.to_string()))?;
    info!("Exported transaction {} to {}", finalized.id, path.display());
    Ok(path)
}
