//! State export/import and on-disk snapshots.
//!
//! The whole document store serializes to one JSON object, used for backups,
//! moving a running instance, and restoring state after a restart.

use super::AppState;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Schema version for export format compatibility
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// A serializable snapshot of every collection.
///
/// Drafts, the change feed and the LLM manager are runtime-only and excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateExport {
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    pub users: HashMap<UserId, User>,
    pub debates: HashMap<DebateId, Debate>,
    #[serde(default)]
    pub arguments: HashMap<ArgumentId, Argument>,
    #[serde(default)]
    pub analyses: HashMap<AnalysisId, AiAnalysis>,
}

impl StateExport {
    /// Validate references before import
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > EXPORT_SCHEMA_VERSION {
            return Err(format!(
                "Export schema version {} is newer than supported version {}. \
                 Please update the server.",
                self.schema_version, EXPORT_SCHEMA_VERSION
            ));
        }

        for (id, debate) in &self.debates {
            for user in std::iter::once(&debate.creator_id).chain(debate.opponent_id.iter()) {
                if !self.users.contains_key(user) {
                    return Err(format!(
                        "Debate '{}' references user '{}' which doesn't exist",
                        id, user
                    ));
                }
            }
        }

        for (id, arg) in &self.arguments {
            if !self.debates.contains_key(&arg.debate_id) {
                return Err(format!(
                    "Argument '{}' references debate '{}' which doesn't exist",
                    id, arg.debate_id
                ));
            }
        }

        for (id, analysis) in &self.analyses {
            if !self.arguments.contains_key(&analysis.argument_id) {
                return Err(format!(
                    "Analysis '{}' references argument '{}' which doesn't exist",
                    id, analysis.argument_id
                ));
            }
        }

        Ok(())
    }
}

impl AppState {
    pub async fn export_state(&self) -> StateExport {
        StateExport {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            users: self.users.read().await.clone(),
            debates: self.debates.read().await.clone(),
            arguments: self.arguments.read().await.clone(),
            analyses: self.analyses.read().await.clone(),
        }
    }

    /// Replace all collections with the snapshot and notify subscribers
    pub async fn import_state(&self, export: StateExport) -> Result<(), String> {
        export.validate()?;

        let debates: Vec<Debate> = export.debates.values().cloned().collect();
        *self.users.write().await = export.users;
        *self.debates.write().await = export.debates;
        *self.arguments.write().await = export.arguments;
        *self.analyses.write().await = export.analyses;
        self.drafts.write().await.clear();

        tracing::info!("Imported state with {} debates", debates.len());
        for debate in &debates {
            self.publish_debate(debate);
        }
        Ok(())
    }

    /// Write the current state to `path`, replacing it atomically
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), String> {
        let export = self.export_state().await;
        let json = serde_json::to_vec_pretty(&export).map_err(|e| e.to_string())?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| format!("write {}: {}", tmp.display(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| format!("rename to {}: {}", path.display(), e))?;
        tracing::debug!("Snapshot written to {}", path.display());
        Ok(())
    }

    /// Restore state from `path`. Returns false if there is no snapshot yet.
    ///
    /// A snapshot that cannot be decoded or imported is renamed to
    /// `<name>.corrupt` so the periodic writer cannot overwrite it.
    pub async fn load_snapshot(&self, path: &Path) -> Result<bool, String> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(format!("read {}: {}", path.display(), e)),
        };

        let imported = match serde_json::from_slice::<StateExport>(&bytes) {
            Ok(export) => self.import_state(export).await,
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = imported {
            let aside = path.with_extension("corrupt");
            tokio::fs::rename(path, &aside)
                .await
                .map_err(|re| format!("{}; also failed to move it aside: {}", e, re))?;
            tracing::warn!("Unreadable snapshot moved to {}", aside.display());
            return Err(format!("{} (moved to {})", e, aside.display()));
        }
        Ok(true)
    }
}
