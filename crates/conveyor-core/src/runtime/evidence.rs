// crates/conveyor-core/src/runtime/evidence.rs
// ============================================================================
// Module: Conveyor Evidence Writer
// Description: Atomic evidence artifact emission per tool run.
// Purpose: Write run reports, manifests, and self-hashes without torn reads.
// Dependencies: crate::core, rand, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every run directory receives `run_report_v1.json`, an
//! `evidence_manifest_v1.json` listing each artifact's on-disk SHA-256 and
//! byte count, and a `manifest_self_hash_v1.json` over the manifest bytes.
//! Writes go through a same-directory temp file and a rename so readers never
//! observe half-written artifacts. A run directory has one successful writer
//! unless the overwrite override is set; on manifest failure the report is
//! rolled back only when its on-disk bytes still hash to what this writer
//! produced.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::RunId;
use crate::core::RunReport;
use crate::core::StableCode;
use crate::core::Timestamp;
use crate::core::sha256_hex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Run report artifact filename.
pub const RUN_REPORT_FILE: &str = "run_report_v1.json";
/// Evidence manifest artifact filename.
pub const EVIDENCE_MANIFEST_FILE: &str = "evidence_manifest_v1.json";
/// Manifest self-hash artifact filename.
pub const MANIFEST_SELF_HASH_FILE: &str = "manifest_self_hash_v1.json";
/// Tool guard-rejection debug artifact filename.
pub const TOOL_DEBUG_FILE: &str = "tool_debug_v1.json";
/// Readiness guard-rejection debug artifact filename.
pub const READINESS_DEBUG_FILE: &str = "readiness_debug_v1.json";
/// Dependency snapshot debug artifact filename.
pub const DEP_SNAPSHOT_FILE: &str = "dep_snapshot_v1.json";
/// Manifest check name stamped on guard-rejection evidence.
pub const SYSTEM_REJECTION_CHECK: &str = "system_rejection_evidence_ok";

// ============================================================================
// SECTION: Manifest Types
// ============================================================================

/// One artifact row of an evidence manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    /// Run-directory-relative artifact path.
    pub path: String,
    /// SHA-256 over the artifact's on-disk bytes.
    pub sha256: String,
    /// Artifact size in bytes.
    pub bytes: u64,
}

/// One check row of an evidence manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCheck {
    /// Check name.
    pub name: String,
    /// Whether the check passed.
    pub ok: bool,
    /// Stable reason codes for guard-rejection checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<StableCode>,
    /// Reference to the debug artifact carrying details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_ref: Option<String>,
}

impl ManifestCheck {
    /// Builds the guard-rejection check row.
    #[must_use]
    pub fn system_rejection(reason_codes: Vec<StableCode>, details_ref: &str) -> Self {
        Self {
            name: SYSTEM_REJECTION_CHECK.to_string(),
            ok: true,
            reason_codes,
            details_ref: Some(details_ref.to_string()),
        }
    }
}

/// Evidence manifest listing run artifacts and checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceManifest {
    /// Manifest schema version.
    pub version: String,
    /// Run the manifest belongs to.
    pub run_id: RunId,
    /// RFC 3339 generation time.
    pub as_of: String,
    /// Artifact rows in write order.
    pub artifacts: Vec<ManifestArtifact>,
    /// Check rows.
    pub checks: Vec<ManifestCheck>,
}

/// Self-hash record over the manifest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSelfHash {
    /// Lowercase hex SHA-256 of the manifest file bytes.
    pub value: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Evidence writer errors.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Filesystem failure.
    #[error("evidence io error at {path}: {detail}")]
    Io {
        /// Path the failure occurred at.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// Target artifact already exists and overwrite is not allowed.
    #[error("evidence target already exists: {path}")]
    TargetExists {
        /// Existing artifact path.
        path: PathBuf,
    },
    /// Artifact serialization failure.
    #[error("evidence serialization failed: {0}")]
    Serialization(String),
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Written evidence bundle description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceBundle {
    /// Run directory the bundle was written to.
    pub run_dir: PathBuf,
    /// Manifest as written.
    pub manifest: EvidenceManifest,
}

/// Atomic writer for per-run evidence directories.
pub struct EvidenceWriter {
    /// Base directory holding one subdirectory per run id.
    logs_dir: PathBuf,
    /// Whether an existing run artifact may be overwritten (last writer
    /// wins).
    allow_overwrite: bool,
}

impl EvidenceWriter {
    /// Creates a writer rooted at the given logs directory.
    #[must_use]
    pub fn new(logs_dir: PathBuf, allow_overwrite: bool) -> Self {
        Self {
            logs_dir,
            allow_overwrite,
        }
    }

    /// Returns the run directory for a run id.
    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.logs_dir.join(run_id.as_str())
    }

    /// Writes a full evidence bundle for a run.
    ///
    /// `debug_artifacts` are written before the manifest so the manifest can
    /// list them; `extra_checks` are appended after the standard hash check.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::TargetExists`] when a target artifact exists
    /// and overwrite is not allowed, and [`EvidenceError::Io`] on filesystem
    /// failure. A manifest failure rolls back this writer's report when its
    /// on-disk bytes are still untouched.
    pub fn write_run(
        &self,
        report: &RunReport,
        debug_artifacts: &[(String, Value)],
        extra_checks: Vec<ManifestCheck>,
        now: Timestamp,
    ) -> Result<EvidenceBundle, EvidenceError> {
        let run_dir = self.run_dir(&report.run_id);
        fs::create_dir_all(&run_dir).map_err(|err| EvidenceError::Io {
            path: run_dir.clone(),
            detail: err.to_string(),
        })?;

        let report_bytes = pretty_bytes(report)?;
        let report_hash = sha256_hex(&report_bytes);
        self.write_atomic(&run_dir, RUN_REPORT_FILE, &report_bytes)?;

        let mut artifact_names = vec![RUN_REPORT_FILE.to_string()];
        for (name, value) in debug_artifacts {
            let bytes = pretty_bytes(value)?;
            self.write_atomic(&run_dir, name, &bytes)?;
            artifact_names.push(name.clone());
        }

        let mut artifacts = Vec::with_capacity(artifact_names.len());
        for name in &artifact_names {
            artifacts.push(read_artifact_row(&run_dir, name)?);
        }

        let mut checks = vec![ManifestCheck {
            name: "artifact_hashes_ok".to_string(),
            ok: true,
            reason_codes: Vec::new(),
            details_ref: None,
        }];
        checks.extend(extra_checks);

        let manifest = EvidenceManifest {
            version: "v1".to_string(),
            run_id: report.run_id.clone(),
            as_of: now.to_rfc3339(),
            artifacts,
            checks,
        };
        let manifest_bytes = pretty_bytes(&manifest)?;
        if let Err(err) = self.write_atomic(&run_dir, EVIDENCE_MANIFEST_FILE, &manifest_bytes) {
            rollback_report(&run_dir, &report_hash);
            return Err(err);
        }

        let self_hash = ManifestSelfHash {
            value: sha256_hex(&manifest_bytes),
        };
        let self_hash_bytes = pretty_bytes(&self_hash)?;
        self.write_atomic(&run_dir, MANIFEST_SELF_HASH_FILE, &self_hash_bytes)?;

        Ok(EvidenceBundle {
            run_dir,
            manifest,
        })
    }

    /// Writes bytes to `dir/name` through a same-directory temp file.
    ///
    /// The temp file is consumed by the rename on success and removed
    /// best-effort on failure.
    fn write_atomic(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<(), EvidenceError> {
        let target = dir.join(name);
        if target.exists() && !self.allow_overwrite {
            return Err(EvidenceError::TargetExists {
                path: target,
            });
        }
        let suffix: u32 = rand::thread_rng().r#gen();
        let tmp = dir.join(format!("{name}.tmp.{}.{suffix:08x}", std::process::id()));
        let write_result = fs::File::create(&tmp)
            .and_then(|mut file| file.write_all(bytes))
            .map_err(|err| EvidenceError::Io {
                path: tmp.clone(),
                detail: err.to_string(),
            });
        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(EvidenceError::Io {
                path: target,
                detail: err.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes a value with stable 2-space indentation and a trailing newline.
fn pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EvidenceError> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|err| EvidenceError::Serialization(err.to_string()))?;
    text.push('\n');
    Ok(text.into_bytes())
}

/// Builds a manifest artifact row from on-disk bytes.
fn read_artifact_row(run_dir: &Path, name: &str) -> Result<ManifestArtifact, EvidenceError> {
    let path = run_dir.join(name);
    let bytes = fs::read(&path).map_err(|err| EvidenceError::Io {
        path: path.clone(),
        detail: err.to_string(),
    })?;
    Ok(ManifestArtifact {
        path: name.to_string(),
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Removes this writer's report after a manifest failure.
///
/// The report is deleted only when its on-disk bytes still hash to what this
/// writer produced, so another writer's artifact is never clobbered.
fn rollback_report(run_dir: &Path, written_hash: &str) {
    let path = run_dir.join(RUN_REPORT_FILE);
    let Ok(bytes) = fs::read(&path) else {
        return;
    };
    if sha256_hex(&bytes) == written_hash {
        let _ = fs::remove_file(&path);
    }
}
