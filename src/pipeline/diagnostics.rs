//! Durable diagnostic artifacts
//!
//! One file per failed component, named deterministically from the
//! component id and device serial. Operators read these; the pipeline
//! never does.

use crate::error::Error;
use crate::template::Component;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes per-failure diagnostic files into one artifact directory
pub struct DiagnosticWriter {
    dir: PathBuf,
}

impl DiagnosticWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact path for a component/device pair
    pub fn artifact_path(&self, component_id: &str, serial: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.diag", sanitize(component_id), sanitize(serial)))
    }

    /// Persist the failure. Diagnostics must never take a worker down, so
    /// write problems are logged and swallowed; the returned path is `None`
    /// when nothing was written.
    pub fn write(&self, component: &Component, attempts: u32, error: &Error) -> Option<PathBuf> {
        let path = self.artifact_path(component.id.as_str(), &component.certificate.serial);

        let body = format!(
            "time: {}\ncomponent: {}\nname: {}\nkind: {}\nserial: {}\nattempts: {}\nerror: {}\ndetail: {:?}\n",
            Utc::now().to_rfc3339(),
            component.id,
            component.name,
            component.kind,
            component.certificate.serial,
            attempts,
            error,
            error,
        );

        let written = std::fs::create_dir_all(&self.dir)
            .and_then(|_| std::fs::write(&path, body));

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(
                    component = %component.id,
                    path = %path.display(),
                    error = %e,
                    "Failed to write diagnostic artifact"
                );
                None
            }
        }
    }
}

/// Keep artifact names filesystem-safe
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ComponentStatus, ComponentType, DeviceCertificate};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn component() -> Component {
        Component {
            id: "srv-1".into(),
            name: "compute-a".into(),
            kind: ComponentType::Server,
            certificate: DeviceCertificate::new("SN/01 weird"),
            related: BTreeSet::new(),
            teardown: false,
            brownfield: false,
            resources: json!({}),
            status: ComponentStatus::Error,
        }
    }

    #[test]
    fn test_artifact_is_written_and_named_deterministically() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = DiagnosticWriter::new(tmp.path());

        let error = Error::Internal("agent rpc reset".into());
        let path = writer.write(&component(), 3, &error).unwrap();

        assert_eq!(path, writer.artifact_path("srv-1", "SN/01 weird"));
        assert_eq!(path.file_name().unwrap(), "srv-1-SN_01_weird.diag");

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("component: srv-1"));
        assert!(body.contains("attempts: 3"));
        assert!(body.contains("agent rpc reset"));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        // A file where the directory should be makes create_dir_all fail.
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, b"file").unwrap();

        let writer = DiagnosticWriter::new(&blocker);
        let error = Error::Internal("x".into());
        assert!(writer.write(&component(), 1, &error).is_none());
    }
}
