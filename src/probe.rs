//! Broker process probes
//!
//! A probe answers one question: is the named process or service running? The
//! platform-specific implementation is chosen by the caller; the health monitor only
//! ever sees `Arc<dyn ProcessProbe>`.

use crate::config::ProbeKind;
use std::process::Command;
use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;
use tracing::debug;

/// Process probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Checks whether a process or service exists
pub trait ProcessProbe: Send + Sync {
    /// True when `name` is running; errors mean the state is unknown
    fn is_running(&self, name: &str) -> Result<bool, ProbeError>;

    /// Short name for logs
    fn probe_name(&self) -> &str;
}

/// `systemctl is-active <name>`
#[derive(Debug, Default, Clone)]
pub struct SystemdProbe;

impl SystemdProbe {
    /// Interpret `systemctl is-active` output (pure function)
    pub fn parse_is_active(stdout: &str) -> bool {
        stdout.trim() == "active"
    }
}

impl ProcessProbe for SystemdProbe {
    fn is_running(&self, name: &str) -> Result<bool, ProbeError> {
        let output = Command::new("systemctl")
            .args(["is-active", name])
            .output()
            .map_err(|e| ProbeError::CommandFailed {
                command: format!("systemctl is-active {name}"),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(service = %name, state = %stdout.trim(), "systemctl is-active");

        // Non-zero exit just means "not active"; only a missing systemctl is an error
        Ok(Self::parse_is_active(&stdout))
    }

    fn probe_name(&self) -> &str {
        "systemd"
    }
}

/// OS process table lookup by executable name
#[derive(Debug, Default, Clone)]
pub struct ProcessTableProbe;

impl ProcessTableProbe {
    /// Case-insensitive match that also accepts a `.exe` suffix (pure function)
    pub fn name_matches(process_name: &str, wanted: &str) -> bool {
        let process_name = process_name.to_ascii_lowercase();
        let wanted = wanted.to_ascii_lowercase();
        process_name == wanted || process_name == format!("{wanted}.exe")
    }
}

impl ProcessProbe for ProcessTableProbe {
    fn is_running(&self, name: &str) -> Result<bool, ProbeError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let found = system
            .processes()
            .values()
            .any(|process| Self::name_matches(&process.name().to_string_lossy(), name));

        debug!(process = %name, found, "Process table lookup");
        Ok(found)
    }

    fn probe_name(&self) -> &str {
        "process_table"
    }
}

/// Build the probe selected in configuration
pub fn probe_for(kind: ProbeKind) -> Arc<dyn ProcessProbe> {
    match kind {
        ProbeKind::Systemd => Arc::new(SystemdProbe),
        ProbeKind::ProcessTable => Arc::new(ProcessTableProbe),
        ProbeKind::Auto if cfg!(target_os = "linux") => Arc::new(SystemdProbe),
        ProbeKind::Auto => Arc::new(ProcessTableProbe),
    }
}
