/// Operation audit log for the prestart hook
/// Records every privileged action as one JSON line so an operator can
/// reconstruct what a given invocation changed on the host.
use crate::config::types::HookError;
use crate::exec::pipeline::HookState;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Environment variable naming the audit file. Empty disables it.
pub const AUDIT_LOG_ENV: &str = "NPU_PRESTART_AUDIT_LOG";

pub const DEFAULT_AUDIT_LOG: &str = "/var/log/npu-prestart/operate.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    InvocationStart,
    ArgumentRejected,
    NamespaceEntered,
    MountInjected,
    CgroupRuleAdded,
    NamespaceRestored,
    RestoreFailed,
    InvocationSucceeded,
    InvocationFailed,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::InvocationStart => AuditSeverity::Low,
            AuditEventType::InvocationSucceeded => AuditSeverity::Low,
            AuditEventType::NamespaceEntered => AuditSeverity::Low,
            AuditEventType::NamespaceRestored => AuditSeverity::Low,

            // Host mutations
            AuditEventType::MountInjected => AuditSeverity::Medium,
            AuditEventType::CgroupRuleAdded => AuditSeverity::Medium,

            AuditEventType::ArgumentRejected => AuditSeverity::High,
            AuditEventType::InvocationFailed => AuditSeverity::High,

            // The hook process may be stranded in the container namespace
            AuditEventType::RestoreFailed => AuditSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub invocation_id: String,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub state: HookState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<&'static str>,
}

impl AuditEvent {
    pub fn with_error(mut self, err: &HookError) -> Self {
        self.error_category = Some(err.category());
        self
    }
}

/// Audit sink for one invocation. A disabled log still mirrors events to
/// the run log.
pub struct AuditLog {
    invocation_id: String,
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Open (append) the audit file, creating its directory if needed.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            invocation_id: Uuid::new_v4().to_string(),
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn disabled() -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
            file: None,
            path: None,
        }
    }

    /// Resolve the audit file from the environment. An unopenable file
    /// degrades to a disabled log instead of failing the hook.
    pub fn from_env() -> Self {
        let path = match std::env::var_os(AUDIT_LOG_ENV) {
            Some(value) if value.is_empty() => return Self::disabled(),
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(DEFAULT_AUDIT_LOG),
        };

        match Self::open(&path) {
            Ok(log) => log,
            Err(e) => {
                warn!(
                    "Audit log {} unavailable, continuing without it: {}",
                    path.display(),
                    e
                );
                Self::disabled()
            }
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn event(&self, event_type: AuditEventType, state: HookState, message: impl Into<String>) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            invocation_id: self.invocation_id.clone(),
            event_type,
            severity: event_type.default_severity(),
            state,
            message: message.into(),
            error_category: None,
        }
    }

    pub fn record(&self, event: AuditEvent) {
        match event.severity {
            AuditSeverity::Critical | AuditSeverity::High => {
                error!("AUDIT {:?}: {}", event.event_type, event.message);
            }
            AuditSeverity::Medium | AuditSeverity::Low => {
                info!("AUDIT {:?}: {}", event.event_type, event.message);
            }
        }

        let Some(file) = &self.file else {
            return;
        };
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        match file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }

    /// Shorthand for `record(event(..))`.
    pub fn note(&self, event_type: AuditEventType, state: HookState, message: impl Into<String>) {
        self.record(self.event(event_type, state, message));
    }
}
