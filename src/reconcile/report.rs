use std::fmt;

use super::orphans::SweepReport;
use super::triggers::{TriggerFailure, TriggerOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionStatus {
    Created { version: String },
    Updated { version: String },
    Unchanged,
    CodeUpdated { version: String },
    Deleted,
    /// The function does not exist remotely and the command needs it to.
    Absent,
    Failed { error: String },
}

impl FunctionStatus {
    fn describe(&self) -> String {
        match self {
            FunctionStatus::Created { version } => format!("created (version {})", version),
            FunctionStatus::Updated { version } => format!("updated (version {})", version),
            FunctionStatus::Unchanged => "unchanged".to_string(),
            FunctionStatus::CodeUpdated { version } => {
                format!("code updated (version {})", version)
            }
            FunctionStatus::Deleted => "deleted".to_string(),
            FunctionStatus::Absent => "not found, skipped".to_string(),
            FunctionStatus::Failed { error } => format!("FAILED: {}", error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionReport {
    pub name: String,
    pub status: FunctionStatus,
    pub triggers: Vec<TriggerOutcome>,
    pub trigger_failures: Vec<TriggerFailure>,
    pub orphans: SweepReport,
    /// Best-effort teardown problems that did not fail the function.
    pub warnings: Vec<String>,
}

impl FunctionReport {
    pub fn new(name: impl Into<String>, status: FunctionStatus) -> Self {
        FunctionReport {
            name: name.into(),
            status,
            triggers: Vec::new(),
            trigger_failures: Vec::new(),
            orphans: SweepReport::default(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl ToString) -> Self {
        FunctionReport::new(
            name,
            FunctionStatus::Failed {
                error: error.to_string(),
            },
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FunctionStatus::Failed { .. }) || !self.trigger_failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub command: &'static str,
    pub functions: Vec<FunctionReport>,
    /// Failures that belong to the run rather than to one function.
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(command: &'static str) -> Self {
        RunReport {
            command,
            functions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || self.functions.iter().any(FunctionReport::is_failed)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.functions.iter().filter(|r| r.is_failed()).count();
        writeln!(
            f,
            "{}: {} function(s), {} failed",
            self.command,
            self.functions.len(),
            failed
        )?;
        for function in &self.functions {
            writeln!(f, "  {}: {}", function.name, function.status.describe())?;
            for trigger in &function.triggers {
                match &trigger.trigger_arn {
                    Some(arn) => writeln!(f, "    {}: {} ({})", trigger.trigger, trigger.action, arn)?,
                    None => writeln!(f, "    {}: {}", trigger.trigger, trigger.action)?,
                }
            }
            for failure in &function.trigger_failures {
                writeln!(f, "    {}: FAILED: {}", failure.trigger, failure.error)?;
            }
            for removed in &function.orphans.removed {
                writeln!(f, "    removed {}", removed)?;
            }
            for warning in function.orphans.failed.iter().chain(&function.warnings) {
                writeln!(f, "    warning: {}", warning)?;
            }
        }
        for error in &self.errors {
            writeln!(f, "  FAILED: {}", error)?;
        }
        Ok(())
    }
}
