/// Result of one job execution attempt, consumed synchronously by the
/// retry coordinator. There is no callback path: every attempt produces
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The side effect ran and the job completed
    Success,

    /// Another attempt already holds the side-effect reservation; the job
    /// is treated as handled and completes without re-running the effect
    RecoveredNoOp,

    /// The attempt failed; the retry coordinator decides redelivery vs.
    /// dead-letter escalation
    Failure { reason: String },
}

impl Outcome {
    /// Both `Success` and `RecoveredNoOp` acknowledge the job as done
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RecoveredNoOp => "recovered",
            Self::Failure { .. } => "failure",
        }
    }
}
