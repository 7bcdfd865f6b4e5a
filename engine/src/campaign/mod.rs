//! Campaign workflow types
//!
//! A campaign is a multi-step, multi-segment outbound messaging workflow
//! with a fixed-topology state machine:
//!
//! ```text
//! analyze_customers --[analysis_complete]--> generate_content
//! analyze_customers --[analysis_failed]--> END
//! generate_content --[requires_approval]--> END  (awaiting human action)
//! generate_content --[else]--> execute_campaign
//! execute_campaign --> monitor_results
//! monitor_results --> END
//! ```
//!
//! The state object carries everything each step produces, and is persisted
//! after every transition so a restart can resume from `current_step`.

pub mod segments;
pub mod workflow;

pub use segments::{Personalizer, SegmentSource};
pub use workflow::CampaignWorkflow;

use crate::messaging::Channel;
use crate::tasks::unix_now;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Workflow step / state name
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStep {
    AnalyzeCustomers,
    GenerateContent,
    AwaitingApproval,
    ExecuteCampaign,
    MonitorResults,
    Completed,
    AnalysisFailed,
    ContentGenerationFailed,
    MonitoringFailed,
}

impl CampaignStep {
    pub fn as_str(&self) -> &str {
        match self {
            CampaignStep::AnalyzeCustomers => "analyze_customers",
            CampaignStep::GenerateContent => "generate_content",
            CampaignStep::AwaitingApproval => "awaiting_approval",
            CampaignStep::ExecuteCampaign => "execute_campaign",
            CampaignStep::MonitorResults => "monitor_results",
            CampaignStep::Completed => "completed",
            CampaignStep::AnalysisFailed => "analysis_failed",
            CampaignStep::ContentGenerationFailed => "content_generation_failed",
            CampaignStep::MonitoringFailed => "monitoring_failed",
        }
    }

    /// True when the state machine stops at this step.
    ///
    /// `awaiting_approval` is terminal for the synchronous run; a human
    /// decision re-enters the machine through approve/reject.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStep::Completed
                | CampaignStep::AnalysisFailed
                | CampaignStep::ContentGenerationFailed
                | CampaignStep::MonitoringFailed
        )
    }
}

/// Channel type a campaign targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Sms,
    MultiChannel,
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::MultiChannel => "multi_channel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(ChannelType::Email),
            "sms" => Some(ChannelType::Sms),
            "multi_channel" | "multi" => Some(ChannelType::MultiChannel),
            _ => None,
        }
    }

    /// Concrete delivery channels this campaign sends on
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            ChannelType::Email => vec![Channel::Email],
            ChannelType::Sms => vec![Channel::Sms],
            ChannelType::MultiChannel => vec![Channel::Email, Channel::Sms],
        }
    }
}

/// Human approval status for the content gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

/// Campaign configuration fixed at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub channel: ChannelType,

    /// Target segment names (must be from the fixed segment set)
    pub segments: Vec<String>,

    /// When set, generated content pauses at the approval gate
    #[serde(default)]
    pub requires_approval: bool,
}

/// Snapshot of customer aggregates plus the insights derived from them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerAnalysis {
    pub total_customers: usize,
    pub email_opted_in: usize,
    pub sms_opted_in: usize,
    pub loyal: usize,
    pub high_value: usize,
    pub recent: usize,

    /// Segments the analysis recommends targeting
    pub recommended_segments: Vec<String>,

    /// Relative channel preference weights, keyed by channel name
    pub channel_weights: HashMap<String, f64>,

    /// Content themes to steer generation
    pub content_themes: Vec<String>,
}

/// One personalized message template targeted at a segment.
///
/// Immutable once execution has consumed it for sending; sends are recorded
/// against the variant id for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVariant {
    pub id: String,
    pub segment: String,
    /// Subject line; absent for SMS-only content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Body template with personalization placeholders
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_score: Option<f64>,
}

/// Audit record of one attempted send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub variant_id: String,
    pub customer_id: String,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Aggregated outcome of campaign execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub sent: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Open tracking is not wired up; present for downstream reporting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicked: Option<usize>,
    pub errors: Vec<String>,
    pub sends: Vec<SendRecord>,
}

/// Campaign-scoped state object the workflow operates on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignState {
    pub id: String,
    pub tenant_id: String,
    pub goal: String,

    pub current_step: CampaignStep,
    pub completed_steps: Vec<String>,
    pub remaining_steps: Vec<String>,

    pub config: CampaignConfig,

    pub analysis: Option<CustomerAnalysis>,
    pub variants: Vec<ContentVariant>,
    pub results: Option<ExecutionResults>,

    pub approval: ApprovalStatus,
    pub recommended_actions: Vec<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl CampaignState {
    pub fn new(tenant_id: impl Into<String>, goal: impl Into<String>, config: CampaignConfig) -> Self {
        let now = unix_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            goal: goal.into(),
            current_step: CampaignStep::AnalyzeCustomers,
            completed_steps: Vec::new(),
            remaining_steps: vec![
                CampaignStep::GenerateContent.as_str().to_string(),
                CampaignStep::ExecuteCampaign.as_str().to_string(),
                CampaignStep::MonitorResults.as_str().to_string(),
            ],
            config,
            analysis: None,
            variants: Vec::new(),
            results: None,
            approval: ApprovalStatus::Pending,
            recommended_actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the current step as done and move to the next one
    pub fn transition(&mut self, next: CampaignStep) {
        self.completed_steps
            .push(self.current_step.as_str().to_string());
        self.remaining_steps
            .retain(|s| s != next.as_str() && s != self.current_step.as_str());
        self.current_step = next;
        self.updated_at = unix_now();
    }

    /// Move to a terminal failure state without marking the current step done
    pub fn fail(&mut self, terminal: CampaignStep) {
        self.current_step = terminal;
        self.remaining_steps.clear();
        self.updated_at = unix_now();
    }
}
