//! Campaign Workflow State Machine
//!
//! Drives a campaign through its fixed topology: analyze customers,
//! generate content, optionally pause at the approval gate, execute sends,
//! monitor results. The state object is persisted after every node
//! transition, so `resume` can pick up from `current_step` after a restart
//! and `approve`/`reject` re-enter the machine after the human gate.
//!
//! Failure policy per node: analysis, generation, and monitoring failures
//! move the campaign to their terminal failure state (no retry loop inside
//! the machine). Execution instead isolates failures per customer: one
//! failed send is counted and its error collected, and sending continues
//! for every remaining customer and segment. Calling a node out of order
//! (execution without variants, monitoring without results) is a
//! programming-contract violation and a hard error.

use crate::campaign::segments::{is_known_segment, Personalizer, SegmentSource};
use crate::campaign::{
    ApprovalStatus, CampaignConfig, CampaignState, CampaignStep, ContentVariant, CustomerAnalysis,
    ExecutionResults, SendRecord,
};
use crate::db::campaigns::CampaignRepository;
use crate::events::{Event, ProgressBus};
use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_array, extract_json_object, Message};
use crate::messaging::{Channel, Messenger, SendOutcome};
use crate::tasks::unix_now;
use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on content variants accepted from one generation
const MAX_VARIANTS: usize = 3;

/// Intermediate deserialization type for model-produced variants
#[derive(Debug, Deserialize)]
struct RawVariant {
    segment: String,
    subject: Option<String>,
    body: String,
}

/// One send resolved from a variant and a customer, ready for the messenger
struct SendJob {
    variant_id: String,
    customer_id: String,
    channel: Channel,
    recipient: Option<String>,
    subject: Option<String>,
    body: String,
}

pub struct CampaignWorkflow {
    gateway: Arc<LLMRouter>,
    segments: Arc<dyn SegmentSource>,
    messenger: Arc<dyn Messenger>,
    repo: CampaignRepository,
    bus: Arc<ProgressBus>,
    personalizer: Personalizer,
    fan_out: usize,
    send_timeout: Duration,
}

impl CampaignWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<LLMRouter>,
        segments: Arc<dyn SegmentSource>,
        messenger: Arc<dyn Messenger>,
        repo: CampaignRepository,
        bus: Arc<ProgressBus>,
        fan_out: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            segments,
            messenger,
            repo,
            bus,
            personalizer: Personalizer::new(),
            fan_out: fan_out.max(1),
            send_timeout,
        }
    }

    /// Create a campaign and run its workflow to the first stopping point
    /// (terminal state or the approval gate).
    pub async fn create(
        &self,
        tenant_id: &str,
        goal: &str,
        config: CampaignConfig,
    ) -> Result<CampaignState, EngineError> {
        if config.segments.is_empty() {
            return Err(EngineError::Config(
                "campaign needs at least one target segment".to_string(),
            ));
        }
        if let Some(bad) = config.segments.iter().find(|s| !is_known_segment(s)) {
            return Err(EngineError::Config(format!("unknown segment: {}", bad)));
        }

        let state = CampaignState::new(tenant_id, goal, config);
        self.repo
            .save(&state)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        tracing::info!("Created campaign {} for tenant {}", state.id, tenant_id);
        self.run(state).await
    }

    /// Continue a persisted campaign from its current step.
    ///
    /// Terminal campaigns and campaigns still waiting on approval are
    /// returned unchanged.
    pub async fn resume(&self, campaign_id: &str) -> Result<CampaignState, EngineError> {
        let state = self
            .repo
            .load(campaign_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        if state.current_step.is_terminal() {
            return Ok(state);
        }
        self.run(state).await
    }

    /// Record human approval and continue into execution
    pub async fn approve(&self, campaign_id: &str) -> Result<CampaignState, EngineError> {
        let mut state = self.load_awaiting(campaign_id).await?;
        state.approval = ApprovalStatus::Approved;
        self.persist(&state).await;
        self.run(state).await
    }

    /// Record human rejection; the campaign stays parked at the gate
    pub async fn reject(&self, campaign_id: &str) -> Result<CampaignState, EngineError> {
        let mut state = self.load_awaiting(campaign_id).await?;
        state.approval = ApprovalStatus::Rejected;
        self.persist(&state).await;
        self.bus
            .publish(Event::CampaignFinished {
                campaign_id: state.id.clone(),
                outcome: "rejected".to_string(),
            })
            .await;
        Ok(state)
    }

    async fn load_awaiting(&self, campaign_id: &str) -> Result<CampaignState, EngineError> {
        let state = self
            .repo
            .load(campaign_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        if state.current_step != CampaignStep::AwaitingApproval
            || state.approval != ApprovalStatus::Pending
        {
            return Err(EngineError::NotAwaitingApproval(campaign_id.to_string()));
        }
        Ok(state)
    }

    /// Run the state machine until it stops: a terminal state, or the
    /// approval gate waiting on human action.
    async fn run(&self, mut state: CampaignState) -> Result<CampaignState, EngineError> {
        loop {
            match state.current_step {
                CampaignStep::AnalyzeCustomers => {
                    match self.analyze(&state).await {
                        Ok(analysis) => {
                            state.analysis = Some(analysis);
                            state.transition(CampaignStep::GenerateContent);
                            self.step_completed(&state.id, "analyze_customers").await;
                        }
                        Err(reason) => {
                            tracing::warn!("Campaign {} analysis failed: {}", state.id, reason);
                            state.fail(CampaignStep::AnalysisFailed);
                        }
                    }
                    self.persist(&state).await;
                }

                CampaignStep::GenerateContent => {
                    let Some(analysis) = state.analysis.clone() else {
                        return Err(EngineError::WorkflowOrder {
                            step: "generate_content".to_string(),
                            reason: "no customer analysis present".to_string(),
                        });
                    };

                    match self.generate(&state, &analysis).await {
                        Ok(variants) => {
                            state.variants = variants;
                            self.step_completed(&state.id, "generate_content").await;
                            if state.config.requires_approval
                                && state.approval != ApprovalStatus::Approved
                            {
                                state.transition(CampaignStep::AwaitingApproval);
                            } else {
                                state.transition(CampaignStep::ExecuteCampaign);
                            }
                        }
                        Err(reason) => {
                            tracing::warn!("Campaign {} generation failed: {}", state.id, reason);
                            state.fail(CampaignStep::ContentGenerationFailed);
                        }
                    }
                    self.persist(&state).await;
                }

                CampaignStep::AwaitingApproval => {
                    if state.approval == ApprovalStatus::Approved {
                        state.transition(CampaignStep::ExecuteCampaign);
                        self.persist(&state).await;
                    } else {
                        // Parked until approve/reject re-enters the machine
                        break;
                    }
                }

                CampaignStep::ExecuteCampaign => {
                    if state.variants.is_empty() {
                        return Err(EngineError::WorkflowOrder {
                            step: "execute_campaign".to_string(),
                            reason: "no content variants present".to_string(),
                        });
                    }

                    let results = self.execute(&state).await;
                    tracing::info!(
                        "Campaign {} executed: {} sent, {} failed",
                        state.id,
                        results.sent,
                        results.failed
                    );
                    state.results = Some(results);
                    state.transition(CampaignStep::MonitorResults);
                    self.step_completed(&state.id, "execute_campaign").await;
                    self.persist(&state).await;
                }

                CampaignStep::MonitorResults => {
                    let Some(results) = state.results.clone() else {
                        return Err(EngineError::WorkflowOrder {
                            step: "monitor_results".to_string(),
                            reason: "no execution results present".to_string(),
                        });
                    };

                    match self.monitor(&state, &results).await {
                        Ok(actions) => {
                            state.recommended_actions = actions;
                            state.transition(CampaignStep::Completed);
                            self.step_completed(&state.id, "monitor_results").await;
                        }
                        Err(reason) => {
                            // Execution results stand; only the analysis of
                            // them is missing.
                            tracing::warn!("Campaign {} monitoring failed: {}", state.id, reason);
                            state.fail(CampaignStep::MonitoringFailed);
                        }
                    }
                    self.persist(&state).await;
                }

                CampaignStep::Completed
                | CampaignStep::AnalysisFailed
                | CampaignStep::ContentGenerationFailed
                | CampaignStep::MonitoringFailed => break,
            }
        }

        self.bus
            .publish(Event::CampaignFinished {
                campaign_id: state.id.clone(),
                outcome: state.current_step.as_str().to_string(),
            })
            .await;

        Ok(state)
    }

    /// Aggregate the tenant's customer base and derive targeting insights
    async fn analyze(&self, state: &CampaignState) -> Result<CustomerAnalysis, String> {
        let customers = self
            .segments
            .customers(&state.tenant_id)
            .await
            .map_err(|e| format!("segment query failed: {}", e))?;

        let now = unix_now();
        let count = |segment: &str| {
            customers
                .iter()
                .filter(|c| crate::campaign::segments::segment_matches(segment, c, now))
                .count()
        };

        let aggregates = serde_json::json!({
            "total_customers": customers.len(),
            "email_opted_in": count("email_subscribers"),
            "sms_opted_in": count("sms_subscribers"),
            "loyal": count("loyal"),
            "high_value": count("high_value"),
            "recent": count("recent"),
        });

        let system = Message::system(format!(
            "You analyze a restaurant's customer base for a marketing campaign.\n\
            Available segments: {}.\n\
            Output ONLY a JSON object:\n\
            {{\"recommended_segments\": [\"<segment>\"], \
            \"channel_weights\": {{\"email\": <0..1>, \"sms\": <0..1>}}, \
            \"content_themes\": [\"<theme>\"]}}\n\
            Recommend only segments from the available set. No markdown.",
            crate::campaign::segments::KNOWN_SEGMENTS.join(", ")
        ));
        let user = Message::user(format!(
            "Campaign goal: {}\nRequested segments: {}\nCustomer aggregates: {}",
            state.goal,
            state.config.segments.join(", "),
            aggregates
        ));

        let (content, _provider) = self
            .gateway
            .call(&[system, user])
            .await
            .map_err(|e| format!("inference failed: {}", e))?;

        let (mut recommended, channel_weights, content_themes) =
            Self::parse_analysis(&content).ok_or("unparsable analysis output")?;

        // Constrain targeting to what the operator asked for; an empty
        // recommendation falls back to the configured segments.
        recommended.retain(|s| state.config.segments.contains(s));
        if recommended.is_empty() {
            recommended = state.config.segments.clone();
        }

        Ok(CustomerAnalysis {
            total_customers: customers.len(),
            email_opted_in: count("email_subscribers"),
            sms_opted_in: count("sms_subscribers"),
            loyal: count("loyal"),
            high_value: count("high_value"),
            recent: count("recent"),
            recommended_segments: recommended,
            channel_weights,
            content_themes,
        })
    }

    /// Parse analysis output into (recommended segments, channel weights,
    /// content themes). Unknown segment names are dropped here; weights and
    /// themes are optional.
    fn parse_analysis(
        content: &str,
    ) -> Option<(Vec<String>, HashMap<String, f64>, Vec<String>)> {
        let object = extract_json_object(content)?;

        let recommended: Vec<String> = object
            .get("recommended_segments")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| is_known_segment(s))
            .map(String::from)
            .collect();

        let channel_weights: HashMap<String, f64> = object
            .get("channel_weights")
            .and_then(|w| w.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f.clamp(0.0, 1.0))))
                    .collect()
            })
            .unwrap_or_default();

        let content_themes: Vec<String> = object
            .get("content_themes")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Some((recommended, channel_weights, content_themes))
    }

    /// Generate content variants constrained to the recommended segments
    async fn generate(
        &self,
        state: &CampaignState,
        analysis: &CustomerAnalysis,
    ) -> Result<Vec<ContentVariant>, String> {
        let system = Message::system(format!(
            "You write marketing content for a restaurant campaign.\n\
            Target segments (use ONLY these): {}.\n\
            Personalization placeholders available: {{name}}, {{first_name}}, \
            {{loyalty_points}}, {{visit_count}}.\n\
            Output ONLY a JSON array of 2-3 variants, each:\n\
            {{\"segment\": \"<segment>\", \"subject\": \"<subject or null>\", \"body\": \"<body>\"}}\n\
            No markdown, no explanation.",
            analysis.recommended_segments.join(", ")
        ));
        let user = Message::user(format!(
            "Campaign goal: {}\nChannel: {}\nContent themes: {}",
            state.goal,
            state.config.channel.as_str(),
            analysis.content_themes.join(", ")
        ));

        let (content, _provider) = self
            .gateway
            .call(&[system, user])
            .await
            .map_err(|e| format!("inference failed: {}", e))?;

        Self::parse_variants(&content, &analysis.recommended_segments)
            .ok_or_else(|| "unparsable content output".to_string())
    }

    /// Parse generation output into variants. Variants targeting a segment
    /// outside the allowed set are dropped; an empty result is a failure.
    fn parse_variants(content: &str, allowed_segments: &[String]) -> Option<Vec<ContentVariant>> {
        let array = extract_json_array(content)?;
        let raw_variants: Vec<RawVariant> = serde_json::from_value(array).ok()?;

        let variants: Vec<ContentVariant> = raw_variants
            .into_iter()
            .filter(|raw| {
                !raw.body.trim().is_empty() && allowed_segments.contains(&raw.segment)
            })
            .take(MAX_VARIANTS)
            .map(|raw| ContentVariant {
                id: uuid::Uuid::new_v4().to_string(),
                segment: raw.segment,
                subject: raw.subject.filter(|s| !s.trim().is_empty()),
                body: raw.body,
                performance_score: None,
            })
            .collect();

        if variants.is_empty() {
            None
        } else {
            Some(variants)
        }
    }

    /// Fan out sends per variant, per customer, per channel.
    ///
    /// Opt-in is checked before a job is created: a customer not opted into
    /// the channel is skipped, not failed. Every created job resolves to
    /// exactly one sent or failed increment, so
    /// `sent + failed == opted-in recipients across resolved segments`.
    /// Sends run through a bounded-concurrency pool and the results are
    /// aggregated afterwards.
    async fn execute(&self, state: &CampaignState) -> ExecutionResults {
        let channels = state.config.channel.channels();
        let mut results = ExecutionResults::default();
        let mut jobs: Vec<SendJob> = Vec::new();

        for variant in &state.variants {
            let customers = match self
                .segments
                .customers_in(&state.tenant_id, &variant.segment)
                .await
            {
                Ok(customers) => customers,
                Err(e) => {
                    results
                        .errors
                        .push(format!("segment {}: {}", variant.segment, e));
                    continue;
                }
            };

            for customer in customers {
                for channel in &channels {
                    if !customer.opted_in(*channel) {
                        continue;
                    }

                    let subject = match channel {
                        Channel::Email => variant
                            .subject
                            .as_deref()
                            .map(|s| self.personalizer.render(s, &customer, *channel)),
                        Channel::Sms => None,
                    };

                    jobs.push(SendJob {
                        variant_id: variant.id.clone(),
                        customer_id: customer.id.clone(),
                        channel: *channel,
                        recipient: customer.address(*channel).map(String::from),
                        subject,
                        body: self.personalizer.render(&variant.body, &customer, *channel),
                    });
                }
            }
        }

        let send_timeout = self.send_timeout;
        let outcomes: Vec<(SendJob, SendOutcome)> = stream::iter(jobs.into_iter().map(|job| {
            let messenger = Arc::clone(&self.messenger);
            async move {
                let outcome = match job.recipient.as_deref() {
                    Some(recipient) => {
                        let send = messenger.send(
                            job.channel,
                            recipient,
                            job.subject.as_deref(),
                            &job.body,
                        );
                        match tokio::time::timeout(send_timeout, send).await {
                            Ok(outcome) => outcome,
                            Err(_) => SendOutcome::failure("send timed out"),
                        }
                    }
                    None => SendOutcome::failure(format!(
                        "no {} address on file",
                        job.channel.as_str()
                    )),
                };
                (job, outcome)
            }
        }))
        .buffer_unordered(self.fan_out)
        .collect()
        .await;

        for (job, outcome) in outcomes {
            if outcome.success {
                results.sent += 1;
                // No separate delivery confirmation is modeled
                results.delivered += 1;
            } else {
                results.failed += 1;
                results.errors.push(format!(
                    "{} via {}: {}",
                    job.customer_id,
                    job.channel.as_str(),
                    outcome.error.clone().unwrap_or_default()
                ));
            }
            results.sends.push(SendRecord {
                variant_id: job.variant_id,
                customer_id: job.customer_id,
                channel: job.channel,
                message_id: outcome.message_id,
            });
        }

        results
    }

    /// Ask the gateway what to do next given the execution results
    async fn monitor(
        &self,
        state: &CampaignState,
        results: &ExecutionResults,
    ) -> Result<Vec<String>, String> {
        let system = Message::system(
            "You review the results of a restaurant marketing campaign.\n\
            Output ONLY a JSON object:\n\
            {\"recommended_actions\": [\"<action>\"]}\n\
            Two to four concrete follow-up actions. No markdown.",
        );
        let user = Message::user(format!(
            "Campaign goal: {}\nSent: {}\nDelivered: {}\nFailed: {}\nErrors: {}",
            state.goal,
            results.sent,
            results.delivered,
            results.failed,
            results.errors.len()
        ));

        let (content, _provider) = self
            .gateway
            .call(&[system, user])
            .await
            .map_err(|e| format!("inference failed: {}", e))?;

        Self::parse_actions(&content).ok_or_else(|| "unparsable monitoring output".to_string())
    }

    /// Parse monitoring output: an object with `recommended_actions`, or a
    /// bare array of strings.
    fn parse_actions(content: &str) -> Option<Vec<String>> {
        let array = match extract_json_object(content) {
            Some(object) => object.get("recommended_actions")?.clone(),
            None => extract_json_array(content)?,
        };

        let actions: Vec<String> = array
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();

        if actions.is_empty() {
            None
        } else {
            Some(actions)
        }
    }

    async fn step_completed(&self, campaign_id: &str, step: &str) {
        self.bus
            .publish(Event::CampaignStepCompleted {
                campaign_id: campaign_id.to_string(),
                step: step.to_string(),
            })
            .await;
    }

    /// Persist the current snapshot. A failed save is logged, not fatal:
    /// aborting a campaign mid-send over a snapshot write would lose more
    /// than it protects.
    async fn persist(&self, state: &CampaignState) {
        if let Err(e) = self.repo.save(state).await {
            tracing::error!("Failed to persist campaign {}: {}", state.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analysis_valid() {
        let content = r#"{
            "recommended_segments": ["loyal", "recent"],
            "channel_weights": {"email": 0.7, "sms": 0.3},
            "content_themes": ["weeknight specials", "chef's table"]
        }"#;

        let (segments, weights, themes) = CampaignWorkflow::parse_analysis(content).unwrap();
        assert_eq!(segments, vec!["loyal", "recent"]);
        assert_eq!(weights.get("email"), Some(&0.7));
        assert_eq!(themes.len(), 2);
    }

    #[test]
    fn test_parse_analysis_drops_unknown_segments() {
        let content = r#"{"recommended_segments": ["loyal", "vips", "recent"]}"#;
        let (segments, weights, themes) = CampaignWorkflow::parse_analysis(content).unwrap();
        assert_eq!(segments, vec!["loyal", "recent"]);
        assert!(weights.is_empty());
        assert!(themes.is_empty());
    }

    #[test]
    fn test_parse_analysis_rejects_garbage() {
        assert!(CampaignWorkflow::parse_analysis("our customers are great").is_none());
        assert!(CampaignWorkflow::parse_analysis(r#"{"no_segments": true}"#).is_none());
    }

    #[test]
    fn test_parse_variants_valid() {
        let allowed = vec!["loyal".to_string(), "recent".to_string()];
        let content = r#"[
            {"segment": "loyal", "subject": "A thank-you, {first_name}", "body": "You've visited {visit_count} times!"},
            {"segment": "recent", "subject": null, "body": "Come back soon, {name}."}
        ]"#;

        let variants = CampaignWorkflow::parse_variants(content, &allowed).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].segment, "loyal");
        assert!(variants[0].subject.is_some());
        assert!(variants[1].subject.is_none());
        assert_ne!(variants[0].id, variants[1].id);
    }

    #[test]
    fn test_parse_variants_drops_disallowed_segments() {
        let allowed = vec!["loyal".to_string()];
        let content = r#"[
            {"segment": "loyal", "body": "hello"},
            {"segment": "high_value", "body": "dropped"}
        ]"#;

        let variants = CampaignWorkflow::parse_variants(content, &allowed).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].segment, "loyal");
    }

    #[test]
    fn test_parse_variants_caps_at_three() {
        let allowed = vec!["loyal".to_string()];
        let specs: Vec<String> = (0..5)
            .map(|i| format!(r#"{{"segment": "loyal", "body": "variant {}"}}"#, i))
            .collect();
        let content = format!("[{}]", specs.join(","));

        let variants = CampaignWorkflow::parse_variants(&content, &allowed).unwrap();
        assert_eq!(variants.len(), 3);
    }

    #[test]
    fn test_parse_variants_all_dropped_is_failure() {
        let allowed = vec!["loyal".to_string()];
        let content = r#"[{"segment": "high_value", "body": "wrong segment"}]"#;
        assert!(CampaignWorkflow::parse_variants(content, &allowed).is_none());
    }

    #[test]
    fn test_parse_actions_object_form() {
        let content = r#"{"recommended_actions": ["Send a follow-up next week", "Prune stale emails"]}"#;
        let actions = CampaignWorkflow::parse_actions(content).unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_parse_actions_bare_array_form() {
        let content = r#"["Retry failed sends"]"#;
        let actions = CampaignWorkflow::parse_actions(content).unwrap();
        assert_eq!(actions, vec!["Retry failed sends"]);
    }

    #[test]
    fn test_parse_actions_rejects_garbage() {
        assert!(CampaignWorkflow::parse_actions("looks good to me").is_none());
        assert!(CampaignWorkflow::parse_actions(r#"{"recommended_actions": []}"#).is_none());
    }
}
