//! Summarization pipeline service.
//!
//! Orchestrates source selection, prompt assembly, the provider call and
//! materialization, and exposes the three request/response operations:
//! [`SummaryService::generate_summary`], [`SummaryService::test_configuration`]
//! and [`SummaryService::get_source_memos`].

use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use digest_core::{
    defaults, AiConfig, ChatBackend, Clock, ConnectionTestResult, Error, GeneratedSummary, Note,
    NoteFilter, NoteStore, PipelineLimits, RelationType, Result, RowStatus, SettingStore,
    SourceMemoPage, SummaryRequest,
};
use digest_inference::{test_connection, SummaryCaller};

use crate::config::load_ai_config;
use crate::materializer::{describe_range, format_summary_content, materialize};
use crate::prompt::build_prompt;
use crate::rate_limit::RateLimiter;
use crate::selector::{resolve_window, select_sources};

/// The summarization pipeline and its collaborators.
#[derive(Clone)]
pub struct SummaryService {
    notes: Arc<dyn NoteStore>,
    settings: Arc<dyn SettingStore>,
    caller: SummaryCaller,
    rate_limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    limits: PipelineLimits,
}

impl SummaryService {
    pub fn new(
        notes: Arc<dyn NoteStore>,
        settings: Arc<dyn SettingStore>,
        backend: Arc<dyn ChatBackend>,
        clock: Arc<dyn Clock>,
        limits: PipelineLimits,
    ) -> Self {
        let rate_limiter =
            RateLimiter::new(settings.clone(), clock.clone(), limits.max_requests_per_hour);
        Self {
            caller: SummaryCaller::new(backend, &limits),
            notes,
            settings,
            rate_limiter,
            clock,
            limits,
        }
    }

    pub fn notes(&self) -> &Arc<dyn NoteStore> {
        &self.notes
    }

    pub fn settings(&self) -> &Arc<dyn SettingStore> {
        &self.settings
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Workspace AI configuration, validated.
    pub async fn ai_config(&self) -> Result<AiConfig> {
        load_ai_config(self.settings.as_ref()).await
    }

    /// Generate a summary note for `user_id`.
    ///
    /// A quota slot is reserved up front and given back if the run fails
    /// before the note is created, so only successful runs count against
    /// the hourly limit.
    pub async fn generate_summary(
        &self,
        user_id: Uuid,
        request: &SummaryRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSummary> {
        // Reject malformed requests before touching the quota.
        resolve_window(request, self.clock.now())?;

        let reservation = self.rate_limiter.try_acquire(user_id).await?;

        let outcome = match self.ai_config().await {
            Ok(config) => self.run_unthrottled(user_id, request, &config, cancel).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            if let Err(release_err) = self.rate_limiter.release(&reservation).await {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    user_id = %user_id,
                    error = %release_err,
                    "Failed to release rate limit slot"
                );
            }
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                op = "generate_summary",
                user_id = %user_id,
                code = %e.code(),
                error = %e,
                "Summary generation failed"
            );
        }
        outcome
    }

    /// Run the pipeline with an already loaded configuration and no quota
    /// gate. Used by the scheduler, whose cadence is its own throttle.
    pub async fn run_unthrottled(
        &self,
        user_id: Uuid,
        request: &SummaryRequest,
        config: &AiConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSummary> {
        let start = Instant::now();
        let window = resolve_window(request, self.clock.now())?;
        let config =
            config.with_overrides(request.model.as_deref(), request.system_prompt.as_deref());

        let sources = select_sources(
            self.notes.as_ref(),
            user_id,
            request,
            &window,
            self.limits.max_source_memos,
        )
        .await?;

        let built = build_prompt(&sources, &config.system_prompt, self.limits.max_prompt_chars)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(
                "summary generation cancelled before calling AI provider".to_string(),
            ));
        }

        let summary = self.caller.summarize(&config, &built.prompt, cancel).await?;

        let content = format_summary_content(
            &summary.content,
            &describe_range(request, &window),
            self.clock.now(),
        );
        let (note, links_created) =
            materialize(self.notes.as_ref(), user_id, content, &built.used).await?;

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "generate_summary",
            user_id = %user_id,
            note_id = %note.id,
            time_range = %window.range,
            note_count = sources.len(),
            notes_used = built.used.len(),
            prompt_len = built.prompt.chars().count(),
            attempts = summary.attempts,
            truncated = summary.truncated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Summary generated"
        );

        Ok(GeneratedSummary {
            note,
            sources_used: built.used.len(),
            links_created,
            truncated: summary.truncated,
            attempts: summary.attempts,
        })
    }

    /// Test the configured provider. Never fails and never writes.
    pub async fn test_configuration(&self) -> ConnectionTestResult {
        let config = match self.ai_config().await {
            Ok(config) => config,
            Err(e) => {
                return ConnectionTestResult {
                    success: false,
                    error_message: format!("Failed to get AI configuration: {}", e),
                    details: "Please ensure AI configuration is properly set in workspace settings."
                        .to_string(),
                }
            }
        };

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "test_configuration",
            endpoint = %config.endpoint,
            model = %config.model,
            "Testing AI configuration"
        );
        test_connection(
            self.caller.backend().as_ref(),
            &config,
            self.caller.timeout(),
        )
        .await
    }

    /// Source notes linked from summary note `note_id`, newest first.
    ///
    /// Anonymous viewers may only read public summaries; signed-in viewers
    /// other than the owner may not read private ones. The same rule is
    /// applied to each source note.
    pub async fn get_source_memos(
        &self,
        viewer: Option<Uuid>,
        note_id: Uuid,
        page_size: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<SourceMemoPage> {
        let note = self.notes.get_note(note_id).await?;
        if !note.is_visible_to(viewer) {
            return Err(Error::Forbidden("permission denied".to_string()));
        }

        let limit = match page_size {
            Some(n) if n > 0 => n.min(defaults::PAGE_LIMIT_MAX),
            _ => defaults::PAGE_LIMIT,
        };
        let offset = match page_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => decode_page_token(token)?,
            None => 0,
        };

        let relations = self
            .notes
            .list_relations(note_id, RelationType::Reference)
            .await?;
        if relations.is_empty() {
            return Ok(SourceMemoPage::default());
        }

        // Each source carries its own visibility, so paging happens after
        // filtering. A summary links at most `max_source_memos` notes.
        let filter = NoteFilter {
            ids: Some(relations.iter().map(|r| r.related_note_id).collect()),
            row_status: Some(RowStatus::Normal),
            ..Default::default()
        };
        let visible: Vec<Note> = self
            .notes
            .list_notes(&filter)
            .await?
            .into_iter()
            .filter(|n| n.is_visible_to(viewer))
            .collect();
        let total_size = visible.len() as i64;

        let notes: Vec<Note> = visible
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();

        let next = offset + notes.len() as i64;
        let next_page_token = (next < total_size).then(|| encode_page_token(next));

        Ok(SourceMemoPage {
            notes,
            next_page_token,
            total_size,
        })
    }

    /// Timestamp of the user's most recent pipeline-generated note, if any.
    ///
    /// Notes the user tagged with the marker by hand do not count.
    pub async fn latest_summary_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let filter = NoteFilter {
            creator_id: Some(user_id),
            ai_generated: Some(true),
            limit: Some(1),
            ..Default::default()
        };
        Ok(self
            .notes
            .list_notes(&filter)
            .await?
            .first()
            .map(|n| n.created_at))
    }
}

fn encode_page_token(offset: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("offset={}", offset))
}

fn decode_page_token(token: &str) -> Result<i64> {
    let invalid = || Error::InvalidInput("invalid page token".to_string());
    let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let text = String::from_utf8(raw).map_err(|_| invalid())?;
    text.strip_prefix("offset=")
        .and_then(|n| n.parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_token_round_trip() {
        assert_eq!(decode_page_token(&encode_page_token(150)).unwrap(), 150);
    }

    #[test]
    fn test_page_token_rejects_garbage() {
        for token in ["!!!", "b2Zmc2V0PS0x", "aGVsbG8"] {
            let err = decode_page_token(token).unwrap_err();
            assert_eq!(err.code(), digest_core::ErrorCode::InvalidArgument, "{token}");
        }
    }
}
