//! Source selection: turn a summary request into a bounded, ordered list
//! of the user's notes.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;
use uuid::Uuid;

use digest_core::{
    defaults, normalize_tags, Error, Note, NoteFilter, NoteStore, Result, RowStatus,
    SummaryRequest, TimeRange, TimeWindow,
};

/// Resolve the request's time range to a `[start, end)` window.
///
/// Preset ranges end at `now`. Custom ranges span whole UTC days with the
/// end date included. All validation happens here, before any store read.
pub fn resolve_window(request: &SummaryRequest, now: DateTime<Utc>) -> Result<TimeWindow> {
    let range: TimeRange = request.time_range.trim().parse()?;

    if let Some(days) = range.days() {
        return Ok(TimeWindow {
            start: now - Duration::days(days),
            end: now,
            range,
        });
    }

    let (start_date, end_date) = match (
        non_blank(request.start_date.as_deref()),
        non_blank(request.end_date.as_deref()),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err(Error::InvalidInput(
                "start_date and end_date are required for custom time range".to_string(),
            ))
        }
    };

    let start = NaiveDate::parse_from_str(start_date, defaults::DATE_FORMAT).map_err(|_| {
        Error::InvalidInput("invalid start_date format, expected YYYY-MM-DD".to_string())
    })?;
    let end = NaiveDate::parse_from_str(end_date, defaults::DATE_FORMAT).map_err(|_| {
        Error::InvalidInput("invalid end_date format, expected YYYY-MM-DD".to_string())
    })?;

    if end < start {
        return Err(Error::InvalidInput(
            "end_date must be after start_date".to_string(),
        ));
    }

    let day_after_end = end
        .succ_opt()
        .ok_or_else(|| Error::InvalidInput("end_date is out of range".to_string()))?;

    Ok(TimeWindow {
        start: midnight_utc(start),
        end: midnight_utc(day_after_end),
        range,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Store filter for a user's candidate notes in `window`.
///
/// Excludes archived notes and anything already produced by the pipeline,
/// whether recognised by flag or by the marker tag.
pub fn source_filter(
    user_id: Uuid,
    request: &SummaryRequest,
    window: &TimeWindow,
    limit: i64,
) -> NoteFilter {
    NoteFilter {
        creator_id: Some(user_id),
        created_after: Some(window.start),
        created_before: Some(window.end),
        any_tags: normalize_tags(&request.tags),
        exclude_tag: Some(defaults::MARKER_TAG.to_string()),
        ai_generated: Some(false),
        row_status: Some(RowStatus::Normal),
        ids: None,
        limit: Some(limit),
        offset: 0,
    }
}

/// Fetch the candidate notes, newest first, failing with `NotFound` when
/// there are none.
pub async fn select_sources(
    store: &dyn NoteStore,
    user_id: Uuid,
    request: &SummaryRequest,
    window: &TimeWindow,
    limit: i64,
) -> Result<Vec<Note>> {
    let filter = source_filter(user_id, request, window, limit);
    let notes = store.list_notes(&filter).await?;

    debug!(
        subsystem = "jobs",
        component = "selector",
        user_id = %user_id,
        time_range = %window.range,
        tag_count = filter.any_tags.len(),
        note_count = notes.len(),
        "Selected source notes"
    );

    if notes.is_empty() {
        return Err(Error::NotFound(
            "no memos found in the specified time range".to_string(),
        ));
    }
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use digest_core::{ErrorCode, NewNote};
    use digest_db::MemoryStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_preset_windows_end_now() {
        for (range, days) in [("7d", 7), ("30d", 30), ("90d", 90)] {
            let req = SummaryRequest {
                time_range: range.into(),
                ..Default::default()
            };
            let w = resolve_window(&req, now()).unwrap();
            assert_eq!(w.end, now());
            assert_eq!(w.start, now() - Duration::days(days));
        }
    }

    #[test]
    fn test_custom_window_includes_whole_end_day() {
        let w = resolve_window(&SummaryRequest::custom("2024-01-01", "2024-01-31"), now()).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(w.range, TimeRange::Custom);
    }

    #[test]
    fn test_custom_single_day() {
        let w = resolve_window(&SummaryRequest::custom("2024-03-05", "2024-03-05"), now()).unwrap();
        assert_eq!(w.end - w.start, Duration::days(1));
    }

    #[test]
    fn test_custom_missing_dates() {
        let mut req = SummaryRequest::custom("2024-01-01", "");
        let err = resolve_window(&req, now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid input: start_date and end_date are required for custom time range"
        );
        req.end_date = None;
        assert!(resolve_window(&req, now()).is_err());
    }

    #[test]
    fn test_custom_malformed_dates() {
        let err = resolve_window(&SummaryRequest::custom("01/02/2024", "2024-01-31"), now())
            .unwrap_err();
        assert!(err.to_string().contains("invalid start_date format"));
        let err = resolve_window(&SummaryRequest::custom("2024-01-01", "2024-13-01"), now())
            .unwrap_err();
        assert!(err.to_string().contains("invalid end_date format"));
    }

    #[test]
    fn test_custom_end_before_start() {
        let err = resolve_window(&SummaryRequest::custom("2024-01-31", "2024-01-01"), now())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("end_date must be after start_date"));
    }

    #[test]
    fn test_unknown_range() {
        let req = SummaryRequest {
            time_range: "1y".into(),
            ..Default::default()
        };
        let err = resolve_window(&req, now()).unwrap_err();
        assert!(err.to_string().contains("must be one of 7d, 30d, 90d, or custom"));
    }

    #[test]
    fn test_filter_normalizes_tags() {
        let req = SummaryRequest::for_range(TimeRange::Last7Days)
            .with_tags(["#Work", "work", "  ", "ideas"]);
        let w = resolve_window(&req, now()).unwrap();
        let f = source_filter(Uuid::nil(), &req, &w, 50);
        assert_eq!(f.any_tags, vec!["ideas".to_string(), "work".to_string()]);
        assert_eq!(f.exclude_tag.as_deref(), Some("AI"));
        assert_eq!(f.ai_generated, Some(false));
        assert_eq!(f.limit, Some(50));
    }

    #[tokio::test]
    async fn test_select_excludes_marker_and_other_users() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let other = Uuid::now_v7();
        let t = now() - Duration::days(1);

        store
            .create_note(NewNote::new(user, "kept #work").created_at(t))
            .await
            .unwrap();
        store
            .create_note(NewNote::new(user, "old summary #ai").created_at(t))
            .await
            .unwrap();
        store
            .create_note(NewNote::new(user, "flagged").ai_generated(true).created_at(t))
            .await
            .unwrap();
        store
            .create_note(NewNote::new(other, "someone else").created_at(t))
            .await
            .unwrap();
        store
            .create_note(NewNote::new(user, "too old").created_at(now() - Duration::days(8)))
            .await
            .unwrap();

        let req = SummaryRequest::for_range(TimeRange::Last7Days);
        let w = resolve_window(&req, now()).unwrap();
        let notes = select_sources(&store, user, &req, &w, 50).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "kept #work");
    }

    #[tokio::test]
    async fn test_marker_is_matched_as_a_tag_not_a_substring() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let t = now() - Duration::days(1);

        for content in [
            "shell tip: `grep '#AI' notes.md`",
            "```\n# AI config\nmodel = \"x\" #AI\n```\nsnippet above",
            "see https://example.com/page#AI for the docs",
            "## AI reading list",
            "thoughts on #AIsafety",
        ] {
            store
                .create_note(NewNote::new(user, content).created_at(t))
                .await
                .unwrap();
        }
        for content in ["draft #AI", "case #Ai", "trailing #ai/"] {
            store
                .create_note(NewNote::new(user, content).created_at(t))
                .await
                .unwrap();
        }

        let req = SummaryRequest::for_range(TimeRange::Last7Days);
        let w = resolve_window(&req, now()).unwrap();
        let notes = select_sources(&store, user, &req, &w, 50).await.unwrap();
        let contents: Vec<&str> = notes.iter().map(|n| n.content.as_str()).collect();

        assert_eq!(notes.len(), 5, "{contents:?}");
        assert!(contents.iter().all(|c| !c.contains("draft")
            && !c.contains("case")
            && !c.contains("trailing")));
    }

    #[tokio::test]
    async fn test_select_empty_is_not_found() {
        let store = MemoryStore::new();
        let req = SummaryRequest::for_range(TimeRange::Last30Days);
        let w = resolve_window(&req, now()).unwrap();
        let err = select_sources(&store, Uuid::now_v7(), &req, &w, 50)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(
            err.to_string(),
            "Not found: no memos found in the specified time range"
        );
    }
}
