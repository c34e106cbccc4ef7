//! Persist a generated summary as a note and link it to its sources.

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use digest_core::{
    content_has_tag, defaults, NewNote, Note, NoteRelation, NoteStore, Result, SummaryRequest,
    TimeWindow, Visibility,
};

/// Human-readable description of the summarized range.
pub fn describe_range(request: &SummaryRequest, window: &TimeWindow) -> String {
    match window.range.days() {
        Some(days) => format!("Last {} days", days),
        None => {
            let start = request.start_date.as_deref().map(str::trim);
            let end = request.end_date.as_deref().map(str::trim);
            match (start, end) {
                (Some(start), Some(end)) => format!("{} to {}", start, end),
                _ => format!(
                    "{} to {}",
                    window.start.format(defaults::DATE_FORMAT),
                    window.end.format(defaults::DATE_FORMAT)
                ),
            }
        }
    }
}

/// Build the stored note body: metadata header, separator, model output,
/// and the marker tag unless the output already carries it.
pub fn format_summary_content(
    summary: &str,
    range_description: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let mut content = format!(
        "{}\n**Generated:** {}\n**Time Range:** {}\n\n---\n\n{}",
        defaults::SUMMARY_HEADER_MARKER,
        generated_at.format("%Y-%m-%d %H:%M:%S"),
        range_description,
        summary
    );
    if !content_has_tag(summary, defaults::MARKER_TAG) {
        content.push_str("\n\n#");
        content.push_str(defaults::MARKER_TAG);
    }
    content
}

/// Create the summary note for `user_id`, then link it to every source.
///
/// Link failures are logged and skipped; the note is never rolled back.
/// Returns the note and the number of links created.
pub async fn materialize(
    store: &dyn NoteStore,
    user_id: Uuid,
    content: String,
    sources: &[Uuid],
) -> Result<(Note, usize)> {
    let note = store
        .create_note(
            NewNote::new(user_id, content)
                .visibility(Visibility::Private)
                .ai_generated(true),
        )
        .await?;

    let mut linked = 0usize;
    for source in sources {
        match store
            .upsert_relation(&NoteRelation::reference(note.id, *source))
            .await
        {
            Ok(()) => linked += 1,
            Err(e) => error!(
                subsystem = "jobs",
                component = "materializer",
                note_id = %note.id,
                source_id = %source,
                error = %e,
                "Failed to link summary to source note"
            ),
        }
    }

    info!(
        subsystem = "jobs",
        component = "materializer",
        user_id = %user_id,
        note_id = %note.id,
        links = linked,
        sources = sources.len(),
        "Summary note created"
    );
    Ok((note, linked))
}
