//! Hashtag extraction and content-derived note properties.
//!
//! Every note write runs content through [`derive_payload`] so tags and
//! property flags are always a pure function of the stored content. Tags are
//! lowercased (Unicode-aware) and stored without the leading `#`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::models::NoteProperty;

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n.*?```").expect("valid code block regex"));

static INLINE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("valid inline code regex"));

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid link regex"));

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s)]+").expect("valid url regex"));

static HASHTAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\p{L}\p{N}_\-/&])#(\p{L}[\p{L}\p{N}_\-/]*)").expect("valid hashtag regex")
});

static TASK_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*+] \[( |x|X)\]").expect("valid task regex"));

/// Normalize a user-supplied tag for matching: trim, strip `#`, lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').trim().to_lowercase()
}

/// Normalize a list of tags, dropping blanks and duplicates.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = tags
        .iter()
        .map(|t| normalize_tag(t))
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect()
}

/// Extract hashtags from markdown content.
///
/// Code blocks, inline code, headings (`# Title`), link targets and URL
/// fragments never produce tags. Output is lowercase, deduplicated and
/// sorted.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let text = CODE_BLOCK.replace_all(content, "");
    let text = INLINE_CODE.replace_all(&text, "");
    let text = remove_headings(&text);
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = URL.replace_all(&text, "");

    let tags: BTreeSet<String> = HASHTAG
        .captures_iter(&text)
        .filter_map(|cap| cap.get(1))
        .map(|m| {
            m.as_str()
                .trim_end_matches(|c| c == '/' || c == '-')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    tags.into_iter().collect()
}

/// Whether `content` carries `tag` as a real hashtag.
pub fn content_has_tag(content: &str, tag: &str) -> bool {
    let wanted = normalize_tag(tag);
    !wanted.is_empty() && extract_hashtags(content).iter().any(|t| *t == wanted)
}

/// Derive property flags from content.
pub fn derive_property(content: &str) -> NoteProperty {
    let has_incomplete_tasks = TASK_ITEM
        .captures_iter(content)
        .any(|cap| cap.get(1).is_some_and(|m| m.as_str() == " "));
    NoteProperty {
        has_link: URL.is_match(content) || MARKDOWN_LINK.is_match(content),
        has_task_list: TASK_ITEM.is_match(content),
        has_code: content.contains("```") || INLINE_CODE.is_match(content),
        has_incomplete_tasks,
    }
}

/// Tags plus properties, recomputed on every write.
pub fn derive_payload(content: &str) -> (Vec<String>, NoteProperty) {
    (extract_hashtags(content), derive_property(content))
}

fn remove_headings(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('#') {
                return true;
            }
            let rest = trimmed.trim_start_matches('#');
            !(rest.is_empty() || rest.starts_with(' '))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
