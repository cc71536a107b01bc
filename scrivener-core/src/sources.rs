//! Source aggregation: deduplicate search results by URL and format them
//! into a single context string for the writing models.
//!
//! Raw page content is bounded per source at roughly `max_tokens_per_source`
//! tokens, using a 4-characters-per-token estimate.

use crate::types::{SearchResponse, SearchResult};
use std::collections::HashMap;
use tracing::debug;

/// Marker appended to raw content cut at the per-source budget.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Rough characters-per-token ratio used for the source budget.
pub const CHARS_PER_TOKEN: usize = 4;

/// How sources are rendered into the context string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Title, URL and snippet, plus raw content bounded per source.
    WithRawContent { max_tokens_per_source: usize },
    /// Title, URL and snippet only.
    SnippetOnly,
}

/// Merge all results across a batch of responses, keyed by URL.
///
/// When the same URL appears more than once, the later entry (in query order,
/// then result order) replaces the earlier one but keeps the position where
/// the URL was first seen. Running this on an already-deduplicated list is a
/// no-op.
pub fn deduplicate_sources(responses: &[SearchResponse]) -> Vec<SearchResult> {
    dedup_results(responses.iter().flat_map(|r| r.results.iter().cloned()))
}

fn dedup_results(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut unique: Vec<SearchResult> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for result in results {
        match positions.get(&result.url) {
            Some(&idx) => unique[idx] = result,
            None => {
                positions.insert(result.url.clone(), unique.len());
                unique.push(result);
            }
        }
    }
    unique
}

/// Deduplicate an already-flattened list of results.
pub fn deduplicate_results(results: &[SearchResult]) -> Vec<SearchResult> {
    dedup_results(results.iter().cloned())
}

/// Cut raw content to `max_tokens_per_source * 4` characters plus the
/// truncation marker. Content within the budget is returned unchanged.
pub fn truncate_raw_content(raw: &str, max_tokens_per_source: usize) -> String {
    let char_limit = max_tokens_per_source * CHARS_PER_TOKEN;
    match raw.char_indices().nth(char_limit) {
        Some((byte_idx, _)) => format!("{}{}", &raw[..byte_idx], TRUNCATION_MARKER),
        None => raw.to_string(),
    }
}

/// Render deduplicated sources into the context block handed to writers.
pub fn format_sources(sources: &[SearchResult], format: SourceFormat) -> String {
    let mut text = String::from("Sources:\n\n");
    for source in sources {
        text.push_str(&format!("Source {}:\n===\n", source.title));
        text.push_str(&format!("URL: {}\n===\n", source.url));
        text.push_str(&format!(
            "Most relevant content from source: {}\n===\n",
            source.content
        ));
        match format {
            SourceFormat::WithRawContent {
                max_tokens_per_source,
            } => {
                let raw = match source.raw_content.as_deref() {
                    Some(raw) => truncate_raw_content(raw, max_tokens_per_source),
                    None => {
                        debug!(url = %source.url, "No raw content for source");
                        String::new()
                    }
                };
                text.push_str(&format!(
                    "Full source content limited to {max_tokens_per_source} tokens: {raw}\n\n"
                ));
            }
            SourceFormat::SnippetOnly => text.push('\n'),
        }
    }
    text.trim().to_string()
}

/// Deduplicate and format a batch of responses in one step.
pub fn deduplicate_and_format(responses: &[SearchResponse], format: SourceFormat) -> String {
    let sources = deduplicate_sources(responses);
    debug!(
        responses = responses.len(),
        unique_sources = sources.len(),
        "Aggregated search sources"
    );
    format_sources(&sources, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(url: &str, content: &str) -> SearchResult {
        SearchResult {
            title: format!("Title for {url}"),
            url: url.to_string(),
            content: content.to_string(),
            raw_content: None,
            score: None,
        }
    }

    fn response(query: &str, results: Vec<SearchResult>) -> SearchResponse {
        SearchResponse {
            query: query.to_string(),
            results,
        }
    }

    #[test]
    fn test_duplicate_url_keeps_later_entry() {
        let responses = vec![response(
            "q",
            vec![
                result("https://a.example", "first"),
                result("https://b.example", "other"),
                result("https://a.example", "second"),
            ],
        )];
        let unique = deduplicate_sources(&responses);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].url, "https://a.example");
        assert_eq!(unique[0].content, "second");
        assert_eq!(unique[1].url, "https://b.example");
    }

    #[test]
    fn test_duplicates_across_queries() {
        let responses = vec![
            response("q1", vec![result("https://a.example", "from q1")]),
            response("q2", vec![result("https://a.example", "from q2")]),
        ];
        let unique = deduplicate_sources(&responses);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].content, "from q2");
    }

    #[test]
    fn test_truncate_long_raw_content() {
        let raw = "x".repeat(30);
        let truncated = truncate_raw_content(&raw, 5);
        assert_eq!(truncated, format!("{}{}", "x".repeat(20), TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_exact_budget_untouched() {
        let raw = "y".repeat(20);
        assert_eq!(truncate_raw_content(&raw, 5), raw);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let raw = "é".repeat(10);
        let truncated = truncate_raw_content(&raw, 1);
        assert_eq!(truncated, format!("{}{}", "é".repeat(4), TRUNCATION_MARKER));
    }

    #[test]
    fn test_format_with_raw_content() {
        let mut source = result("https://a.example", "snippet");
        source.raw_content = Some("z".repeat(3000));
        let text = format_sources(
            &[source],
            SourceFormat::WithRawContent {
                max_tokens_per_source: 600,
            },
        );
        assert!(text.starts_with("Sources:\n\nSource Title for https://a.example:\n===\n"));
        assert!(text.contains("URL: https://a.example\n===\n"));
        assert!(text.contains("Most relevant content from source: snippet\n===\n"));
        assert!(text.contains("Full source content limited to 600 tokens: "));
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(text.contains(&"z".repeat(2400)));
        assert!(!text.contains(&"z".repeat(2401)));
    }

    #[test]
    fn test_format_snippet_only() {
        let text = format_sources(
            &[result("https://a.example", "snippet")],
            SourceFormat::SnippetOnly,
        );
        assert!(!text.contains("Full source content"));
        assert!(text.ends_with("Most relevant content from source: snippet\n==="));
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_sources(&[], SourceFormat::SnippetOnly), "Sources:");
    }

    fn arb_result() -> impl Strategy<Value = SearchResult> {
        (0u8..6, "[a-z]{0,12}").prop_map(|(n, content)| result(&format!("https://{n}.example"), &content))
    }

    proptest! {
        #[test]
        fn dedup_is_idempotent(results in proptest::collection::vec(arb_result(), 0..30)) {
            let once = deduplicate_results(&results);
            let twice = deduplicate_results(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn dedup_urls_are_unique(results in proptest::collection::vec(arb_result(), 0..30)) {
            let unique = deduplicate_results(&results);
            let mut urls: Vec<_> = unique.iter().map(|r| r.url.clone()).collect();
            urls.sort();
            urls.dedup();
            prop_assert_eq!(urls.len(), unique.len());
        }

        #[test]
        fn truncation_bound(raw in "[a-z]{0,200}", tokens in 1usize..40) {
            let limit = tokens * CHARS_PER_TOKEN;
            let out = truncate_raw_content(&raw, tokens);
            if raw.chars().count() > limit {
                prop_assert_eq!(out.chars().count(), limit + TRUNCATION_MARKER.chars().count());
                prop_assert!(out.ends_with(TRUNCATION_MARKER));
            } else {
                prop_assert_eq!(out, raw);
            }
        }
    }
}
