//! Tag search over episode tag strings
//!
//! Tags are a single whitespace separated string per episode. Matching is a
//! case-insensitive substring test against the whole string, so "fight"
//! matches "#firefighter". There is no index; callers pass every candidate.

use serde::Serialize;

/// Outcome of a tag search
///
/// A blank query means no search is active, which is different from a
/// search that found nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TagSearch<T> {
    Inactive,
    Results { query: String, matches: Vec<T> },
}

impl<T> TagSearch<T> {
    pub fn is_active(&self) -> bool {
        matches!(self, TagSearch::Results { .. })
    }

    /// Matches of an active search, empty when inactive
    pub fn matches(&self) -> &[T] {
        match self {
            TagSearch::Inactive => &[],
            TagSearch::Results { matches, .. } => matches,
        }
    }
}

/// Trimmed query, or `None` when there is nothing to search for
pub fn normalize_query(query: &str) -> Option<&str> {
    let trimmed = query.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Whether a tag string contains `query`, ignoring case
///
/// Missing tags never match.
pub fn tags_match(tags: Option<&str>, query: &str) -> bool {
    match tags {
        Some(tags) => tags.to_lowercase().contains(&query.to_lowercase()),
        None => false,
    }
}

/// Filter `items` down to those whose tags contain `query`
///
/// Input order is preserved.
pub fn search<T, F>(items: Vec<T>, query: &str, tags_of: F) -> TagSearch<T>
where
    F: Fn(&T) -> Option<&str>,
{
    let Some(query) = normalize_query(query) else {
        return TagSearch::Inactive;
    };

    let matches = items
        .into_iter()
        .filter(|item| tags_match(tags_of(item), query))
        .collect();

    TagSearch::Results {
        query: query.to_string(),
        matches,
    }
}

/// One tag token prepared for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagToken {
    pub text: String,
    /// Token with a leading `#`
    pub display: String,
    pub highlighted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagDisplay {
    NoTags,
    Tags { tokens: Vec<TagToken> },
}

/// Split a tag string into display tokens
///
/// With a query, every token containing it (ignoring case) is highlighted.
pub fn display_tags(tags: Option<&str>, query: Option<&str>) -> TagDisplay {
    let query = query.and_then(normalize_query).map(str::to_lowercase);

    let tokens: Vec<TagToken> = tags
        .unwrap_or_default()
        .split_whitespace()
        .map(|token| TagToken {
            text: token.to_string(),
            display: if token.starts_with('#') {
                token.to_string()
            } else {
                format!("#{}", token)
            },
            highlighted: query
                .as_deref()
                .is_some_and(|q| token.to_lowercase().contains(q)),
        })
        .collect();

    if tokens.is_empty() {
        TagDisplay::NoTags
    } else {
        TagDisplay::Tags { tokens }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(items: &[(&'static str, Option<&'static str>)]) -> Vec<(&'static str, Option<&'static str>)> {
        items.to_vec()
    }

    #[test]
    fn test_blank_query_is_inactive() {
        let items = tagged(&[("a", Some("#action"))]);
        assert_eq!(search(items.clone(), "", |i| i.1), TagSearch::Inactive);
        assert_eq!(search(items, "   \t", |i| i.1), TagSearch::Inactive);
    }

    #[test]
    fn test_no_match_is_active_and_empty() {
        let items = tagged(&[("a", Some("#action"))]);
        let result = search(items, "zzz_no_match", |i| i.1);
        assert!(result.is_active());
        assert!(result.matches().is_empty());
        assert_ne!(result, TagSearch::Inactive);
    }

    #[test]
    fn test_case_insensitive_substring() {
        let items = tagged(&[("hit", Some("ab-fight CDef")), ("miss", Some("xyz"))]);
        let result = search(items, "AB", |i| i.1);
        let names: Vec<_> = result.matches().iter().map(|i| i.0).collect();
        assert_eq!(names, vec!["hit"]);
    }

    #[test]
    fn test_substring_not_token_match() {
        assert!(tags_match(Some("#firefighter"), "fight"));
        assert!(tags_match(Some("#액션 #프롤로그"), "프롤"));
    }

    #[test]
    fn test_missing_tags_never_match() {
        let items = tagged(&[("none", None), ("some", Some("#a"))]);
        let result = search(items, "a", |i| i.1);
        let names: Vec<_> = result.matches().iter().map(|i| i.0).collect();
        assert_eq!(names, vec!["some"]);
    }

    #[test]
    fn test_query_is_trimmed() {
        let items = tagged(&[("a", Some("#action"))]);
        match search(items, "  act  ", |i| i.1) {
            TagSearch::Results { query, matches } => {
                assert_eq!(query, "act");
                assert_eq!(matches.len(), 1);
            }
            TagSearch::Inactive => panic!("expected an active search"),
        }
    }

    #[test]
    fn test_display_tags_prefixes_and_highlights() {
        let display = display_tags(Some("#Action  romance\tfirefighter"), Some("FIGHT"));
        let TagDisplay::Tags { tokens } = display else {
            panic!("expected tags");
        };
        let rendered: Vec<_> = tokens
            .iter()
            .map(|t| (t.display.as_str(), t.highlighted))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("#Action", false),
                ("#romance", false),
                ("#firefighter", true)
            ]
        );
    }

    #[test]
    fn test_display_without_tags() {
        assert_eq!(display_tags(None, None), TagDisplay::NoTags);
        assert_eq!(display_tags(Some("   "), Some("a")), TagDisplay::NoTags);
    }

    #[test]
    fn test_display_without_query_highlights_nothing() {
        let TagDisplay::Tags { tokens } = display_tags(Some("a b"), Some(" ")) else {
            panic!("expected tags");
        };
        assert!(tokens.iter().all(|t| !t.highlighted));
    }
}
