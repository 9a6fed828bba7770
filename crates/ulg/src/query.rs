//! 🔎 Search parameters → one structured query for the chat log index.
//!
//! ```text
//!   q + exact      → must: match_phrase(message)  |  multi_match(message, authorName)
//!   date_from/to   → filter: range(datetime)  [from 00:00:00, day-after-to 00:00:00)
//!   author_name    → filter: term(authorName.keyword)
//!   video_id       → filter: term(videoId)
//!   nothing at all → match_all, still sorted, still paginated
//! ```
//!
//! Ordering never depends on score: newest display time first, always. Page size is
//! fixed; only the offset is the caller's to choose, and past the store's result window
//! the page is simply empty. Malformed dates are dropped on the
//! floor instead of turning into a 400. Nobody gets a 500 for typing a date wrong.

use chrono::{Days, NaiveDate};
use serde_json::{Value, json};

use crate::backends::SearchRequest;

/// 📏 Hits per page. Not negotiable.
pub const PAGE_SIZE: u64 = 100;

/// 🪟 Elasticsearch's default `index.max_result_window`. `from + size` beyond it is a 400.
pub const MAX_RESULT_WINDOW: u64 = 10_000;

/// 🕰️ The field search sorts and filters on. Display time, JST, `yyyy-MM-dd HH:mm:ss`.
pub const SORT_FIELD: &str = "datetime";

const TEXT_FIELDS: &[&str] = &["message", "authorName"];

/// 🎛️ What the caller asked for, already decoded from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub q: Option<String>,
    pub exact: bool,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub author_name: Option<String>,
    pub video_id: Option<String>,
    pub from: u64,
}

// -- blank means absent. "?author_name=" is not a filter for the author with no name.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn start_of(day: NaiveDate) -> String {
    format!("{} 00:00:00", day.format("%Y-%m-%d"))
}

fn date_range(params: &SearchParams) -> Option<Value> {
    let the_from = present(&params.date_from).and_then(parse_day);
    let the_to = present(&params.date_to)
        .and_then(parse_day)
        .and_then(|day| day.checked_add_days(Days::new(1)));

    let mut the_bounds = serde_json::Map::new();
    if let Some(day) = the_from {
        the_bounds.insert("gte".into(), Value::String(start_of(day)));
    }
    if let Some(day) = the_to {
        the_bounds.insert("lt".into(), Value::String(start_of(day)));
    }
    if the_bounds.is_empty() {
        return None;
    }
    Some(json!({ "range": { SORT_FIELD: Value::Object(the_bounds) } }))
}

/// 🏗️ Build the boolean query plus the fixed sort and page window.
pub fn build_query(params: &SearchParams) -> SearchRequest {
    let mut the_must = Vec::new();
    let mut the_filters = Vec::new();

    if let Some(q) = present(&params.q) {
        if params.exact {
            the_must.push(json!({ "match_phrase": { "message": q } }));
        } else {
            the_must.push(json!({ "multi_match": { "query": q, "fields": TEXT_FIELDS } }));
        }
    }
    if let Some(range) = date_range(params) {
        the_filters.push(range);
    }
    if let Some(author) = present(&params.author_name) {
        the_filters.push(json!({ "term": { "authorName.keyword": author } }));
    }
    if let Some(video_id) = present(&params.video_id) {
        the_filters.push(json!({ "term": { "videoId": video_id } }));
    }

    let the_query = if the_must.is_empty() && the_filters.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "must": the_must, "filter": the_filters } })
    };

    // -- 🪟 the last page shrinks to fit the window; past it we still ask for the total
    let (the_from, the_size) = match MAX_RESULT_WINDOW.checked_sub(params.from) {
        Some(room) if room > 0 => (params.from, PAGE_SIZE.min(room)),
        _ => (0, 0),
    };

    SearchRequest {
        query: the_query,
        sort: json!([{ SORT_FIELD: { "order": "desc" } }]),
        from: the_from,
        size: the_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_nothing_asked_means_everything_returned() {
        let the_request = build_query(&SearchParams::default());
        assert_eq!(the_request.query, json!({"match_all": {}}));
        assert_eq!(the_request.sort, json!([{"datetime": {"order": "desc"}}]));
        assert_eq!(the_request.from, 0);
        assert_eq!(the_request.size, PAGE_SIZE);
    }

    #[test]
    fn the_one_where_exact_picks_a_phrase_match() {
        let the_params = SearchParams {
            q: Some("good morning".into()),
            exact: true,
            ..Default::default()
        };
        assert_eq!(
            build_query(&the_params).query["bool"]["must"][0],
            json!({"match_phrase": {"message": "good morning"}})
        );

        let the_fuzzy = build_query(&SearchParams {
            exact: false,
            ..the_params
        });
        assert_eq!(
            the_fuzzy.query["bool"]["must"][0]["multi_match"]["fields"],
            json!(["message", "authorName"])
        );
    }

    #[test]
    fn the_one_where_one_day_covers_the_whole_day() {
        let the_params = SearchParams {
            date_from: Some("2024-01-01".into()),
            date_to: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert_eq!(
            build_query(&the_params).query["bool"]["filter"][0],
            json!({"range": {"datetime": {"gte": "2024-01-01 00:00:00", "lt": "2024-01-02 00:00:00"}}})
        );
    }

    #[test]
    fn the_one_where_bad_dates_and_blank_filters_are_ignored() {
        let the_params = SearchParams {
            q: Some("   ".into()),
            date_from: Some("yesterday-ish".into()),
            date_to: Some("2024-13-45".into()),
            author_name: Some(String::new()),
            video_id: Some("abc".into()),
            from: 100,
            ..Default::default()
        };
        let the_request = build_query(&the_params);
        assert_eq!(the_request.query["bool"]["must"], json!([]));
        assert_eq!(the_request.query["bool"]["filter"], json!([{"term": {"videoId": "abc"}}]));
        assert_eq!(the_request.from, 100);
    }

    #[test]
    fn the_one_where_deep_pages_never_leave_the_result_window() {
        let at = |from| {
            let the_request = build_query(&SearchParams {
                from,
                ..Default::default()
            });
            (the_request.from, the_request.size)
        };
        assert_eq!(at(9_900), (9_900, 100));
        assert_eq!(at(9_950), (9_950, 50));
        assert_eq!(at(10_000), (0, 0));
        assert_eq!(at(20_000), (0, 0));
        assert_eq!(at(u64::MAX), (0, 0));
    }

    #[test]
    fn the_one_where_the_author_filter_is_exact() {
        let the_request = build_query(&SearchParams {
            author_name: Some("@someone".into()),
            ..Default::default()
        });
        assert_eq!(
            the_request.query["bool"]["filter"][0],
            json!({"term": {"authorName.keyword": "@someone"}})
        );
    }
}
