//! `_changes` rendering: a one-shot JSON body or a continuous NDJSON stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use futures::stream;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::store::Database;

/// Parsed `_changes` query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedParams {
    pub continuous: bool,
    pub since: Since,
    pub include_docs: bool,
    pub heartbeat: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    Now,
    Seq(u64),
}

impl FeedParams {
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        let since = match params.get("since").map(String::as_str) {
            Some("now") => Since::Now,
            Some(seq) => Since::Seq(leading_number(seq)),
            None => Since::Seq(0),
        };
        Self {
            continuous: params.get("feed").map(String::as_str) == Some("continuous"),
            since,
            include_docs: params.get("include_docs").map(String::as_str) == Some("true"),
            heartbeat: params
                .get("heartbeat")
                .and_then(|ms| ms.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

/// CouchDB 2+ sequences look like `12-g1AAAA...`; only the counter matters here.
fn leading_number(seq: &str) -> u64 {
    let digits: String = seq.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn history(db: &Database, params: &FeedParams) -> Vec<Value> {
    let since = match params.since {
        Since::Now => db.seq,
        Since::Seq(seq) => seq,
    };
    db.log
        .iter()
        .filter(|row| row["seq"].as_u64().unwrap_or(0) > since)
        .map(|row| render(row.clone(), params.include_docs))
        .collect()
}

fn render(mut row: Value, include_docs: bool) -> Value {
    if !include_docs {
        if let Some(row) = row.as_object_mut() {
            row.remove("doc");
        }
    }
    row
}

/// `{"results":[...],"last_seq":N,"pending":0}` for the normal feed.
pub fn normal(db: &Database, params: &FeedParams) -> Value {
    json!({
        "results": history(db, params),
        "last_seq": db.seq,
        "pending": 0,
    })
}

/// Streaming body for `feed=continuous`. Replays the log after `since`,
/// then follows live writes until the database is dropped.
pub fn continuous(db: &Database, params: &FeedParams) -> Body {
    let feed = Feed {
        backlog: history(db, params).into_iter(),
        live: db.changes.subscribe(),
        heartbeat: params.heartbeat,
        include_docs: params.include_docs,
    };
    Body::from_stream(stream::unfold(feed, |mut feed| async move {
        let line = feed.next_line().await?;
        Some((Ok::<_, Infallible>(line), feed))
    }))
}

struct Feed {
    backlog: std::vec::IntoIter<Value>,
    live: broadcast::Receiver<Value>,
    heartbeat: Option<Duration>,
    include_docs: bool,
}

impl Feed {
    async fn next_line(&mut self) -> Option<String> {
        if let Some(row) = self.backlog.next() {
            return Some(format!("{row}\n"));
        }
        loop {
            let received = match self.heartbeat {
                Some(period) => match tokio::time::timeout(period, self.live.recv()).await {
                    Ok(received) => received,
                    Err(_) => return Some("\n".to_string()),
                },
                None => self.live.recv().await,
            };
            match received {
                Ok(row) => return Some(format!("{}\n", render(row, self.include_docs))),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change feed subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredDoc;

    fn params(pairs: &[(&str, &str)]) -> FeedParams {
        let query = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        FeedParams::from_query(&query)
    }

    #[test]
    fn parses_query() {
        let p = params(&[("feed", "continuous"), ("since", "now"), ("include_docs", "true"), ("heartbeat", "500")]);
        assert!(p.continuous);
        assert_eq!(p.since, Since::Now);
        assert!(p.include_docs);
        assert_eq!(p.heartbeat, Some(Duration::from_millis(500)));

        let p = params(&[("since", "3-g1AAAA")]);
        assert!(!p.continuous);
        assert_eq!(p.since, Since::Seq(3));
        assert_eq!(p.heartbeat, None);
    }

    #[test]
    fn normal_feed_respects_since_and_docs() {
        let mut db = Database::default();
        db.commit("a", StoredDoc::default());
        db.commit("b", StoredDoc::default());

        let all = normal(&db, &params(&[]));
        assert_eq!(all["results"].as_array().unwrap().len(), 2);
        assert!(all["results"][0].get("doc").is_none());
        assert_eq!(all["last_seq"], 2);

        let later = normal(&db, &params(&[("since", "1"), ("include_docs", "true")]));
        assert_eq!(later["results"][0]["id"], "b");
        assert_eq!(later["results"][0]["doc"]["_id"], "b");

        let now = normal(&db, &params(&[("since", "now")]));
        assert!(now["results"].as_array().unwrap().is_empty());
    }
}
