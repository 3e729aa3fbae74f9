//! Record fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};
use postvault_persistence::types::{COLLECTOR_TIMESTAMP_FORMAT, NewPost, Post, ViewCount};

/// Timestamp every fixture is offset from.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 19, 12, 0, 0).unwrap()
}

/// Builder for inbound records.
#[derive(Debug, Clone)]
pub struct PostFixture {
    id: Option<String>,
    username: String,
    text: String,
    created_at: DateTime<Utc>,
    hashtags: Vec<String>,
    view_count: Option<ViewCount>,
}

impl PostFixture {
    /// A post by `alice` at the base time.
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            username: "alice".to_string(),
            text: text.to_string(),
            created_at: base_time(),
            hashtags: Vec::new(),
            view_count: None,
        }
    }

    /// Shifts the creation time by `minutes` from the base time.
    pub fn minutes(mut self, minutes: i64) -> Self {
        self.created_at = base_time() + Duration::minutes(minutes);
        self
    }

    pub fn by(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    pub fn hashtags(mut self, tags: &[&str]) -> Self {
        self.hashtags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn views(mut self, views: ViewCount) -> Self {
        self.view_count = Some(views);
        self
    }

    /// Drops the id so the record fails validation.
    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    /// The record as the collector sends it.
    pub fn build(self) -> NewPost {
        let id = self.id.clone().unwrap_or_default();
        NewPost {
            tweet_id: self.id,
            user_id: Some(format!("u-{}", self.username)),
            username: Some(self.username.clone()),
            display_name: Some(self.username.to_uppercase()),
            text: Some(self.text),
            created_at: Some(self.created_at.format(COLLECTOR_TIMESTAMP_FORMAT).to_string()),
            tweet_url: Some(format!("https://x.com/{}/status/{}", self.username, id)),
            hashtags: Some(self.hashtags),
            view_count: self.view_count,
            ..Default::default()
        }
    }

    /// The validated record.
    pub fn stored(self) -> Post {
        self.build().validate().expect("fixture should validate")
    }
}

/// Shorthand for a record at `minutes` past the base time.
pub fn new_post(id: &str, text: &str, minutes: i64) -> NewPost {
    PostFixture::new(id, text).minutes(minutes).build()
}

/// Shorthand for a validated record at `minutes` past the base time.
pub fn stored_post(id: &str, text: &str, minutes: i64) -> Post {
    PostFixture::new(id, text).minutes(minutes).stored()
}

/// `count` records mentioning `keyword`, ids `{prefix}-{n}`, one minute apart.
pub fn batch(prefix: &str, keyword: &str, count: usize) -> Vec<NewPost> {
    (0..count)
        .map(|n| {
            new_post(
                &format!("{}-{}", prefix, n),
                &format!("post {} about {}", n, keyword),
                n as i64,
            )
        })
        .collect()
}
