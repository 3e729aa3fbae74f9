//! The stored post record and its inbound, unvalidated form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Timestamp format sent by the collector, e.g. `Mon Jan 19 21:23:43 +0000 2026`.
pub const COLLECTOR_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// A collected social-media post, as stored in every backend.
///
/// `id` is unique within one backend. Across backends it is only the
/// de-duplication key of the search merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Primary key (the upstream post id).
    pub id: String,

    /// Id of the author.
    pub author_id: String,

    /// Handle of the author.
    pub username: String,

    /// Display name of the author.
    pub display_name: String,

    /// Post body; the full-text indexed column.
    pub text: String,

    /// Creation time, normalized to UTC.
    pub created_at: DateTime<Utc>,

    /// Canonical URL of the post.
    pub url: String,

    /// Hashtags without duplicates, in first-seen order.
    #[serde(default)]
    pub hashtags: Vec<String>,

    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub retweet_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub quote_count: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub bookmark_count: i64,
    #[serde(default)]
    pub view_count: i64,

    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub author_blue_verified: bool,

    /// Language code reported by the collector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_picture_url: Option<String>,

    /// Attached media URLs.
    #[serde(default)]
    pub media: Vec<String>,
}

/// View counts arrive as either a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewCount {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ViewCount {
    fn to_count(&self) -> Result<i64, RecordError> {
        match self {
            ViewCount::Integer(n) => Ok(*n),
            ViewCount::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            ViewCount::Float(f) => Err(RecordError::invalid(
                "viewCount",
                format!("is not a finite number: {}", f),
            )),
            ViewCount::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(0);
                }
                trimmed.parse::<i64>().map_err(|_| {
                    RecordError::invalid("viewCount", format!("is not numeric: '{}'", s))
                })
            }
        }
    }
}

/// An inbound post exactly as the collector sends it.
///
/// Every field is optional at the type level so that a malformed record
/// deserializes and is rejected per record by [`NewPost::validate`] instead
/// of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPost {
    pub tweet_id: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub tweet_url: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub followers_count: Option<i64>,
    pub following_count: Option<i64>,
    pub verified: Option<bool>,
    pub language: Option<String>,
    pub retweet_count: Option<i64>,
    pub reply_count: Option<i64>,
    pub quote_count: Option<i64>,
    pub like_count: Option<i64>,
    pub bookmark_count: Option<i64>,
    pub view_count: Option<ViewCount>,
    pub conversation_id: Option<String>,
    pub user_blue_verified: Option<bool>,
    pub user_location: Option<String>,
    pub user_description: Option<String>,
    pub profile_image_url: Option<String>,
    pub cover_picture_url: Option<String>,
    pub media: Option<Vec<String>>,
}

impl NewPost {
    /// Validates the record and converts it into a [`Post`].
    ///
    /// Fails with `MalformedRecord` naming the first offending field.
    pub fn validate(self) -> Result<Post, RecordError> {
        let id = required_non_blank(self.tweet_id, "tweetId")?;
        let author_id = required_non_blank(self.user_id, "userId")?;
        let username = required_non_blank(self.username, "username")?;
        let display_name = self.display_name.ok_or_else(|| RecordError::missing("displayName"))?;
        let text = self.text.ok_or_else(|| RecordError::missing("text"))?;
        let created_at = parse_created_at(&required_non_blank(self.created_at, "createdAt")?)?;
        let url = required_non_blank(self.tweet_url, "tweetUrl")?;

        let view_count = match self.view_count {
            Some(v) => v.to_count()?,
            None => 0,
        };

        Ok(Post {
            id,
            author_id,
            username,
            display_name,
            text,
            created_at,
            url,
            hashtags: dedup_tags(self.hashtags.unwrap_or_default()),
            followers_count: self.followers_count.unwrap_or(0),
            following_count: self.following_count.unwrap_or(0),
            retweet_count: self.retweet_count.unwrap_or(0),
            reply_count: self.reply_count.unwrap_or(0),
            quote_count: self.quote_count.unwrap_or(0),
            like_count: self.like_count.unwrap_or(0),
            bookmark_count: self.bookmark_count.unwrap_or(0),
            view_count,
            verified: self.verified.unwrap_or(false),
            author_blue_verified: self.user_blue_verified.unwrap_or(false),
            language: self.language,
            conversation_id: self.conversation_id,
            author_location: self.user_location,
            author_description: self.user_description,
            profile_image_url: self.profile_image_url,
            cover_picture_url: self.cover_picture_url,
            media: self.media.unwrap_or_default(),
        })
    }

    /// Returns the inbound id, if any, for failure reporting.
    pub fn id(&self) -> Option<&str> {
        self.tweet_id.as_deref()
    }
}

impl From<Post> for NewPost {
    fn from(post: Post) -> Self {
        Self {
            tweet_id: Some(post.id),
            user_id: Some(post.author_id),
            username: Some(post.username),
            display_name: Some(post.display_name),
            text: Some(post.text),
            created_at: Some(post.created_at.to_rfc3339()),
            tweet_url: Some(post.url),
            hashtags: Some(post.hashtags),
            followers_count: Some(post.followers_count),
            following_count: Some(post.following_count),
            verified: Some(post.verified),
            language: post.language,
            retweet_count: Some(post.retweet_count),
            reply_count: Some(post.reply_count),
            quote_count: Some(post.quote_count),
            like_count: Some(post.like_count),
            bookmark_count: Some(post.bookmark_count),
            view_count: Some(ViewCount::Integer(post.view_count)),
            conversation_id: post.conversation_id,
            user_blue_verified: Some(post.author_blue_verified),
            user_location: post.author_location,
            user_description: post.author_description,
            profile_image_url: post.profile_image_url,
            cover_picture_url: post.cover_picture_url,
            media: Some(post.media),
        }
    }
}

fn required_non_blank(value: Option<String>, field: &str) -> Result<String, RecordError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RecordError::missing(field)),
    }
}

/// Parses a creation timestamp in collector format or RFC 3339.
pub fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    let raw = raw.trim();
    DateTime::parse_from_str(raw, COLLECTOR_TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RecordError::invalid("createdAt", format!("is not a valid timestamp: '{}'", raw)))
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
