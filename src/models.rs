use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// `state` value of a published manual or article.
pub const STATE_PUBLISHED: i32 = 0;
/// `state` value of a draft. Anonymous readers only ever see this state.
pub const STATE_DRAFT: i32 = 1;

pub const DEL_LIVE: i32 = 0;
/// The only `del` value an update may write.
pub const DEL_DELETED: i32 = 1;

pub const FLAG_ON: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: Option<String>,
    pub create_by: String,
    pub del: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Man {
    pub id: String,
    pub name: String,
    pub cover: Option<String>,
    pub des: Option<String>,
    pub state: i32,
    pub create_by: String,
    pub site_id: String,
    pub enable_comment: i32,
    pub enable_praise: i32,
    pub admins: Vec<String>,
    pub del: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateManPayload {
    #[serde(default)]
    pub name: String,
    pub cover: Option<String>,
    pub des: Option<String>,
    pub state: Option<i32>,
    #[serde(default)]
    pub create_by: String,
    #[serde(default)]
    pub site_id: String,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManPayload {
    pub id: Option<String>,
    pub name: Option<String>,
    pub cover: Option<String>,
    pub des: Option<String>,
    pub state: Option<i32>,
    pub del: Option<i32>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
    pub admins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManFilter {
    pub name: Option<String>,
    pub des: Option<String>,
    pub state: Option<i32>,
    pub create_by: Option<String>,
    pub site_id: Option<String>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub des: Option<String>,
    pub content: Option<String>,
    pub state: i32,
    pub man_id: String,
    pub author_list: Vec<String>,
    pub enable_comment: i32,
    pub enable_praise: i32,
    pub parent_id: Option<String>,
    pub index: i64,
    pub create_by: String,
    pub del: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client payload for a new article. There is no `createBy` field: the
/// author is always the acting identity, and any client value is dropped
/// during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArticlePayload {
    #[serde(default)]
    pub title: String,
    pub des: Option<String>,
    pub content: Option<String>,
    pub state: Option<i32>,
    #[serde(default)]
    pub man_id: String,
    #[serde(default)]
    pub author_list: Vec<String>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
    pub parent_id: Option<String>,
    pub index: Option<i64>,
}

/// Partial article patch. `id` and `createBy` come from the route and the
/// session, never from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArticlePayload {
    pub title: Option<String>,
    pub des: Option<String>,
    pub content: Option<String>,
    pub state: Option<i32>,
    pub author_list: Option<Vec<String>>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
    /// `"0"` or `""` moves the article to the top level.
    pub parent_id: Option<String>,
    pub index: Option<i64>,
    pub del: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleFilter {
    pub title: Option<String>,
    pub des: Option<String>,
    pub state: Option<i32>,
    pub man_id: Option<String>,
    pub site_id: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSearch {
    pub search_key: Option<String>,
    pub state: Option<i32>,
    pub create_by: Option<String>,
    pub man_id: Option<String>,
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleAbout {
    pub article: Article,
    pub man: Man,
    pub site: Option<Site>,
    pub praise_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PraisePayload {
    #[serde(default, deserialize_with = "flag_from_bool_or_number")]
    pub praise: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PraiseRecord {
    pub create_by: String,
    pub article_id: String,
    pub praise: bool,
    pub updated_at: DateTime<Utc>,
}

/// A file the transport layer has already spooled to a temporary location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempFile {
    pub path: PathBuf,
    pub size: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub size: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub path: String,
}

/// Clients send praise either as a boolean or as `0`/`1`.
fn flag_from_bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(flag)) => flag,
        Some(serde_json::Value::Number(number)) => number.as_i64().map(|n| n != 0).unwrap_or(false),
        Some(serde_json::Value::String(raw)) => matches!(raw.as_str(), "1" | "true"),
        _ => false,
    })
}

/// Parent ids of `"0"` or `""` mean "top level".
pub fn normalize_parent_id(raw: Option<&str>) -> Option<String> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") => None,
        Some(id) => Some(id.to_string()),
    }
}
