//! EAMP wire models shared by the server and the client SDK.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::store::StoreStats;

/// Kind of content a metadata record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Image,
    Video,
    Audio,
    UiElement,
    Document,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Audio => "audio",
            ContentType::UiElement => "ui-element",
            ContentType::Document => "document",
        }
    }
}

/// Labelled value for charts and structured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Timed description of a stretch of video or audio content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// `MM:SS` or `HH:MM:SS`, optionally a `start-end` range
    pub time: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_elements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_elements: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualElementType {
    Text,
    Shape,
    Color,
    Pattern,
    Icon,
    Chart,
    Graph,
    Map,
    Photo,
    Illustration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementSize {
    Small,
    Medium,
    Large,
}

/// A notable element inside an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualElement {
    #[serde(rename = "type")]
    pub element_type: VisualElementType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ElementSize>,
}

/// Where the content appears and what it is for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surrounding_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_elements: Option<Vec<String>>,
}

fn default_eamp_version() -> String {
    "1.0.0".to_string()
}

/// Accessibility metadata for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default = "default_eamp_version")]
    pub eamp_version: String,
    pub short_alt: String,
    pub extended_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_points: Option<Vec<DataPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenes: Option<Vec<Scene>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_elements: Option<Vec<VisualElement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_attribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Change notification for a subscribed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub resource_id: String,
    /// e.g. "created", "updated", "deleted"
    pub change_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MetadataUpdate {
    pub fn new(resource_id: impl Into<String>, change_type: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            change_type: change_type.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filter criteria for listing metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, rename = "type")]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub accessibility_features: Option<Vec<String>>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_data_points: Option<bool>,
    /// Forwarded to the server; records carry no language of their own, so
    /// [`MetadataFilter::matches`] ignores it.
    #[serde(default)]
    pub language: Option<String>,
}

impl MetadataFilter {
    /// Query parameters in the form the list endpoint expects.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(content_type) = self.content_type {
            params.push(("type".to_string(), content_type.as_str().to_string()));
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            params.push(("tags".to_string(), tags.join(",")));
        }
        if let Some(features) = self
            .accessibility_features
            .as_ref()
            .filter(|f| !f.is_empty())
        {
            params.push(("features".to_string(), features.join(",")));
        }
        if let Some(after) = self.created_after {
            params.push(("createdAfter".to_string(), after.to_rfc3339()));
        }
        if let Some(before) = self.created_before {
            params.push(("createdBefore".to_string(), before.to_rfc3339()));
        }
        if let Some(has) = self.has_data_points {
            params.push(("hasDataPoints".to_string(), has.to_string()));
        }
        if let Some(language) = &self.language {
            params.push(("language".to_string(), language.clone()));
        }
        params
    }

    /// Whether `metadata` satisfies every criterion set on this filter.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        if self
            .content_type
            .is_some_and(|wanted| wanted != metadata.content_type)
        {
            return false;
        }

        if let Some(tags) = &self.tags {
            let have = metadata.tags.as_deref().unwrap_or_default();
            if !tags.iter().all(|tag| have.contains(tag)) {
                return false;
            }
        }

        if let Some(features) = &self.accessibility_features {
            let have = metadata
                .accessibility_features
                .as_deref()
                .unwrap_or_default();
            if !features.iter().all(|f| have.contains(f)) {
                return false;
            }
        }

        // A record without a creation time fails any creation-time bound.
        if let Some(after) = self.created_after
            && !metadata.created_at.is_some_and(|c| c > after)
        {
            return false;
        }
        if let Some(before) = self.created_before
            && !metadata.created_at.is_some_and(|c| c < before)
        {
            return false;
        }

        if let Some(wanted) = self.has_data_points {
            let has = metadata.data_points.as_ref().is_some_and(|p| !p.is_empty());
            if has != wanted {
                return false;
            }
        }

        true
    }
}

// =============================================================================
// HTTP API types
// =============================================================================

/// Query string of `GET /metadata`.
///
/// `tags` is comma-separated; a record must carry every listed tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(default, rename = "type")]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, rename = "hasDataPoints")]
    pub has_data_points: Option<bool>,
    /// Comma-separated accessibility features; all must be present.
    #[serde(default)]
    pub features: Option<String>,
    #[serde(default, rename = "createdAfter")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, rename = "createdBefore")]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn filter(&self) -> MetadataFilter {
        MetadataFilter {
            content_type: self.content_type,
            tags: self.tags.as_deref().and_then(split_csv),
            accessibility_features: self.features.as_deref().and_then(split_csv),
            created_after: self.created_after,
            created_before: self.created_before,
            has_data_points: self.has_data_points,
            language: self.language.clone(),
        }
    }
}

/// Split a comma-separated query value; `None` when nothing remains.
fn split_csv(raw: &str) -> Option<Vec<String>> {
    let items: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Admission control settings and load.
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub limit: u32,
    pub window_seconds: u64,
    pub tracked_identities: usize,
}

/// Statistics response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub cache: CacheStats,
    /// `None` when rate limiting is disabled
    pub rate_limit: Option<RateLimitStats>,
    pub uptime_seconds: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod fixtures {
    use super::*;

    pub fn chart(id: &str) -> Metadata {
        Metadata {
            id: id.to_string(),
            content_type: ContentType::Image,
            eamp_version: "1.0.0".to_string(),
            short_alt: "Quarterly sales chart".to_string(),
            extended_description: "Bar chart of sales per quarter".to_string(),
            data_points: Some(vec![DataPoint {
                label: "Q1".to_string(),
                value: serde_json::json!(1_200_000),
                unit: Some("USD".to_string()),
                category: None,
                metadata: None,
            }]),
            transcript: None,
            scenes: None,
            visual_elements: None,
            accessibility_features: None,
            tags: Some(vec!["sales".to_string()]),
            source_attribution: None,
            metadata_uri: None,
            created_at: None,
            updated_at: None,
            expires_at: None,
            context: None,
        }
    }
}
