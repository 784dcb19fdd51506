/// Page data model
///
/// Pages are the only persisted entity. Every store call is scoped by an explicit
/// `SessionContext` rather than ambient auth state.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::fmt;
use uuid::Uuid;

pub const UNTITLED: &str = "Untitled";

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Owner reference; the identity provider's subject for the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated caller. Passed explicitly into every store and controller call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub owner_id: OwnerId,
    pub email: String,
}

impl SessionContext {
    pub fn new(owner_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            owner_id: OwnerId::new(owner_id),
            email: email.into(),
        }
    }

    pub fn owns(&self, page: &Page) -> bool {
        page.owner_id == self.owner_id
    }
}

// ============================================================================
// Content
// ============================================================================

/// Opaque JSON document tree. Only the plain-text variant is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageContent(pub Value);

impl PageContent {
    pub fn plain_text(text: impl Into<String>) -> Self {
        Self(json!({ "text": text.into() }))
    }

    /// Default body for pages created from the dashboard
    pub fn empty_blocks() -> Self {
        Self(json!({ "blocks": [] }))
    }

    pub fn as_plain_text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<Value> for PageContent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ============================================================================
// Page
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub title: String,
    pub content: Option<PageContent>,
    pub parent_id: Option<PageId>,
    pub owner_id: OwnerId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    /// Title as shown to users; blank titles display as "Untitled"
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            UNTITLED
        } else {
            &self.title
        }
    }

    /// Apply a partial update to the in-memory copy. Timestamps are left alone;
    /// only the store assigns `updated_at`.
    pub fn apply(&mut self, patch: &PagePatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
    }
}

/// Initial fields for `create`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPage {
    pub title: String,
    #[serde(default)]
    pub content: Option<PageContent>,
    #[serde(default)]
    pub parent_id: Option<PageId>,
}

impl NewPage {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Some(PageContent::empty_blocks()),
            parent_id: None,
        }
    }
}

/// Field-level partial update. `None` leaves the stored field unchanged;
/// `content: Some(None)` (JSON `"content": null`) clears the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Option<PageContent>>,
}

// A key that is present, even as null, becomes `Some`; an absent key stays `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl PagePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: PageContent) -> Self {
        Self {
            title: None,
            content: Some(Some(content)),
        }
    }

    pub fn clear_content() -> Self {
        Self {
            title: None,
            content: Some(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}
