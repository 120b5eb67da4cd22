//! Wire types for the liked-posts and bookmarks endpoints.
//!
//! Responses are denormalized: `data` holds the posts, `includes` the users
//! and media they reference, `meta` the result count and continuation cursor.
//! Every part may be absent, so everything defaults.

use serde::Deserialize;

/// One page of a cursor-paginated collection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub data: Vec<PostRecord>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub meta: Meta,
    /// Partial errors (deleted posts, withheld media, ...) reported alongside data.
    #[serde(default)]
    pub errors: Vec<PartialError>,
}

impl Page {
    pub fn next_cursor(&self) -> Option<&str> {
        self.meta.next_token.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialError {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub attachments: Option<Attachments>,
}

impl PostRecord {
    pub fn media_keys(&self) -> &[String] {
        self.attachments
            .as_ref()
            .map(|a| a.media_keys.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub media: Vec<MediaRecord>,
}

impl Includes {
    /// Username of the included user with this id. Pages hold at most a
    /// hundred posts, so a scan is fine.
    pub fn username_for(&self, author_id: Option<&str>) -> Option<&str> {
        let author_id = author_id?;
        self.users
            .iter()
            .find(|u| u.id == author_id)
            .map(|u| u.username.as_str())
    }

    pub fn media(&self, media_key: &str) -> Option<&MediaRecord> {
        self.media.iter().find(|m| m.media_key == media_key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
}

/// An included media object, resolved into its shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "WireMedia")]
pub struct MediaRecord {
    pub media_key: String,
    pub alt_text: Option<String>,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Photo { url: Option<String> },
    AnimatedGif { variants: Vec<Variant> },
    Video { variants: Vec<Variant> },
    /// A type this archive does not store.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Variant {
    pub url: String,
    #[serde(default)]
    pub bit_rate: Option<u64>,
}

#[derive(Deserialize)]
struct WireMedia {
    media_key: String,
    #[serde(rename = "type")]
    media_type: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    alt_text: Option<String>,
    #[serde(default)]
    variants: Vec<Variant>,
}

impl From<WireMedia> for MediaRecord {
    fn from(w: WireMedia) -> Self {
        let kind = match w.media_type.as_str() {
            "photo" => MediaKind::Photo { url: w.url },
            "animated_gif" => MediaKind::AnimatedGif {
                variants: w.variants,
            },
            "video" => MediaKind::Video {
                variants: w.variants,
            },
            _ => MediaKind::Other(w.media_type),
        };
        Self {
            media_key: w.media_key,
            alt_text: w.alt_text,
            kind,
        }
    }
}

/// Response of `GET /2/users/me`.
#[derive(Debug, Deserialize)]
pub(crate) struct UserResponse {
    pub data: Option<UserRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_with_includes() {
        let json = r#"{
            "data": [
                {"id": "100", "text": "hello", "author_id": "7",
                 "attachments": {"media_keys": ["3_1", "7_2"]}},
                {"id": "101", "text": "no media", "author_id": "8"}
            ],
            "includes": {
                "users": [{"id": "7", "username": "painter", "name": "P"}],
                "media": [
                    {"media_key": "3_1", "type": "photo", "url": "https://pbs/1.jpg", "alt_text": "a cat"},
                    {"media_key": "7_2", "type": "video", "variants": [
                        {"content_type": "video/mp4", "bit_rate": 832000, "url": "https://v/832.mp4"},
                        {"content_type": "application/x-mpegURL", "url": "https://v/pl.m3u8"}
                    ]}
                ]
            },
            "meta": {"result_count": 2, "next_token": "abc"}
        }"#;
        let page: Page = serde_json::from_str(json).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.next_cursor(), Some("abc"));
        assert_eq!(page.meta.result_count, 2);
        assert_eq!(page.data[0].media_keys(), ["3_1", "7_2"]);
        assert!(page.data[1].media_keys().is_empty());

        assert_eq!(page.includes.username_for(Some("7")), Some("painter"));
        assert_eq!(page.includes.username_for(Some("8")), None);
        assert_eq!(page.includes.username_for(None), None);

        let photo = page.includes.media("3_1").unwrap();
        assert_eq!(photo.alt_text.as_deref(), Some("a cat"));
        assert_eq!(
            photo.kind,
            MediaKind::Photo {
                url: Some("https://pbs/1.jpg".into())
            }
        );

        match &page.includes.media("7_2").unwrap().kind {
            MediaKind::Video { variants } => {
                assert_eq!(variants.len(), 2);
                assert_eq!(variants[0].bit_rate, Some(832000));
                assert_eq!(variants[1].bit_rate, None);
            }
            other => panic!("expected video, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_page_defaults() {
        let page: Page = serde_json::from_str(r#"{"meta": {"result_count": 0}}"#).unwrap();
        assert!(page.data.is_empty());
        assert!(page.includes.users.is_empty());
        assert_eq!(page.next_cursor(), None);

        let page: Page = serde_json::from_str("{}").unwrap();
        assert_eq!(page.meta.result_count, 0);
    }

    #[test]
    fn test_unknown_media_type_is_other() {
        let media: MediaRecord =
            serde_json::from_str(r#"{"media_key": "9_9", "type": "audio"}"#).unwrap();
        assert_eq!(media.kind, MediaKind::Other("audio".into()));
    }

    #[test]
    fn test_animated_gif_without_variants() {
        let media: MediaRecord =
            serde_json::from_str(r#"{"media_key": "16_1", "type": "animated_gif"}"#).unwrap();
        assert_eq!(media.kind, MediaKind::AnimatedGif { variants: vec![] });
    }

    #[test]
    fn test_partial_errors_parsed() {
        let page: Page = serde_json::from_str(
            r#"{"errors": [{"title": "Not Found Error", "detail": "Could not find tweet"}]}"#,
        )
        .unwrap();
        assert_eq!(page.errors.len(), 1);
        assert_eq!(page.errors[0].title.as_deref(), Some("Not Found Error"));
    }
}
