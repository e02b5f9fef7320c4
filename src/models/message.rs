//! Worker ↔ page message protocol
//!
//! Messages are tagged JSON objects: `{"type": "GET_SHARED_IMAGE"}` from a
//! page, `{"type": "SHARED_IMAGE", "image": "<base64>"}` or
//! `{"type": "NO_SHARED_IMAGE"}` back from the worker.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Image handed to the app through the OS share sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedImage {
    /// Raw image bytes (may be empty)
    pub data: Bytes,
    /// Content type declared on the multipart part
    pub content_type: Option<String>,
    /// File name declared on the multipart part
    pub file_name: Option<String>,
}

impl SharedImage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            file_name: None,
        }
    }
}

/// Request sent from a page context to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    GetSharedImage,
}

/// Reply sent from the worker to a page context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    SharedImage {
        #[serde(with = "base64_bytes")]
        image: Vec<u8>,
        #[serde(
            rename = "contentType",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        content_type: Option<String>,
        #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    NoSharedImage,
}

impl From<Option<SharedImage>> for WorkerReply {
    fn from(image: Option<SharedImage>) -> Self {
        match image {
            Some(image) => WorkerReply::SharedImage {
                image: image.data.to_vec(),
                content_type: image.content_type,
                file_name: image.file_name,
            },
            None => WorkerReply::NoSharedImage,
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_message_uses_screaming_type_tag() {
        let msg: PageMessage = serde_json::from_value(json!({"type": "GET_SHARED_IMAGE"})).unwrap();
        assert_eq!(msg, PageMessage::GetSharedImage);
        assert_eq!(
            serde_json::to_value(PageMessage::GetSharedImage).unwrap(),
            json!({"type": "GET_SHARED_IMAGE"})
        );
    }

    #[test]
    fn empty_mailbox_reply_has_only_type() {
        let reply = WorkerReply::from(None);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "NO_SHARED_IMAGE"})
        );
    }

    #[test]
    fn shared_image_reply_encodes_bytes_as_base64() {
        let mut image = SharedImage::new(vec![0xff, 0xd8, 0xff]);
        image.content_type = Some("image/jpeg".into());
        let value = serde_json::to_value(WorkerReply::from(Some(image))).unwrap();
        assert_eq!(value["type"], "SHARED_IMAGE");
        assert_eq!(value["image"], "/9j/");
        assert_eq!(value["contentType"], "image/jpeg");
        assert!(value.get("fileName").is_none());
    }
}
