//! Protocol-agnostic payloads and their (de)serialization
//!
//! A [`Content`] is the wire payload a protocol client produces or consumes:
//! a media type plus a byte buffer. The [`CodecRegistry`] maps media types to
//! [`ContentCodec`] strategies that turn those bytes into [`serde_json::Value`]s
//! and back, guided by the [`DataSchema`] declared in the Thing Description.
//!
//! The registry is an explicit value, constructed once and handed to whoever
//! needs it. Unknown media types never fail a decode outright: the payload is
//! passed through as a raw string so loosely-specified devices stay usable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::Error;
use crate::thing::DataSchema;

/// A payload coupled with its declared media type.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Content {
    pub media_type: Option<String>,
    pub body: Vec<u8>,
}

impl Content {
    pub fn new(media_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            media_type: Some(media_type.into()),
            body,
        }
    }

    /// A payload with no body and no declared type, used for void interactions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("media_type", &self.media_type)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Splits a full content-type string into its essence and parameters.
///
/// `application/json; charset=utf-8` becomes `("application/json",
/// {"charset": "utf-8"})`. Parameter names are lowercased, values keep their
/// case.
pub fn parse_media_type(content_type: &str) -> (String, HashMap<String, String>) {
    let mut parts = content_type.split(';');
    let essence = parts
        .next()
        .map(|part| part.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let parameters = parts
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            Some((
                name.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    (essence, parameters)
}

/// An encode/decode strategy for one family of media types.
pub trait ContentCodec: Send + Sync {
    /// Decodes `bytes` into a value, optionally guided by the declared schema.
    fn bytes_to_value(
        &self,
        bytes: &[u8],
        schema: Option<&DataSchema>,
        parameters: &HashMap<String, String>,
    ) -> Result<Value, Error>;

    /// Encodes `value` into bytes.
    fn value_to_bytes(
        &self,
        value: &Value,
        parameters: &HashMap<String, String>,
    ) -> Result<Vec<u8>, Error>;
}

/// JSON payloads: `application/json` and any `…+json` structured syntax.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl ContentCodec for JsonCodec {
    fn bytes_to_value(
        &self,
        bytes: &[u8],
        _schema: Option<&DataSchema>,
        _parameters: &HashMap<String, String>,
    ) -> Result<Value, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn value_to_bytes(
        &self,
        value: &Value,
        _parameters: &HashMap<String, String>,
    ) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(value)?)
    }
}

/// Plain-text payloads, also the encoding fallback for unknown media types.
#[derive(Debug, Default)]
pub struct TextCodec;

impl ContentCodec for TextCodec {
    fn bytes_to_value(
        &self,
        bytes: &[u8],
        _schema: Option<&DataSchema>,
        _parameters: &HashMap<String, String>,
    ) -> Result<Value, Error> {
        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn value_to_bytes(
        &self,
        value: &Value,
        _parameters: &HashMap<String, String>,
    ) -> Result<Vec<u8>, Error> {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Ok(text.into_bytes())
    }
}

/// Maps media type essences to codecs.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ContentCodec>>,
}

impl CodecRegistry {
    /// An empty registry without even the JSON codec.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registers `codec` for `media_type`, replacing any previous entry.
    pub fn register(&mut self, media_type: impl Into<String>, codec: Arc<dyn ContentCodec>) {
        self.codecs.insert(media_type.into().to_ascii_lowercase(), codec);
    }

    /// Looks up the codec for a media type essence.
    ///
    /// `…+json` suffixed types fall back to the `application/json` codec when
    /// they have no dedicated entry.
    pub fn codec_for(&self, essence: &str) -> Option<&Arc<dyn ContentCodec>> {
        self.codecs.get(essence).or_else(|| {
            essence
                .ends_with("+json")
                .then(|| self.codecs.get("application/json"))
                .flatten()
        })
    }

    pub fn supports(&self, content_type: &str) -> bool {
        let (essence, _) = parse_media_type(content_type);
        self.codec_for(&essence).is_some()
    }

    /// Decodes a [`Content`] into a value according to `schema`.
    ///
    /// Returns `Ok(None)` for the "no value" case: an empty body with no
    /// declared media type. A missing codec is not an error, the payload is
    /// passed through as a string.
    pub fn content_to_value(
        &self,
        content: &Content,
        schema: Option<&DataSchema>,
    ) -> Result<Option<Value>, Error> {
        let Some(media_type) = content.media_type.as_deref() else {
            if content.is_empty() {
                return Ok(None);
            }

            warn!("payload carries no media type, passing through as text");
            return Ok(Some(Value::String(
                String::from_utf8_lossy(&content.body).into_owned(),
            )));
        };

        if content.is_empty() {
            return Ok(None);
        }

        let (essence, parameters) = parse_media_type(media_type);
        match self.codec_for(&essence) {
            Some(codec) => codec
                .bytes_to_value(&content.body, schema, &parameters)
                .map(Some),
            None => {
                warn!(%essence, "no codec for media type, passing through as text");
                Ok(Some(Value::String(
                    String::from_utf8_lossy(&content.body).into_owned(),
                )))
            }
        }
    }

    /// Encodes `value` into a [`Content`] of the given type.
    ///
    /// A missing codec falls back to a generic text encoding of the value.
    pub fn value_to_content(
        &self,
        value: &Value,
        content_type: Option<&str>,
        _schema: Option<&DataSchema>,
    ) -> Result<Content, Error> {
        let content_type = content_type.unwrap_or("application/json");
        let (essence, parameters) = parse_media_type(content_type);

        let body = match self.codec_for(&essence) {
            Some(codec) => codec.value_to_bytes(value, &parameters)?,
            None => {
                warn!(%essence, "no codec for media type, encoding as text");
                TextCodec.value_to_bytes(value, &parameters)?
            }
        };

        Ok(Content::new(content_type, body))
    }
}

impl Default for CodecRegistry {
    /// Registers the built-in codecs: JSON (plus the TD media type) and
    /// plain text.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("application/json", Arc::new(JsonCodec));
        registry.register("application/td+json", Arc::new(JsonCodec));
        registry.register("text/plain", Arc::new(TextCodec));
        registry
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types = self.codecs.keys().collect::<Vec<_>>();
        types.sort();
        f.debug_struct("CodecRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn media_type_parsing() {
        let (essence, parameters) = parse_media_type("application/JSON; charset=UTF-8");
        assert_eq!(essence, "application/json");
        assert_eq!(parameters["charset"], "UTF-8");

        let (essence, parameters) = parse_media_type("text/plain");
        assert_eq!(essence, "text/plain");
        assert!(parameters.is_empty());
    }

    #[test]
    fn json_round_trip() {
        let registry = CodecRegistry::default();
        for value in [
            json!(23.5),
            json!("on"),
            json!(true),
            json!([1, 2, 3]),
            json!({"level": 3, "tags": ["a", "b"]}),
            json!(null),
        ] {
            let content = registry
                .value_to_content(&value, Some("application/json"), None)
                .unwrap();
            let decoded = registry.content_to_value(&content, None).unwrap().unwrap();
            assert_eq!(decoded, value);

            let content2 = registry
                .value_to_content(&decoded, Some("application/json"), None)
                .unwrap();
            assert_eq!(content.body, content2.body);
        }
    }

    #[test]
    fn json_suffix_types_use_json_codec() {
        let registry = CodecRegistry::default();
        let content = Content::new("application/senml+json", b"[1,2]".to_vec());
        let decoded = registry.content_to_value(&content, None).unwrap().unwrap();
        assert_eq!(decoded, json!([1, 2]));
    }

    #[test]
    fn unknown_media_type_passes_through() {
        let registry = CodecRegistry::default();
        let content = Content::new("application/vnd.acme", b"raw stuff".to_vec());
        let decoded = registry.content_to_value(&content, None).unwrap().unwrap();
        assert_eq!(decoded, json!("raw stuff"));
    }

    #[test]
    fn empty_untyped_content_is_no_value() {
        let registry = CodecRegistry::default();
        assert_eq!(
            registry.content_to_value(&Content::empty(), None).unwrap(),
            None
        );
    }

    #[test]
    fn text_encoding_of_non_strings() {
        let registry = CodecRegistry::default();
        let content = registry
            .value_to_content(&json!(42), Some("text/plain"), None)
            .unwrap();
        assert_eq!(content.body, b"42");
        let content = registry
            .value_to_content(&json!("on"), Some("text/plain"), None)
            .unwrap();
        assert_eq!(content.body, b"on");
    }
}
