//! Typed interaction results
//!
//! Every read or invoke hands back an [`InteractionOutput`]: the raw
//! [`Content`] plus the [`Form`] and [`DataSchema`] used to obtain it.
//! Decoding is lazy, happens at most once, and the decoded value is cached;
//! [`InteractionOutput::value`] and [`InteractionOutput::array_buffer`] are
//! mutually exclusive consumers of the underlying byte stream.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::content::{CodecRegistry, Content};
use crate::error::Error;
use crate::thing::{DataSchema, Form};

/// Per-call hints for form resolution.
#[derive(Clone, Debug, Default)]
pub struct InteractionOptions {
    /// Selects a form by index instead of scanning for a match.
    pub form_index: Option<usize>,

    /// Values for the RFC 6570 template variables of the form href.
    pub uri_variables: Option<HashMap<String, Value>>,
}

impl InteractionOptions {
    pub fn with_form_index(index: usize) -> Self {
        Self {
            form_index: Some(index),
            ..Default::default()
        }
    }

    pub fn with_uri_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            uri_variables: Some(variables),
            ..Default::default()
        }
    }
}

/// The outcome of a single interaction, decoded on demand.
pub struct InteractionOutput<T> {
    content: Content,
    form: Form,
    schema: Option<DataSchema>,
    codecs: Arc<CodecRegistry>,
    validate: bool,
    data_used: bool,
    cached: Option<T>,
}

impl<T> InteractionOutput<T> {
    pub(crate) fn new(
        content: Content,
        form: Form,
        schema: Option<DataSchema>,
        codecs: Arc<CodecRegistry>,
    ) -> Self {
        Self {
            content,
            form,
            schema,
            codecs,
            validate: true,
            data_used: false,
            cached: None,
        }
    }

    /// Skips schema validation when decoding.
    pub fn ignore_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// The form the interaction was performed through.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// The schema the payload is typed against, if any.
    pub fn schema(&self) -> Option<&DataSchema> {
        self.schema.as_ref()
    }

    /// Whether the payload carries no bytes (a void interaction result).
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Consumes the raw payload bytes.
    ///
    /// Fails with [`Error::NotReadable`] once the stream was consumed, by a
    /// previous call of this method or of [`InteractionOutput::value`].
    pub fn array_buffer(&mut self) -> Result<Vec<u8>, Error> {
        if self.data_used {
            return Err(Error::NotReadable);
        }

        self.data_used = true;
        Ok(mem::take(&mut self.content.body))
    }
}

impl<T> InteractionOutput<T>
where
    T: DeserializeOwned,
{
    /// Decodes the payload against the bound schema.
    ///
    /// The first call consumes the byte stream and caches the decoded value;
    /// later calls return the cached value. Calling this after
    /// [`InteractionOutput::array_buffer`] fails with [`Error::NotReadable`].
    pub fn value(&mut self) -> Result<&T, Error> {
        if self.cached.is_none() {
            let value = self.decode()?;
            self.cached = Some(value);
        }

        self.cached.as_ref().ok_or(Error::NotReadable)
    }

    fn decode(&mut self) -> Result<T, Error> {
        let Some(schema) = &self.schema else {
            return Err(Error::NotAllowed(
                "no schema bound, there is nothing to decode against".to_string(),
            ));
        };

        if self.data_used {
            return Err(Error::NotReadable);
        }

        if self.validate {
            if let Some(media_type) = self.content.media_type.as_deref() {
                if !self.codecs.supports(media_type) {
                    return Err(Error::NotSupported(media_type.to_string()));
                }
            }
        }

        self.data_used = true;
        let decoded = self.codecs.content_to_value(&self.content, Some(schema))?;

        let Some(decoded) = decoded else {
            return Err(Error::Evaluation("no value found in the payload".to_string()));
        };

        if self.validate {
            crate::validation::validate(&decoded, schema)?;
        }

        Ok(serde_json::from_value(decoded)?)
    }
}

impl<T> std::fmt::Debug for InteractionOutput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionOutput")
            .field("content", &self.content)
            .field("form", &self.form.href)
            .field("data_used", &self.data_used)
            .finish()
    }
}

/// Decodes a single pushed message against `schema`, used by the
/// subscription delivery path.
pub(crate) fn decode_message(
    content: &Content,
    schema: &DataSchema,
    codecs: &CodecRegistry,
) -> Result<Value, Error> {
    let decoded = codecs
        .content_to_value(content, Some(schema))?
        .ok_or_else(|| Error::Evaluation("no value found in the payload".to_string()))?;

    crate::validation::validate(&decoded, schema)?;
    Ok(decoded)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::thing::{DataSchemaSubtype, NumberSchema};

    fn number_schema() -> DataSchema {
        DataSchema {
            subtype: Some(DataSchemaSubtype::Number(NumberSchema::default())),
            ..Default::default()
        }
    }

    fn output_of(content: Content, schema: Option<DataSchema>) -> InteractionOutput<f64> {
        InteractionOutput::new(
            content,
            Form::default(),
            schema,
            Arc::new(CodecRegistry::default()),
        )
    }

    #[test]
    fn value_is_cached() {
        let content = Content::new("application/json", b"23.5".to_vec());
        let mut output = output_of(content, Some(number_schema()));

        assert_eq!(*output.value().unwrap(), 23.5);
        // A second call must serve the cache, not re-read the stream.
        assert_eq!(*output.value().unwrap(), 23.5);
    }

    #[test]
    fn array_buffer_after_value_fails() {
        let content = Content::new("application/json", b"23.5".to_vec());
        let mut output = output_of(content, Some(number_schema()));

        output.value().unwrap();
        assert!(matches!(output.array_buffer(), Err(Error::NotReadable)));
    }

    #[test]
    fn value_after_array_buffer_fails() {
        let content = Content::new("application/json", b"23.5".to_vec());
        let mut output = output_of(content, Some(number_schema()));

        assert_eq!(output.array_buffer().unwrap(), b"23.5");
        assert!(matches!(output.value(), Err(Error::NotReadable)));
        assert!(matches!(output.array_buffer(), Err(Error::NotReadable)));
    }

    #[test]
    fn value_without_schema_is_not_allowed() {
        let content = Content::new("application/json", b"23.5".to_vec());
        let mut output = output_of(content, None);

        assert!(matches!(output.value(), Err(Error::NotAllowed(_))));
        // The stream is still intact for raw access.
        assert_eq!(output.array_buffer().unwrap(), b"23.5");
    }

    #[test]
    fn empty_payload_with_schema_is_an_evaluation_error() {
        let content = Content::new("application/json", Vec::new());
        let mut output = output_of(content, Some(number_schema()));

        assert!(matches!(output.value(), Err(Error::Evaluation(_))));
    }

    #[test]
    fn unsupported_content_type() {
        let content = Content::new("application/cbor", vec![0xf6]);
        let mut output = output_of(content, Some(number_schema()));

        assert!(matches!(output.value(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn validation_failure_names_the_constraint() {
        let content = Content::new("application/json", b"\"not a number\"".to_vec());
        let mut output = output_of(content, Some(number_schema()));

        match output.value() {
            Err(Error::Evaluation(message)) => assert!(message.contains("number")),
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn validation_can_be_suppressed() {
        let content = Content::new("application/cbor", b"23.5".to_vec());
        let mut output: InteractionOutput<Value> = InteractionOutput::new(
            content,
            Form::default(),
            Some(number_schema()),
            Arc::new(CodecRegistry::default()),
        )
        .ignore_validation();

        // No codec for CBOR: the payload passes through as a raw string.
        assert_eq!(*output.value().unwrap(), json!("23.5"));
    }
}
