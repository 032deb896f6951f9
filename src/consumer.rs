//! Consumer entry point
//!
//! The [`Consumer`] is the long-lived runtime object a host application
//! configures once: protocol client factories, content codecs, credentials.
//! From there it hands out [`ConsumedThing`] proxies via
//! [`Consumer::consume`], or fetches Thing Descriptions over a registered
//! transport with [`Consumer::request_thing_description`].

use std::sync::Arc;

use tracing::debug;

use crate::consumed::ConsumedThing;
use crate::content::CodecRegistry;
use crate::error::Error;
use crate::protocol::{ClientFactories, CredentialMap, CredentialStore, ProtocolClientFactory};
use crate::thing::Thing;
use crate::uri;

pub struct Consumer {
    factories: ClientFactories,
    codecs: Arc<CodecRegistry>,
    credentials: CredentialStore,
}

impl Consumer {
    /// A consumer with the built-in codecs and no transports registered.
    pub fn new() -> Self {
        Self::with_codecs(CodecRegistry::default())
    }

    /// A consumer with a custom codec registry.
    pub fn with_codecs(codecs: CodecRegistry) -> Self {
        Self {
            factories: ClientFactories::new(),
            codecs: Arc::new(codecs),
            credentials: CredentialStore::new(),
        }
    }

    /// Registers a protocol client factory under its URI scheme.
    pub fn add_factory(&mut self, factory: Arc<dyn ProtocolClientFactory>) {
        self.factories.add_factory(factory);
    }

    pub fn has_factory_for(&self, scheme: &str) -> bool {
        self.factories.has_factory_for(scheme)
    }

    /// Stores credentials for the Thing identified by `thing_id`.
    pub fn add_credentials(&mut self, thing_id: impl Into<String>, credentials: CredentialMap) {
        self.credentials.add_credentials(thing_id, credentials);
    }

    /// Turns a Thing Description into an operable proxy.
    ///
    /// Credentials registered for the Thing's identifier are attached to
    /// every protocol client the proxy builds.
    pub fn consume(&self, td: Thing) -> ConsumedThing {
        let credentials = td
            .id
            .as_deref()
            .and_then(|id| self.credentials.get_credentials(id))
            .cloned();

        debug!(id = td.id.as_deref(), title = %td.title, "consuming thing");
        ConsumedThing::new(td, self.factories.clone(), Arc::clone(&self.codecs), credentials)
    }

    /// Fetches and parses a Thing Description from `url`.
    ///
    /// The transport is picked by URI scheme; the client built for the fetch
    /// is discarded afterwards.
    pub async fn request_thing_description(&self, url: &str) -> Result<Thing, Error> {
        let scheme = uri::scheme(url)
            .ok_or_else(|| Error::Operation(format!("\"{url}\" has no URI scheme")))?;

        let mut client = self.factories.build_client_for(&scheme)?;
        client.start().await?;
        let content = client.request_thing_description(url).await?;
        client.stop().await?;

        let value = self
            .codecs
            .content_to_value(&content, None)?
            .ok_or_else(|| Error::Evaluation("the response carries no document".to_string()))?;

        Ok(serde_json::from_value(value)?)
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("schemes", &self.factories.schemes().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::content::Content;
    use crate::protocol::{CredentialMap, Observer, ProtocolClient, ProtocolSubscription};
    use crate::thing::{Form, SecurityScheme};

    struct TdServer {
        document: serde_json::Value,
    }

    #[async_trait]
    impl ProtocolClient for TdServer {
        async fn read_resource(&self, _form: &Form) -> Result<Content, Error> {
            Ok(Content::empty())
        }

        async fn write_resource(&self, _form: &Form, _content: Content) -> Result<(), Error> {
            Ok(())
        }

        async fn invoke_resource(
            &self,
            _form: &Form,
            _content: Option<Content>,
        ) -> Result<Content, Error> {
            Ok(Content::empty())
        }

        async fn subscribe_resource(
            &self,
            _form: &Form,
            _observer: Observer,
        ) -> Result<Box<dyn ProtocolSubscription>, Error> {
            Err(Error::Operation("not subscribable".to_string()))
        }

        async fn unlink_resource(&self, _form: &Form) -> Result<(), Error> {
            Ok(())
        }

        async fn request_thing_description(&self, _uri: &str) -> Result<Content, Error> {
            Ok(Content::new(
                "application/td+json",
                serde_json::to_vec(&self.document)?,
            ))
        }

        fn set_security(
            &mut self,
            _schemes: &[&SecurityScheme],
            _credentials: Option<&CredentialMap>,
        ) -> bool {
            true
        }
    }

    struct TdServerFactory {
        document: serde_json::Value,
    }

    impl crate::protocol::ProtocolClientFactory for TdServerFactory {
        fn scheme(&self) -> &str {
            "http"
        }

        fn build(&self) -> Box<dyn ProtocolClient> {
            Box::new(TdServer {
                document: self.document.clone(),
            })
        }
    }

    #[tokio::test]
    async fn fetches_and_parses_a_thing_description() {
        let mut consumer = Consumer::new();
        consumer.add_factory(Arc::new(TdServerFactory {
            document: json!({
                "@context": "https://www.w3.org/2019/wot/td/v1.1",
                "title": "RemoteThing",
                "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
                "security": "nosec_sc"
            }),
        }));

        let td = consumer
            .request_thing_description("http://example.com/td")
            .await
            .unwrap();
        assert_eq!(td.title, "RemoteThing");
        assert!(td.security_definitions.contains_key("nosec_sc"));
    }

    #[tokio::test]
    async fn rejects_urls_without_a_registered_transport() {
        let consumer = Consumer::new();

        assert!(matches!(
            consumer.request_thing_description("coap://example.com/td").await,
            Err(Error::UnknownScheme(scheme)) if scheme == "coap"
        ));
        assert!(matches!(
            consumer.request_thing_description("no-scheme-here").await,
            Err(Error::Operation(_))
        ));
    }

    #[tokio::test]
    async fn malformed_documents_fail_with_serde() {
        struct BadServer;

        #[async_trait]
        impl ProtocolClient for BadServer {
            async fn read_resource(&self, _form: &Form) -> Result<Content, Error> {
                Ok(Content::empty())
            }

            async fn write_resource(&self, _form: &Form, _content: Content) -> Result<(), Error> {
                Ok(())
            }

            async fn invoke_resource(
                &self,
                _form: &Form,
                _content: Option<Content>,
            ) -> Result<Content, Error> {
                Ok(Content::empty())
            }

            async fn subscribe_resource(
                &self,
                _form: &Form,
                _observer: Observer,
            ) -> Result<Box<dyn ProtocolSubscription>, Error> {
                Err(Error::Operation("not subscribable".to_string()))
            }

            async fn unlink_resource(&self, _form: &Form) -> Result<(), Error> {
                Ok(())
            }

            async fn request_thing_description(&self, _uri: &str) -> Result<Content, Error> {
                // A TD without the mandatory title.
                Ok(Content::new("application/td+json", b"{}".to_vec()))
            }

            fn set_security(
                &mut self,
                _schemes: &[&SecurityScheme],
                _credentials: Option<&CredentialMap>,
            ) -> bool {
                true
            }
        }

        struct BadFactory;
        impl crate::protocol::ProtocolClientFactory for BadFactory {
            fn scheme(&self) -> &str {
                "http"
            }

            fn build(&self) -> Box<dyn ProtocolClient> {
                Box::new(BadServer)
            }
        }

        let mut consumer = Consumer::new();
        consumer.add_factory(Arc::new(BadFactory));

        assert!(matches!(
            consumer.request_thing_description("http://example.com/td").await,
            Err(Error::Serde(_))
        ));
    }
}
