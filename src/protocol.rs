//! Protocol client capability surface
//!
//! Concrete transports live outside this crate; the consumer reaches them
//! through [`ProtocolClient`], one implementation per URI scheme. Factories
//! are registered by scheme in [`ClientFactories`], the consumer builds one
//! client per scheme per Consumed Thing and keeps it until the Consumed Thing
//! is dropped.
//!
//! Credentials are looked up by Thing identifier in a [`CredentialStore`]
//! populated by the host application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::content::Content;
use crate::error::Error;
use crate::thing::{Form, SecurityScheme};

/// Callback invoked for every delivered message of a push subscription.
pub type NextCallback = Box<dyn Fn(Content) + Send + Sync>;

/// Callback invoked when the transport fails during an active subscription.
pub type ErrorCallback = Box<dyn Fn(Error) + Send + Sync>;

/// Callback invoked when the remote side completes the subscription.
pub type CompleteCallback = Box<dyn Fn() + Send + Sync>;

/// The receiving side of a push subscription.
///
/// Transports deliver every message through `on_next` in arrival order and
/// must check `cancel` at each suspension point so a stop request is observed
/// within one in-flight request.
pub struct Observer {
    pub on_next: NextCallback,
    pub on_error: Option<ErrorCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub cancel: CancellationToken,
}

/// A transport-level handle to an open push subscription.
#[async_trait]
pub trait ProtocolSubscription: Send + Sync {
    /// Tears down the transport side of the subscription. Must be idempotent.
    async fn close(&mut self) -> Result<(), Error>;

    fn is_closed(&self) -> bool;
}

/// One transport binding, selected by URI scheme.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Reads the resource a form points at.
    async fn read_resource(&self, form: &Form) -> Result<Content, Error>;

    /// Writes a payload to the resource a form points at.
    async fn write_resource(&self, form: &Form, content: Content) -> Result<(), Error>;

    /// Invokes the operation a form points at, with an optional payload.
    async fn invoke_resource(&self, form: &Form, content: Option<Content>)
        -> Result<Content, Error>;

    /// Opens a push subscription on the resource a form points at.
    async fn subscribe_resource(
        &self,
        form: &Form,
        observer: Observer,
    ) -> Result<Box<dyn ProtocolSubscription>, Error>;

    /// Signals the remote side that a push subscription is being abandoned.
    async fn unlink_resource(&self, form: &Form) -> Result<(), Error>;

    /// Fetches a Thing Description document from `uri`.
    async fn request_thing_description(&self, uri: &str) -> Result<Content, Error>;

    /// Hands the security schemes selected for a Thing to the transport.
    ///
    /// Returns `false` when the transport understands none of the schemes;
    /// the caller logs and proceeds without authentication.
    fn set_security(
        &mut self,
        schemes: &[&SecurityScheme],
        credentials: Option<&CredentialMap>,
    ) -> bool;

    async fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Builds [`ProtocolClient`]s for one URI scheme.
pub trait ProtocolClientFactory: Send + Sync {
    fn scheme(&self) -> &str;

    fn build(&self) -> Box<dyn ProtocolClient>;
}

/// The per-scheme factory registry a [`Consumer`] hands to its Consumed
/// Things.
///
/// [`Consumer`]: crate::consumer::Consumer
#[derive(Clone, Default)]
pub struct ClientFactories {
    factories: HashMap<String, Arc<dyn ProtocolClientFactory>>,
}

impl ClientFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its scheme, replacing any previous one.
    pub fn add_factory(&mut self, factory: Arc<dyn ProtocolClientFactory>) {
        self.factories
            .insert(factory.scheme().to_ascii_lowercase(), factory);
    }

    pub fn has_factory_for(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Builds a fresh client for `scheme`.
    pub fn build_client_for(&self, scheme: &str) -> Result<Box<dyn ProtocolClient>, Error> {
        self.factories
            .get(scheme)
            .map(|factory| factory.build())
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// The kind of credential a security scheme consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    None,
    Basic,
    Digest,
    ApiKey,
    Bearer,
    Psk,
    OAuth2,
}

/// Opaque credential data keyed by kind, scoped to one Thing.
pub type CredentialMap = HashMap<CredentialKind, Value>;

/// Credentials for all known Things, keyed by Thing identifier.
#[derive(Clone, Default)]
pub struct CredentialStore {
    credentials: HashMap<String, CredentialMap>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or merges into) the credential map for a Thing.
    pub fn add_credentials(&mut self, thing_id: impl Into<String>, credentials: CredentialMap) {
        self.credentials
            .entry(thing_id.into())
            .or_default()
            .extend(credentials);
    }

    pub fn get_credentials(&self, thing_id: &str) -> Option<&CredentialMap> {
        self.credentials.get(thing_id)
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    struct NullClient;

    #[async_trait]
    impl ProtocolClient for NullClient {
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
            Ok(Content::empty())
        }

        fn set_security(
            &mut self,
            _schemes: &[&SecurityScheme],
            _credentials: Option<&CredentialMap>,
        ) -> bool {
            false
        }
    }

    struct NullFactory;

    impl ProtocolClientFactory for NullFactory {
        fn scheme(&self) -> &str {
            "null"
        }

        fn build(&self) -> Box<dyn ProtocolClient> {
            Box::new(NullClient)
        }
    }

    #[test]
    fn factory_registry() {
        let mut factories = ClientFactories::new();
        assert!(!factories.has_factory_for("null"));
        assert!(factories.build_client_for("null").is_err());

        factories.add_factory(Arc::new(NullFactory));
        assert!(factories.has_factory_for("null"));
        assert!(!factories.has_factory_for("http"));
        assert!(factories.build_client_for("null").is_ok());

        assert!(matches!(
            factories.build_client_for("http"),
            Err(Error::UnknownScheme(scheme)) if scheme == "http"
        ));
    }

    #[test]
    fn credential_store() {
        let mut store = CredentialStore::new();
        store.add_credentials(
            "urn:thing:1",
            [(CredentialKind::Basic, json!({"username": "u", "password": "p"}))]
                .into_iter()
                .collect(),
        );
        store.add_credentials(
            "urn:thing:1",
            [(CredentialKind::Bearer, json!({"token": "t"}))]
                .into_iter()
                .collect(),
        );

        let credentials = store.get_credentials("urn:thing:1").unwrap();
        assert_eq!(credentials.len(), 2);
        assert!(credentials.contains_key(&CredentialKind::Basic));
        assert!(store.get_credentials("urn:thing:2").is_none());
    }
}
