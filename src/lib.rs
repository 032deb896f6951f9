//! Web of Things consumer runtime
//!
//! Consume [Thing Descriptions](https://www.w3.org/TR/wot-thing-description/)
//! and operate the Things they describe:
//! > A Thing Description describes the metadata and interfaces of Things,
//! > where a Thing is an abstraction of a physical or virtual entity that
//! > provides interactions to and participates in the Web of Things.
//!
//! A [`Consumer`] is configured with protocol client factories (one per URI
//! scheme) and content codecs, then turns parsed [`Thing`] documents into
//! [`ConsumedThing`] proxies. The proxy resolves forms, applies security and
//! performs property, action and event interactions through the registered
//! transports; payloads come back as lazily decoded
//! [`InteractionOutput`](interaction::InteractionOutput)s validated against
//! the declared data schemas.
//!
//! Parsing and serialization rely on [serde](https://docs.rs/serde);
//! transports are pluggable through the [`protocol`] traits and are not part
//! of this crate.

pub mod consumed;
pub mod consumer;
pub mod content;
pub mod error;
pub mod interaction;
pub mod protocol;
pub mod subscription;
pub mod thing;
pub mod uri;
pub mod validation;

pub use consumed::ConsumedThing;
pub use consumer::Consumer;
pub use content::{CodecRegistry, Content, ContentCodec};
pub use error::Error;
pub use interaction::{InteractionOptions, InteractionOutput};
pub use protocol::{
    ClientFactories, CredentialKind, CredentialMap, CredentialStore, Observer, ProtocolClient,
    ProtocolClientFactory, ProtocolSubscription,
};
pub use subscription::Subscription;
pub use thing::Thing;
