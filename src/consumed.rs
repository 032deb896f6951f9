//! Consumed Thing interaction engine
//!
//! A [`ConsumedThing`] is the local proxy for a remote Thing: it owns the
//! parsed [`Thing`] description and orchestrates every interaction through
//! it. Each call looks up the affordance, resolves one of its [`Form`]s
//! together with the protocol client for the form's URI scheme, performs the
//! transport call and wraps the result for lazy decoding.
//!
//! Form resolution is strict first-match: forms are scanned in declaration
//! order and the first one whose effective operation set contains the
//! requested operation, and whose scheme has a registered client factory,
//! wins. An explicit form index in the options bypasses the scan entirely.
//!
//! Protocol clients are built lazily, one per URI scheme, and cached for the
//! lifetime of the Consumed Thing; security is applied to a client exactly
//! once, right after construction.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::content::{CodecRegistry, Content};
use crate::error::Error;
use crate::interaction::{decode_message, InteractionOptions, InteractionOutput};
use crate::protocol::{
    ClientFactories, CredentialMap, ErrorCallback, Observer, ProtocolClient,
};
use crate::subscription::Subscription;
use crate::thing::{
    AffordanceKind, DataSchema, Form, FormOperation, SecurityScheme, Thing,
};
use crate::uri;

/// The subprotocol assumed for push interactions when the form declares none.
const DEFAULT_SUBPROTOCOL: &str = "longpoll";

/// The local proxy through which a remote Thing is operated.
pub struct ConsumedThing {
    td: Arc<Thing>,
    factories: ClientFactories,
    codecs: Arc<CodecRegistry>,
    credentials: Option<CredentialMap>,
    clients: Mutex<HashMap<String, Arc<dyn ProtocolClient>>>,
    subscriptions: Arc<Mutex<HashMap<String, Arc<Subscription>>>>,
}

impl ConsumedThing {
    pub(crate) fn new(
        td: Thing,
        factories: ClientFactories,
        codecs: Arc<CodecRegistry>,
        credentials: Option<CredentialMap>,
    ) -> Self {
        Self {
            td: Arc::new(td),
            factories,
            codecs,
            credentials,
            clients: Mutex::new(HashMap::new()),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The Thing Description this proxy operates on.
    pub fn description(&self) -> &Thing {
        &self.td
    }

    /// Reads a property value.
    pub async fn read_property<T>(
        &self,
        name: &str,
        options: Option<InteractionOptions>,
    ) -> Result<InteractionOutput<T>, Error>
    where
        T: DeserializeOwned,
    {
        let property = self
            .td
            .property(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if property.write_only() {
            return Err(Error::NotAllowed(format!(
                "property \"{name}\" is write-only"
            )));
        }

        let (client, form) = self
            .resolve_form(
                name,
                &property.interaction.forms,
                FormOperation::ReadProperty,
                AffordanceKind::Property,
                options.as_ref(),
            )
            .await?;

        let content = client.read_resource(&form).await?;

        Ok(InteractionOutput::new(
            content,
            form,
            Some(property.data_schema.clone()),
            Arc::clone(&self.codecs),
        ))
    }

    /// Writes a property value.
    pub async fn write_property<T>(
        &self,
        name: &str,
        value: &T,
        options: Option<InteractionOptions>,
    ) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let property = self
            .td
            .property(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if property.read_only() {
            return Err(Error::NotAllowed(format!(
                "property \"{name}\" is read-only"
            )));
        }

        let (client, form) = self
            .resolve_form(
                name,
                &property.interaction.forms,
                FormOperation::WriteProperty,
                AffordanceKind::Property,
                options.as_ref(),
            )
            .await?;

        let value = serde_json::to_value(value)?;
        let content = self.codecs.value_to_content(
            &value,
            form.content_type.as_deref(),
            Some(&property.data_schema),
        )?;

        client.write_resource(&form, content).await
    }

    /// Starts observing a property.
    ///
    /// `listener` receives every pushed value decoded and validated against
    /// the property schema; transport and decode failures go to `on_error`.
    /// At most one observation per property can be active at a time.
    pub async fn observe_property<T, F>(
        &self,
        name: &str,
        listener: F,
        on_error: Option<ErrorCallback>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let property = self
            .td
            .property(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let schema = property.data_schema.clone();
        self.open_subscription(
            name,
            &property.interaction.forms,
            FormOperation::ObserveProperty,
            AffordanceKind::Property,
            schema,
            listener,
            on_error,
            options,
        )
        .await
    }

    /// Stops an active property observation.
    ///
    /// Issues a best-effort unlink call on the most suitable form before
    /// stopping delivery.
    pub async fn unobserve_property(
        &self,
        name: &str,
        options: Option<InteractionOptions>,
    ) -> Result<(), Error> {
        let property = self
            .td
            .property(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        self.close_subscription(
            name,
            &property.interaction.forms,
            FormOperation::UnobserveProperty,
            AffordanceKind::Property,
            "observed",
            options,
        )
        .await
    }

    /// Invokes an action, optionally with an input payload.
    ///
    /// The returned output carries the action's output schema when one is
    /// declared; otherwise it is empty and nothing can be decoded from it.
    pub async fn invoke_action<I, O>(
        &self,
        name: &str,
        input: Option<&I>,
        options: Option<InteractionOptions>,
    ) -> Result<InteractionOutput<O>, Error>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let action = self
            .td
            .action(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let (client, form) = self
            .resolve_form(
                name,
                &action.interaction.forms,
                FormOperation::InvokeAction,
                AffordanceKind::Action,
                options.as_ref(),
            )
            .await?;

        let content = match input {
            Some(input) => {
                let value = serde_json::to_value(input)?;
                Some(self.codecs.value_to_content(
                    &value,
                    form.content_type.as_deref(),
                    action.input.as_ref(),
                )?)
            }
            None => None,
        };

        let response = client.invoke_resource(&form, content).await?;

        Ok(InteractionOutput::new(
            response,
            form,
            action.output.clone(),
            Arc::clone(&self.codecs),
        ))
    }

    /// Subscribes to an event.
    ///
    /// `listener` receives every notification decoded and validated against
    /// the event's `data` schema, which must be declared for this typed
    /// variant. At most one subscription per event can be active at a time.
    pub async fn subscribe_event<T, F>(
        &self,
        name: &str,
        listener: F,
        on_error: Option<ErrorCallback>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event = self
            .td
            .event(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let Some(schema) = event.data.clone() else {
            return Err(Error::Operation(format!(
                "event \"{name}\" declares no data schema to decode against"
            )));
        };

        self.open_subscription(
            name,
            &event.interaction.forms,
            FormOperation::SubscribeEvent,
            AffordanceKind::Event,
            schema,
            listener,
            on_error,
            options,
        )
        .await
    }

    /// Subscribes to an event without decoding its notifications.
    ///
    /// `listener` receives the raw [`Content`] of every notification, useful
    /// for events that declare no `data` schema.
    pub async fn subscribe_event_raw<F>(
        &self,
        name: &str,
        listener: F,
        on_error: Option<ErrorCallback>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error>
    where
        F: Fn(Content) + Send + Sync + 'static,
    {
        let event = self
            .td
            .event(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let forms = event.interaction.forms.clone();

        self.open_raw_subscription(
            name,
            &forms,
            FormOperation::SubscribeEvent,
            AffordanceKind::Event,
            Box::new(listener),
            on_error,
            options,
        )
        .await
    }

    /// Cancels an active event subscription.
    pub async fn unsubscribe_event(
        &self,
        name: &str,
        options: Option<InteractionOptions>,
    ) -> Result<(), Error> {
        let event = self
            .td
            .event(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        self.close_subscription(
            name,
            &event.interaction.forms,
            FormOperation::UnsubscribeEvent,
            AffordanceKind::Event,
            "subscribed",
            options,
        )
        .await
    }

    /// Whether a subscription or observation is currently active for `name`.
    pub async fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .get(name)
            .map(|subscription| subscription.active())
            .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_subscription<T, F>(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        schema: DataSchema,
        listener: F,
        on_error: Option<ErrorCallback>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let codecs = Arc::clone(&self.codecs);
        let error_cb = on_error.map(Arc::new);
        let decode_error_cb = error_cb.clone();

        let on_next: Box<dyn Fn(Content) + Send + Sync> = Box::new(move |content: Content| {
            match decode_message(&content, &schema, &codecs) {
                Ok(value) => match serde_json::from_value::<T>(value) {
                    Ok(typed) => listener(typed),
                    Err(error) => {
                        report_delivery_error(decode_error_cb.as_deref(), Error::from(error))
                    }
                },
                Err(error) => report_delivery_error(decode_error_cb.as_deref(), error),
            }
        });

        self.open_raw_subscription_inner(name, forms, operation, kind, on_next, error_cb, options)
            .await
    }

    async fn open_raw_subscription(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        listener: Box<dyn Fn(Content) + Send + Sync>,
        on_error: Option<ErrorCallback>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error> {
        self.open_raw_subscription_inner(
            name,
            forms,
            operation,
            kind,
            listener,
            on_error.map(Arc::new),
            options,
        )
        .await
    }

    async fn open_raw_subscription_inner(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        on_next: Box<dyn Fn(Content) + Send + Sync>,
        on_error: Option<Arc<ErrorCallback>>,
        options: Option<InteractionOptions>,
    ) -> Result<Arc<Subscription>, Error> {
        // Hold the map lock across the transport handshake so two concurrent
        // calls on the same name cannot both succeed. An entry whose
        // subscription already stopped no longer counts as occupied.
        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.get(name) {
            Some(existing) if existing.active() => {
                return Err(Error::NotAllowed(format!(
                    "\"{name}\" already has an active subscription"
                )));
            }
            Some(_) => {
                subscriptions.remove(name);
            }
            None => {}
        }

        let (client, mut form) = self
            .resolve_form(name, forms, operation, kind, options.as_ref())
            .await?;

        if form.subprotocol.is_none() {
            form.subprotocol = Some(DEFAULT_SUBPROTOCOL.to_string());
        }

        let cancel = CancellationToken::new();
        let delivery_cancel = cancel.clone();
        let transport_error_cancel = cancel.clone();

        let gated_next: Box<dyn Fn(Content) + Send + Sync> = Box::new(move |content| {
            // Nothing may be dispatched after a stop was observed.
            if delivery_cancel.is_cancelled() {
                return;
            }
            on_next(content);
        });

        let transport_error_cb = on_error.clone();
        let observer = Observer {
            on_next: gated_next,
            on_error: Some(Box::new(move |error| {
                // A transport failure ends the subscription.
                transport_error_cancel.cancel();
                report_delivery_error(transport_error_cb.as_deref(), error);
            })),
            on_complete: None,
            cancel: cancel.clone(),
        };

        let handle = client.subscribe_resource(&form, observer).await?;
        let subscription = Arc::new(Subscription::new(name, form, cancel.clone(), handle));
        subscriptions.insert(name.to_string(), Arc::clone(&subscription));

        // Unregister the entry once the subscription stops, however the stop
        // came about. The pointer comparison keeps a late cleanup from
        // removing a newer subscription registered under the same name.
        let registry = Arc::clone(&self.subscriptions);
        let registered = Arc::clone(&subscription);
        let key = name.to_string();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let mut subscriptions = registry.lock().await;
            if let Some(current) = subscriptions.get(&key) {
                if Arc::ptr_eq(current, &registered) {
                    subscriptions.remove(&key);
                }
            }
        });

        debug!(name, %operation, "subscription opened");
        Ok(subscription)
    }

    async fn close_subscription(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        verb: &str,
        options: Option<InteractionOptions>,
    ) -> Result<(), Error> {
        let subscription = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions
                .remove(name)
                .ok_or_else(|| Error::Operation(format!("\"{name}\" is not currently {verb}")))?
        };

        // Best effort: tell the remote side we are leaving, then stop
        // delivery regardless of the outcome.
        let unlink = self
            .resolve_unlink_form(name, forms, operation, kind, subscription.form(), &options)
            .await;
        match unlink {
            Ok((client, form)) => {
                if let Err(error) = client.unlink_resource(&form).await {
                    warn!(name, %error, "unlink call failed");
                }
            }
            Err(error) => {
                warn!(name, %error, "no usable unlink form");
            }
        }

        subscription.stop().await;
        Ok(())
    }

    /// Picks the form to use for an unlink call.
    ///
    /// An explicit form index in the options wins; otherwise the forms are
    /// scored against the form used to open the subscription: one point each
    /// for declaring the unlink operation, sharing the URI authority, and
    /// sharing the content type. Ties break towards the first occurrence.
    async fn resolve_unlink_form(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        opened: &Form,
        options: &Option<InteractionOptions>,
    ) -> Result<(Arc<dyn ProtocolClient>, Form), Error> {
        if let Some(options) = options {
            if options.form_index.is_some() {
                return self
                    .resolve_form(name, forms, operation, kind, Some(options))
                    .await;
            }
        }

        let index = find_best_matching_unlink_form_index(forms, operation, kind, opened)
            .ok_or(Error::NoForm {
                name: name.to_string(),
                operation,
            })?;

        let mut hinted = InteractionOptions::with_form_index(index);
        if let Some(options) = options {
            hinted.uri_variables = options.uri_variables.clone();
        }

        self.resolve_form(name, forms, operation, kind, Some(&hinted))
            .await
    }

    /// Resolves one (client, form) pair for an interaction.
    async fn resolve_form(
        &self,
        name: &str,
        forms: &[Form],
        operation: FormOperation,
        kind: AffordanceKind,
        options: Option<&InteractionOptions>,
    ) -> Result<(Arc<dyn ProtocolClient>, Form), Error> {
        if forms.is_empty() {
            return Err(Error::NoForm {
                name: name.to_string(),
                operation,
            });
        }

        let form = match options.and_then(|options| options.form_index) {
            Some(index) => {
                let form = forms.get(index).ok_or(Error::FormIndexOutOfRange {
                    name: name.to_string(),
                    index,
                    len: forms.len(),
                })?;

                // The index is taken verbatim, but the scheme must still be
                // usable.
                let scheme = self.scheme_of(form)?;
                if !self.factories.has_factory_for(&scheme) {
                    return Err(Error::UnknownScheme(scheme));
                }

                form
            }
            None => forms
                .iter()
                .find(|form| {
                    form.supports(operation, kind)
                        && self
                            .scheme_of(form)
                            .map(|scheme| self.factories.has_factory_for(&scheme))
                            .unwrap_or(false)
                })
                .ok_or(Error::NoForm {
                    name: name.to_string(),
                    operation,
                })?,
        };

        let mut form = form.clone();
        form.href = self.resolve_href(&form.href);

        if let Some(variables) = options.and_then(|options| options.uri_variables.as_ref()) {
            form.href = uri::expand(&form.href, variables);
        }

        let scheme = self.scheme_of(&form)?;
        debug!(name, %operation, scheme, href = %form.href, "form resolved");

        let client = self.client_for(&scheme, &form).await?;
        Ok((client, form))
    }

    /// Resolves a relative href against the TD base URI.
    fn resolve_href(&self, href: &str) -> String {
        if uri::scheme(href).is_some() {
            return href.to_string();
        }

        match &self.td.base {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                href.trim_start_matches('/')
            ),
            None => href.to_string(),
        }
    }

    fn scheme_of(&self, form: &Form) -> Result<String, Error> {
        let href = self.resolve_href(&form.href);
        uri::scheme(&href)
            .ok_or_else(|| Error::Operation(format!("\"{href}\" has no URI scheme")))
    }

    /// Returns the cached client for `scheme`, building it on first use.
    ///
    /// The cache lock is held across construction so a race between two
    /// interactions collapses to a single client per scheme.
    async fn client_for(
        &self,
        scheme: &str,
        form: &Form,
    ) -> Result<Arc<dyn ProtocolClient>, Error> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(scheme) {
            return Ok(Arc::clone(client));
        }

        debug!(scheme, "building protocol client");
        let mut client = self.factories.build_client_for(scheme)?;
        self.apply_security(client.as_mut(), form);
        client.start().await?;

        let client: Arc<dyn ProtocolClient> = Arc::from(client);
        clients.insert(scheme.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Applies the security constraints relevant for `form` to a freshly
    /// built client.
    ///
    /// Form-level security names override the Thing-level ones. Names
    /// without a matching security definition are skipped; a transport that
    /// understands none of the schemes is logged, never fatal.
    fn apply_security(&self, client: &mut dyn ProtocolClient, form: &Form) {
        let names: &[String] = match &form.security {
            Some(names) if !names.is_empty() => names,
            _ => &self.td.security,
        };

        let schemes: Vec<&SecurityScheme> = names
            .iter()
            .filter_map(|name| {
                let scheme = self.td.security_definitions.get(name);
                if scheme.is_none() {
                    warn!(name, "security definition not found, skipping");
                }
                scheme
            })
            .collect();

        if schemes.is_empty() {
            return;
        }

        if !client.set_security(&schemes, self.credentials.as_ref()) {
            warn!("transport did not accept any of the security schemes");
        }
    }
}

impl std::fmt::Debug for ConsumedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedThing")
            .field("id", &self.td.id)
            .field("title", &self.td.title)
            .finish()
    }
}

fn report_delivery_error(callback: Option<&ErrorCallback>, error: Error) {
    match callback {
        Some(callback) => callback(error),
        None => warn!(%error, "subscription delivery failed"),
    }
}

/// Scores every form of an affordance as an unlink target.
///
/// One point each for serving the unlink operation, matching the authority
/// of the form the subscription was opened with, and matching its content
/// type. Returns the first highest-scoring index, or `None` when no form
/// scores at all.
fn find_best_matching_unlink_form_index(
    forms: &[Form],
    operation: FormOperation,
    kind: AffordanceKind,
    opened: &Form,
) -> Option<usize> {
    const DEFAULT_CONTENT_TYPE: &str = "application/json";

    let opened_authority = uri::authority(&opened.href);
    let opened_content_type = opened
        .content_type
        .as_deref()
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let mut best: Option<(usize, u32)> = None;
    for (index, form) in forms.iter().enumerate() {
        let mut score = 0;

        if form.supports(operation, kind) {
            score += 1;
        }

        if uri::authority(&form.href) == opened_authority {
            score += 1;
        }

        let content_type = form.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        if content_type == opened_content_type {
            score += 1;
        }

        if score > 0 && best.map(|(_, top)| score > top).unwrap_or(true) {
            best = Some((index, score));
        }
    }

    best.map(|(index, _)| index)
}
