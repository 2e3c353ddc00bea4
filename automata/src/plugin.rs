//! The plugin pipeline around paid calls.
//!
//! A paid call passes three hook points:
//!
//! 1. **`before_call`** - May rewrite the [`CallRequest`] or abort. Runs before
//!    the API is resolved.
//! 2. **`before_pay`** - Sees the resolved provider and price. May abort; no
//!    funds have moved yet.
//! 3. **`after_pay`** - Sees the committed payment. A failure cannot undo the
//!    payment; it only stops the provider call.
//!
//! Plugins declare the hooks they implement through [`Capabilities`] and are
//! run by a [`PluginChain`] in registration order, sequentially, so later
//! plugins observe rewrites made by earlier ones.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PluginAbort;
use crate::listing::ServiceListing;

/// Boxed future returned by plugin hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PluginAbort>> + Send + 'a>>;

/// HTTP method of the provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CallMethod {
    /// `GET`; the body is not sent.
    Get,
    /// `POST`
    #[default]
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl CallMethod {
    /// The method name, uppercase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Returns `true` if a request body is sent with this method.
    #[must_use]
    pub const fn has_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for CallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-flight paid call, as seen by `before_call` hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Requested service name.
    pub api: String,
    /// Path appended to the service endpoint.
    pub path: String,
    /// JSON request body.
    pub body: Value,
    /// HTTP method.
    pub method: CallMethod,
    /// Wallet to charge; the payer's own account when `None`.
    pub wallet_owner: Option<String>,
    /// Listing chosen by a hook; when set, the call skips name resolution.
    pub selected: Option<ServiceListing>,
}

impl CallRequest {
    /// A `POST` of `body` to `path` on service `api`.
    pub fn new(api: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self {
            api: api.into(),
            path: path.into(),
            body,
            method: CallMethod::Post,
            wallet_owner: None,
            selected: None,
        }
    }

    /// Charges `owner`'s usage wallet instead of the payer's own.
    #[must_use]
    pub fn with_wallet_owner(mut self, owner: impl Into<String>) -> Self {
        self.wallet_owner = Some(owner.into());
        self
    }

    /// Overrides the HTTP method.
    #[must_use]
    pub const fn with_method(mut self, method: CallMethod) -> Self {
        self.method = method;
        self
    }

    /// Replaces the target with `listing`.
    pub fn select(&mut self, listing: ServiceListing) {
        self.api.clone_from(&listing.name);
        self.selected = Some(listing);
    }
}

/// Context passed to `before_pay` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayContext {
    /// Resolved service name.
    pub api: String,
    /// Provider about to be paid.
    pub provider: String,
    /// Amount about to be paid.
    pub amount: u64,
    /// Wallet about to be charged.
    pub wallet_owner: String,
}

/// Context passed to `after_pay` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidContext {
    /// What was paid.
    pub payment: PayContext,
    /// Committed payment transaction.
    pub tx_id: String,
}

/// The hooks a plugin implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Implements [`Plugin::before_call`].
    pub before_call: bool,
    /// Implements [`Plugin::before_pay`].
    pub before_pay: bool,
    /// Implements [`Plugin::after_pay`].
    pub after_pay: bool,
}

impl Capabilities {
    /// Only `before_call`.
    pub const BEFORE_CALL: Self = Self {
        before_call: true,
        before_pay: false,
        after_pay: false,
    };

    /// Only `before_pay`.
    pub const BEFORE_PAY: Self = Self {
        before_call: false,
        before_pay: true,
        after_pay: false,
    };

    /// Both payment hooks.
    pub const PAYMENT: Self = Self {
        before_call: false,
        before_pay: true,
        after_pay: true,
    };
}

/// A named bundle of optional hooks.
///
/// Only the hooks flagged in [`Plugin::capabilities`] are invoked; the
/// default bodies are no-ops.
pub trait Plugin: Send + Sync {
    /// Name used in logs and abort errors.
    fn name(&self) -> &str;

    /// The hooks this plugin implements.
    fn capabilities(&self) -> Capabilities;

    /// Inspects or rewrites the request before it is resolved.
    fn before_call<'a>(&'a self, _request: &'a mut CallRequest) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    /// Approves or refuses a payment before it is submitted.
    fn before_pay<'a>(&'a self, _ctx: &'a PayContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    /// Observes a committed payment.
    fn after_pay<'a>(&'a self, _ctx: &'a PaidContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Ordered plugin list.
///
/// - **`before_*`**: first abort wins, remaining plugins are skipped.
/// - **`after_pay`**: every plugin runs; the first failure is returned.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl PluginChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin; it runs after all previously added ones.
    pub fn push(&mut self, plugin: impl Plugin + 'static) {
        self.plugins.push(Arc::new(plugin));
    }

    /// Appends a shared plugin.
    pub fn push_shared(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs every `before_call` hook in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginAbort`].
    pub async fn before_call(&self, request: &mut CallRequest) -> Result<(), PluginAbort> {
        for plugin in self.plugins.iter().filter(|p| p.capabilities().before_call) {
            plugin.before_call(request).await?;
        }
        Ok(())
    }

    /// Runs every `before_pay` hook in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginAbort`].
    pub async fn before_pay(&self, ctx: &PayContext) -> Result<(), PluginAbort> {
        for plugin in self.plugins.iter().filter(|p| p.capabilities().before_pay) {
            plugin.before_pay(ctx).await?;
        }
        Ok(())
    }

    /// Runs every `after_pay` hook in order, logging failures.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginAbort`] once all hooks have run.
    pub async fn after_pay(&self, ctx: &PaidContext) -> Result<(), PluginAbort> {
        let mut first = None;
        for plugin in self.plugins.iter().filter(|p| p.capabilities().after_pay) {
            if let Err(abort) = plugin.after_pay(ctx).await {
                tracing::warn!(
                    plugin = plugin.name(),
                    tx_id = %ctx.tx_id,
                    reason = %abort.reason,
                    "after_pay hook failed"
                );
                first.get_or_insert(abort);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<P: Plugin + 'static> FromIterator<P> for PluginChain {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            plugins: iter
                .into_iter()
                .map(|p| Arc::new(p) as Arc<dyn Plugin>)
                .collect(),
        }
    }
}
