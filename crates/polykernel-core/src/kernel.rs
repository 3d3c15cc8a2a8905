//! The kernel contract and its base behavior.
//!
//! A kernel receives command envelopes, runs the registered handler for the
//! command type, and publishes event envelopes. [`KernelCore`] carries the
//! state every kernel shares: identity, handler registry, event bus, parent
//! link, and the lazily resolved scheduler of its tree. Concrete kernels
//! embed a core and override the [`Kernel`] trait methods whose behavior
//! they specialize.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use polykernel_protocols::commands::REQUEST_KERNEL_INFO;
use polykernel_protocols::events::{COMMAND_FAILED, COMMAND_SUCCEEDED, KERNEL_INFO_PRODUCED};
use polykernel_protocols::uri::normalize_kernel_uri;
use polykernel_protocols::{
    CommandFailed, KernelCommandEnvelope, KernelCommandInfo, KernelEventEnvelope, KernelInfo,
    update_kernel_info,
};

use crate::bus::KernelEventBus;
use crate::completion::CompletionSource;
use crate::context::{ContextSlot, KernelInvocationContext};
use crate::error::{KernelError, KernelResult};
use crate::scheduler::KernelScheduler;

/// What kind of kernel this is, as reflected in its descriptor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelType {
    Default,
    Composite,
    Proxy,
}

/// A single command being handled, bound to its invocation context.
#[derive(Clone)]
pub struct KernelCommandInvocation {
    pub command_envelope: KernelCommandEnvelope,
    pub context: Arc<KernelInvocationContext>,
}

/// Handles one command type for a kernel.
#[async_trait]
pub trait KernelCommandHandler: Send + Sync {
    async fn handle(&self, invocation: KernelCommandInvocation) -> KernelResult<()>;
}

struct FnHandler(
    Box<dyn Fn(KernelCommandInvocation) -> BoxFuture<'static, KernelResult<()>> + Send + Sync>,
);

#[async_trait]
impl KernelCommandHandler for FnHandler {
    async fn handle(&self, invocation: KernelCommandInvocation) -> KernelResult<()> {
        (self.0)(invocation).await
    }
}

/// Wraps an async closure as a [`KernelCommandHandler`].
pub fn command_handler_fn<F, Fut>(handler: F) -> Arc<dyn KernelCommandHandler>
where
    F: Fn(KernelCommandInvocation) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = KernelResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(Box::new(move |invocation| {
        Box::pin(handler(invocation))
    })))
}

/// State shared by every kernel flavor.
pub struct KernelCore {
    name: String,
    kernel_info: RwLock<KernelInfo>,
    // Insertion-ordered so the descriptor lists commands in registration order.
    handlers: Mutex<Vec<(String, Arc<dyn KernelCommandHandler>)>>,
    events: KernelEventBus,
    parent: OnceLock<Weak<dyn Kernel>>,
    self_ref: OnceLock<Weak<dyn Kernel>>,
    scheduler: OnceLock<Arc<KernelScheduler<KernelCommandEnvelope>>>,
    context_slot: Arc<ContextSlot>,
}

impl KernelCore {
    /// Seeds the descriptor for a kernel named `name` at
    /// `kernel://local/{name}`.
    pub fn new(name: impl Into<String>, kernel_type: KernelType) -> Self {
        let name = name.into();
        let raw_uri = format!("kernel://local/{name}");
        let uri = normalize_kernel_uri(&raw_uri).unwrap_or(raw_uri);
        let mut kernel_info = KernelInfo::new(name.clone(), uri);
        match kernel_type {
            KernelType::Composite => kernel_info.is_composite = true,
            KernelType::Proxy => kernel_info.is_proxy = true,
            KernelType::Default => {}
        }
        Self {
            name,
            kernel_info: RwLock::new(kernel_info),
            handlers: Mutex::new(Vec::new()),
            events: KernelEventBus::new(),
            parent: OnceLock::new(),
            self_ref: OnceLock::new(),
            scheduler: OnceLock::new(),
            context_slot: Arc::new(ContextSlot::new()),
        }
    }

    /// Stores the kernel's own weak handle and registers the built-in
    /// `RequestKernelInfo` handler. Constructors call this exactly once,
    /// right after wrapping the kernel in an [`Arc`].
    pub fn bind_self(&self, weak: Weak<dyn Kernel>) {
        let _ = self.self_ref.set(weak.clone());
        self.internal_register_command_handler(
            REQUEST_KERNEL_INFO,
            command_handler_fn(move |invocation| {
                let kernel = weak.upgrade();
                async move {
                    match kernel {
                        Some(kernel) => kernel.handle_request_kernel_info(&invocation).await,
                        None => Ok(()),
                    }
                }
            }),
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kernel's current URI. Owned by the parent composite (or its
    /// host) once the kernel joins a tree.
    pub fn uri(&self) -> String {
        self.kernel_info.read().uri.clone()
    }

    pub fn kernel_info(&self) -> KernelInfo {
        self.kernel_info.read().clone()
    }

    pub(crate) fn set_uri(&self, uri: impl Into<String>) {
        self.kernel_info.write().uri = uri.into();
    }

    pub(crate) fn set_remote_uri(&self, uri: impl Into<String>) {
        self.kernel_info.write().remote_uri = Some(uri.into());
    }

    pub(crate) fn set_language_info(
        &self,
        language_name: Option<String>,
        language_version: Option<String>,
    ) {
        let mut kernel_info = self.kernel_info.write();
        kernel_info.language_name = language_name;
        kernel_info.language_version = language_version;
    }

    /// Merges `incoming` into the descriptor per the kernel-info merge rule.
    pub fn merge_info_from(&self, incoming: &KernelInfo) {
        update_kernel_info(&mut self.kernel_info.write(), incoming);
    }

    /// Unions `supplied` into the descriptor's aliases, supplied names
    /// first, without duplicating any.
    pub(crate) fn merge_aliases(&self, supplied: &[String]) {
        let mut kernel_info = self.kernel_info.write();
        let mut merged: Vec<String> = Vec::new();
        for alias in supplied.iter().chain(kernel_info.aliases.iter()) {
            if !merged.contains(alias) {
                merged.push(alias.clone());
            }
        }
        kernel_info.aliases = merged;
    }

    pub fn events(&self) -> &KernelEventBus {
        &self.events
    }

    pub(crate) fn set_parent(&self, parent: &Arc<dyn Kernel>) {
        let _ = self.parent.set(Arc::downgrade(parent));
    }

    pub fn parent_kernel(&self) -> Option<Arc<dyn Kernel>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// The kernel as a shared trait object.
    pub fn as_dyn(&self) -> KernelResult<Arc<dyn Kernel>> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| KernelError::Internal("kernel self reference not initialized".into()))
    }

    /// The invocation-context slot of this kernel's tree. All kernels of a
    /// tree resolve to the root kernel's slot.
    pub fn context_slot(&self) -> Arc<ContextSlot> {
        let mut slot = Arc::clone(&self.context_slot);
        let mut parent = self.parent_kernel();
        while let Some(kernel) = parent {
            slot = Arc::clone(&kernel.core().context_slot);
            parent = kernel.core().parent_kernel();
        }
        slot
    }

    /// The scheduler serializing this kernel tree's commands. Resolved on
    /// first use: a kernel with a parent adopts its parent's scheduler.
    pub fn scheduler(&self) -> Arc<KernelScheduler<KernelCommandEnvelope>> {
        Arc::clone(self.scheduler.get_or_init(|| match self.parent_kernel() {
            Some(parent) => parent.core().scheduler(),
            None => Arc::new(KernelScheduler::new()),
        }))
    }

    pub fn supports_command(&self, command_type: &str) -> bool {
        self.handlers
            .lock()
            .iter()
            .any(|(registered, _)| registered == command_type)
    }

    pub(crate) fn command_handler(
        &self,
        command_type: &str,
    ) -> Option<Arc<dyn KernelCommandHandler>> {
        self.handlers
            .lock()
            .iter()
            .find(|(registered, _)| registered == command_type)
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Registers or replaces the handler for `command_type` and rebuilds
    /// the descriptor's supported-command list to match the registry.
    pub(crate) fn internal_register_command_handler(
        &self,
        command_type: impl Into<String>,
        handler: Arc<dyn KernelCommandHandler>,
    ) {
        let command_type = command_type.into();
        let supported: Vec<KernelCommandInfo>;
        {
            let mut handlers = self.handlers.lock();
            match handlers
                .iter_mut()
                .find(|(registered, _)| *registered == command_type)
            {
                Some(entry) => entry.1 = handler,
                None => handlers.push((command_type, handler)),
            }
            supported = handlers
                .iter()
                .map(|(registered, _)| KernelCommandInfo {
                    name: registered.clone(),
                })
                .collect();
        }
        self.kernel_info.write().supported_kernel_commands = supported;
    }
}

pub(crate) fn same_kernel(a: &dyn Kernel, b: &dyn Kernel) -> bool {
    std::ptr::eq(a.core(), b.core())
}

/// The behavior every kernel shares. Composite and proxy kernels override
/// the dispatch-related methods; everything else comes from the defaults.
#[async_trait]
pub trait Kernel: Send + Sync {
    fn core(&self) -> &KernelCore;

    fn kernel_type(&self) -> KernelType;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// A snapshot of the kernel's descriptor.
    fn kernel_info(&self) -> KernelInfo {
        self.core().kernel_info()
    }

    /// The kernel's own event stream.
    fn events(&self) -> &KernelEventBus {
        self.core().events()
    }

    fn supports_command(&self, command_type: &str) -> bool {
        self.core().supports_command(command_type)
    }

    fn get_command_handler(&self, command_type: &str) -> Option<Arc<dyn KernelCommandHandler>> {
        self.core().command_handler(command_type)
    }

    /// Whether this kernel is addressed by `envelope` and has a handler
    /// for it. A target name must equal the kernel's name; a destination
    /// URI must normalize to the kernel's URI.
    fn can_handle(&self, envelope: &KernelCommandEnvelope) -> bool {
        let command = envelope.command();
        if let Some(target) = &command.target_kernel_name {
            if target != self.core().name() {
                return false;
            }
        }
        if let Some(destination) = &command.destination_uri {
            match normalize_kernel_uri(destination) {
                Ok(normalized) if normalized == self.core().uri() => {}
                _ => return false,
            }
        }
        self.supports_command(envelope.command_type())
    }

    /// Resolves the kernel that should handle `envelope`. The base answer
    /// is this kernel if it can handle the command; otherwise the context
    /// is failed and no kernel is returned.
    fn get_handling_kernel(
        &self,
        envelope: &KernelCommandEnvelope,
        context: Option<&Arc<KernelInvocationContext>>,
    ) -> KernelResult<Option<Arc<dyn Kernel>>> {
        if self.can_handle(envelope) {
            return Ok(Some(self.core().as_dyn()?));
        }
        if let Some(context) = context {
            context.fail(format!(
                "Command {} is not supported by Kernel {}",
                envelope.command_type(),
                self.name()
            ));
        }
        Ok(None)
    }

    /// Registers `handler` for `command_type`. The first registration of a
    /// type announces the kernel's enlarged capabilities with a
    /// `KernelInfoProduced` event.
    fn register_command_handler(&self, command_type: &str, handler: Arc<dyn KernelCommandHandler>) {
        let core = self.core();
        let should_notify = !core.supports_command(command_type);
        core.internal_register_command_handler(command_type, handler);
        if should_notify {
            let event = KernelEventEnvelope::new(
                KERNEL_INFO_PRODUCED,
                json!({ "kernelInfo": core.kernel_info() }),
            );
            let kernel_uri = core.uri();
            if let Err(error) = event.stamp(&kernel_uri) {
                warn!("Failed to stamp {} on a KernelInfoProduced event: {error}", kernel_uri);
            }
            match core.context_slot().current() {
                Some(context) => {
                    event.set_command_if_absent(&context.command_envelope());
                    context.publish(&event);
                }
                None => core.events().publish(&event),
            }
        }
    }

    /// Publishes `event` on the kernel's own bus.
    fn publish_event(&self, event: &KernelEventEnvelope) {
        self.core().events().publish(event);
    }

    /// Answers `RequestKernelInfo` with this kernel's descriptor.
    async fn handle_request_kernel_info(
        &self,
        invocation: &KernelCommandInvocation,
    ) -> KernelResult<()> {
        let event = KernelEventEnvelope::with_command(
            KERNEL_INFO_PRODUCED,
            json!({ "kernelInfo": self.kernel_info() }),
            invocation.command_envelope.clone(),
        );
        invocation.context.publish(&event);
        Ok(())
    }

    /// Submits `envelope` to this kernel tree's scheduler and resolves
    /// once the command has settled.
    ///
    /// The command inherits the current context's token when one is
    /// active, gets an id, and is stamped as arrived at this kernel before
    /// it is scheduled; it is stamped as departed once handling finishes.
    async fn send(&self, envelope: KernelCommandEnvelope) -> KernelResult<()> {
        send_via(self.core().as_dyn()?, envelope).await
    }

    /// Runs `envelope` on this kernel immediately, inside the current
    /// invocation context.
    async fn handle_command(&self, envelope: KernelCommandEnvelope) -> KernelResult<()> {
        base_handle_command(self.core().as_dyn()?, envelope).await
    }
}

pub(crate) async fn send_via(
    kernel: Arc<dyn Kernel>,
    envelope: KernelCommandEnvelope,
) -> KernelResult<()> {
    let slot = kernel.core().context_slot();
    let inherited = slot
        .current()
        .filter(|context| !context.is_complete())
        .map(|context| context.command_envelope().get_or_create_token());
    envelope.ensure_token(inherited);
    envelope.ensure_id();

    let kernel_uri = kernel.core().uri();
    if !envelope.routing_slip_contains(&kernel_uri, false) {
        envelope.stamp_as_arrived(&kernel_uri)?;
    } else {
        warn!(
            "Trying to stamp {} as arrived but uri {} is already present.",
            envelope.command_type(),
            kernel_uri
        );
    }

    slot.establish(&envelope);

    let scheduler = kernel.core().scheduler();
    let executor_kernel = Arc::clone(&kernel);
    scheduler
        .run_async(envelope, move |envelope| async move {
            let result = execute_command(&executor_kernel, envelope.clone()).await;

            let kernel_uri = executor_kernel.core().uri();
            if !envelope.routing_slip_contains(&kernel_uri, false) {
                match envelope.stamp(&kernel_uri) {
                    Err(error) if result.is_ok() => return Err(error.into()),
                    _ => {}
                }
            } else {
                warn!(
                    "Trying to stamp {} as completed but uri {} is already present.",
                    envelope.command_type(),
                    kernel_uri
                );
            }
            result
        })
        .await
}

pub(crate) async fn execute_command(
    kernel: &Arc<dyn Kernel>,
    envelope: KernelCommandEnvelope,
) -> KernelResult<()> {
    let slot = kernel.core().context_slot();
    let context = slot.establish(&envelope);
    let previous = context.handling_kernel();

    let result = kernel.handle_command(envelope).await;
    if let Err(error) = &result {
        context.fail(error.to_string());
    }
    context.set_handling_kernel(previous);
    result
}

/// The default `handleCommand`: establish the context, run the registered
/// handler, and settle the context with the outcome. When the command is
/// the context's root, events published under the context are stamped with
/// this kernel's URI and republished on its bus, and the context is
/// disposed afterwards.
pub(crate) async fn base_handle_command(
    kernel: Arc<dyn Kernel>,
    envelope: KernelCommandEnvelope,
) -> KernelResult<()> {
    let slot = kernel.core().context_slot();
    let context = slot.establish(&envelope);
    let previous = context.handling_kernel();
    context.set_handling_kernel(Some(Arc::clone(&kernel)));

    let is_root_command = envelope.is_same_command_as(&context.command_envelope());
    let subscription = if is_root_command {
        let subscriber = Arc::clone(&kernel);
        Some(context.events().subscribe(move |event| {
            let kernel_uri = subscriber.core().uri();
            if !event.routing_slip_contains(&kernel_uri, false) {
                if let Err(error) = event.stamp(&kernel_uri) {
                    warn!(
                        "Failed to stamp {} on a {} event: {error}",
                        kernel_uri,
                        event.event_type()
                    );
                }
            }
            subscriber.core().events().publish(&event);
        }))
    } else {
        None
    };

    let result = match kernel.get_command_handler(envelope.command_type()) {
        Some(handler) => {
            let invocation = KernelCommandInvocation {
                command_envelope: envelope.clone(),
                context: Arc::clone(&context),
            };
            match handler.handle(invocation).await {
                Ok(()) => {
                    context.complete(&envelope);
                    Ok(())
                }
                Err(error) => {
                    context.fail(error.to_string());
                    Err(error)
                }
            }
        }
        None => {
            let error = KernelError::HandlerNotFound(envelope.command_type().to_string());
            // Fail before the root epilogue below disposes the context, or
            // disposal would settle the command as succeeded.
            context.fail(error.to_string());
            Err(error)
        }
    };

    context.set_handling_kernel(previous);
    if is_root_command {
        drop(subscription);
        context.dispose();
    }
    result
}

/// Sends `envelope` and resolves with the payload of the first event of
/// `expected_event_type` the command produces.
///
/// The command failing, or succeeding without having produced the expected
/// event, resolves to an error instead.
pub async fn submit_command_and_get_result<TEvent, K>(
    kernel: &K,
    envelope: KernelCommandEnvelope,
    expected_event_type: &str,
) -> KernelResult<TEvent>
where
    TEvent: DeserializeOwned,
    K: Kernel + ?Sized,
{
    let completion: Arc<CompletionSource<KernelResult<serde_json::Value>>> =
        Arc::new(CompletionSource::new());

    let observer = Arc::clone(&completion);
    let command = envelope.clone();
    let expected = expected_event_type.to_string();
    let subscription = kernel.events().subscribe(move |event| {
        let Some(event_command) = event.command() else {
            return;
        };
        if event_command.token() != command.token() {
            return;
        }
        if event.event_type() == COMMAND_FAILED {
            let message = event
                .event_as::<CommandFailed>()
                .map(|failed| failed.message)
                .unwrap_or_default();
            observer.resolve(Err(KernelError::CommandFailed { message }));
        } else if event.event_type() == COMMAND_SUCCEEDED
            && event_command.is_same_command_as(&command)
        {
            observer.resolve(Err(KernelError::NoResultProduced));
        } else if event.event_type() == expected {
            observer.resolve(Ok(event.event().clone()));
        }
    });

    let send_result = kernel.send(envelope).await;
    drop(subscription);
    send_result?;

    match completion.wait().await {
        Some(Ok(payload)) => {
            serde_json::from_value(payload).map_err(|error| KernelError::Internal(error.to_string()))
        }
        Some(Err(error)) => Err(error),
        None => Err(KernelError::NoResultProduced),
    }
}

/// A leaf kernel: handlers are registered on it directly.
pub struct DefaultKernel {
    core: KernelCore,
}

impl DefaultKernel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_language(name, None, None)
    }

    /// A leaf kernel that reports the language it executes.
    pub fn with_language(
        name: impl Into<String>,
        language_name: Option<String>,
        language_version: Option<String>,
    ) -> Arc<Self> {
        let core = KernelCore::new(name, KernelType::Default);
        if language_name.is_some() || language_version.is_some() {
            core.set_language_info(language_name, language_version);
        }
        let kernel = Arc::new(Self { core });
        let weak = Arc::downgrade(&kernel) as Weak<dyn Kernel>;
        kernel.core.bind_self(weak);
        kernel
    }
}

#[async_trait]
impl Kernel for DefaultKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Default
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
