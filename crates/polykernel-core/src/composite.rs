//! A kernel that routes commands to child kernels.
//!
//! The composite owns the tree: children are added with optional aliases,
//! get their URIs derived from the composite's (or its host's) URI, and
//! have their events republished on the composite's bus with the
//! composite's stamp on the routing slip. Command dispatch resolves the
//! handling child from the command's destination URI, target name, per-type
//! defaults, or the tree's shape.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{error, warn};

use polykernel_protocols::commands::REQUEST_KERNEL_INFO;
use polykernel_protocols::events::KERNEL_INFO_PRODUCED;
use polykernel_protocols::uri::normalize_kernel_uri;
use polykernel_protocols::{KernelCommand, KernelCommandEnvelope, KernelEventEnvelope};

use crate::bus::Subscription;
use crate::collection::KernelCollection;
use crate::context::KernelInvocationContext;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{
    Kernel, KernelCommandInvocation, KernelCore, KernelType, base_handle_command, same_kernel,
};

/// The root of a kernel tree: a kernel whose job is dispatching to its
/// children.
pub struct CompositeKernel {
    core: KernelCore,
    collection: RwLock<KernelCollection>,
    default_kernel_name: Mutex<Option<String>>,
    default_kernel_names_by_command_type: Mutex<HashMap<String, String>>,
    host_uri: Mutex<Option<String>>,
    child_subscriptions: Mutex<Vec<Subscription>>,
}

impl CompositeKernel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let kernel = Arc::new(Self {
            core: KernelCore::new(name, KernelType::Composite),
            collection: RwLock::new(KernelCollection::new()),
            default_kernel_name: Mutex::new(None),
            default_kernel_names_by_command_type: Mutex::new(HashMap::new()),
            host_uri: Mutex::new(None),
            child_subscriptions: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&kernel) as Weak<dyn Kernel>;
        kernel.core.bind_self(weak);
        kernel
    }

    /// Adds `kernel` as a child, reachable under its name and `aliases`.
    ///
    /// The first child added becomes the default target for commands that
    /// name no kernel. The child's events start flowing to the composite's
    /// bus, and a `KernelInfoProduced` event announces the addition.
    pub fn add(&self, kernel: Arc<dyn Kernel>, aliases: &[String]) -> KernelResult<()> {
        {
            let mut default_kernel_name = self.default_kernel_name.lock();
            if default_kernel_name.is_none() {
                *default_kernel_name = Some(kernel.name().to_string());
            }
        }

        let self_dyn = self.core.as_dyn()?;
        kernel.core().set_parent(&self_dyn);

        let composite = Arc::downgrade(&self_dyn);
        let subscription = kernel.events().subscribe(move |event| {
            let Some(composite) = composite.upgrade() else {
                return;
            };
            let kernel_uri = composite.core().uri();
            if !event.routing_slip_contains(&kernel_uri, false) {
                if let Err(error) = event.stamp(&kernel_uri) {
                    warn!(
                        "Failed to stamp {} on a {} event: {error}",
                        kernel_uri,
                        event.event_type()
                    );
                }
            }
            composite.core().events().publish(&event);
        });
        self.child_subscriptions.lock().push(subscription);

        if !aliases.is_empty() {
            kernel.core().merge_aliases(aliases);
        }

        let base_uri = self.base_uri();
        self.collection
            .write()
            .add(Arc::clone(&kernel), &base_uri)?;

        let event = KernelEventEnvelope::new(
            KERNEL_INFO_PRODUCED,
            json!({ "kernelInfo": kernel.kernel_info() }),
        );
        match self.core.context_slot().current() {
            Some(context) => {
                event.set_command_if_absent(&context.command_envelope());
                context.publish(&event);
            }
            None => self.core.events().publish(&event),
        }
        Ok(())
    }

    /// The kernel commands with no target default to, when the command type
    /// has no default of its own.
    pub fn default_kernel_name(&self) -> Option<String> {
        self.default_kernel_name.lock().clone()
    }

    pub fn set_default_kernel_name(&self, name: impl Into<String>) {
        *self.default_kernel_name.lock() = Some(name.into());
    }

    /// Routes future untargeted commands of `command_type` to
    /// `kernel_name`.
    pub fn set_default_target_kernel_name_for_command(
        &self,
        command_type: impl Into<String>,
        kernel_name: impl Into<String>,
    ) {
        self.default_kernel_names_by_command_type
            .lock()
            .insert(command_type.into(), kernel_name.into());
    }

    pub fn child_kernels(&self) -> Vec<Arc<dyn Kernel>> {
        self.collection.read().kernels()
    }

    /// This kernel or a direct child whose local or remote URI matches.
    pub fn find_kernel_by_uri(&self, uri: &str) -> Option<Arc<dyn Kernel>> {
        let normalized = normalize_kernel_uri(uri).ok()?;
        if normalized == self.core.uri() {
            return self.core.as_dyn().ok();
        }
        self.collection.read().try_get_by_uri(&normalized)
    }

    /// This kernel or a direct child whose name or alias matches.
    pub fn find_kernel_by_name(&self, name: &str) -> Option<Arc<dyn Kernel>> {
        let kernel_info = self.core.kernel_info();
        if kernel_info.local_name == name || kernel_info.aliases.iter().any(|alias| alias == name) {
            return self.core.as_dyn().ok();
        }
        self.collection.read().try_get_by_alias(name)
    }

    /// Every kernel of this tree (itself included) matching `predicate`.
    pub fn find_kernels(&self, predicate: impl Fn(&dyn Kernel) -> bool) -> Vec<Arc<dyn Kernel>> {
        let mut found = Vec::new();
        if let Ok(self_dyn) = self.core.as_dyn() {
            if predicate(self_dyn.as_ref()) {
                found.push(self_dyn);
            }
        }
        for kernel in self.collection.read().kernels() {
            if predicate(kernel.as_ref()) {
                found.push(kernel);
            }
        }
        found
    }

    pub fn find_kernel(&self, predicate: impl Fn(&dyn Kernel) -> bool) -> Option<Arc<dyn Kernel>> {
        self.find_kernels(predicate).into_iter().next()
    }

    /// The URI of the host this tree is attached to, if any.
    pub fn host_uri(&self) -> Option<String> {
        self.host_uri.lock().clone()
    }

    /// Called when a host takes ownership of the tree: the composite takes
    /// the host's URI and every child URI is re-derived under it.
    pub fn attach_host(&self, host_uri: &str) -> KernelResult<()> {
        let normalized = normalize_kernel_uri(host_uri)?;
        *self.host_uri.lock() = Some(normalized.clone());
        self.core.set_uri(normalized.clone());
        self.collection.write().reindex(&normalized);
        Ok(())
    }

    fn base_uri(&self) -> String {
        self.host_uri
            .lock()
            .clone()
            .unwrap_or_else(|| self.core.uri())
    }
}

#[async_trait]
impl Kernel for CompositeKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Composite
    }

    /// Resolves the child (or the composite itself) that should handle
    /// `envelope`.
    ///
    /// Resolution order: destination URI; the composite itself when no
    /// target is named and it can handle the command; the named target or
    /// the applicable default, which must exist; a sole child; the
    /// context's current handling kernel; the composite as a last resort.
    fn get_handling_kernel(
        &self,
        envelope: &KernelCommandEnvelope,
        context: Option<&Arc<KernelInvocationContext>>,
    ) -> KernelResult<Option<Arc<dyn Kernel>>> {
        if let Some(destination_uri) = envelope.destination_uri() {
            let normalized = normalize_kernel_uri(&destination_uri)?;
            if let Some(kernel) = self.collection.read().try_get_by_uri(&normalized) {
                return Ok(Some(kernel));
            }
        }

        let mut target = envelope.target_kernel_name();
        let mut kernel: Option<Arc<dyn Kernel>> = None;

        if target.is_none() {
            if self.can_handle(envelope) {
                return Ok(Some(self.core.as_dyn()?));
            }
            target = self
                .default_kernel_names_by_command_type
                .lock()
                .get(envelope.command_type())
                .cloned()
                .or_else(|| self.default_kernel_name());
        }

        if let Some(name) = &target {
            kernel = self.collection.read().try_get_by_alias(name);
            if kernel.is_none() {
                error!("Kernel not found: {name}");
                return Err(KernelError::KernelNotFound(name.clone()));
            }
        }

        if kernel.is_none() {
            kernel = self.collection.read().single();
        }
        if kernel.is_none() {
            kernel = context.and_then(|context| context.handling_kernel());
        }
        match kernel {
            Some(kernel) => Ok(Some(kernel)),
            None => Ok(Some(self.core.as_dyn()?)),
        }
    }

    /// Dispatches `envelope`: handled by the composite itself when it is
    /// the target, otherwise routed to the resolved child, whose arrival
    /// and departure are stamped onto the command's routing slip.
    async fn handle_command(&self, envelope: KernelCommandEnvelope) -> KernelResult<()> {
        let slot = self.core.context_slot();
        let context = slot.current();

        let target = envelope.target_kernel_name();
        let kernel = if target.as_deref() == Some(self.core.name()) {
            Some(self.core.as_dyn()?)
        } else {
            self.get_handling_kernel(&envelope, context.as_ref())?
        };

        let previous = context
            .as_ref()
            .and_then(|context| context.handling_kernel());

        match kernel {
            Some(kernel) if same_kernel(kernel.as_ref(), self) => {
                if let Some(context) = &context {
                    context.set_handling_kernel(Some(Arc::clone(&kernel)));
                }
                let result = base_handle_command(kernel, envelope).await;
                if let Some(context) = &context {
                    context.set_handling_kernel(previous);
                }
                result
            }
            Some(kernel) => {
                if let Some(context) = &context {
                    context.set_handling_kernel(Some(Arc::clone(&kernel)));
                }

                let kernel_uri = kernel.core().uri();
                if !envelope.routing_slip_contains(&kernel_uri, false) {
                    if let Err(error) = envelope.stamp_as_arrived(&kernel_uri) {
                        if let Some(context) = &context {
                            context.set_handling_kernel(previous);
                        }
                        return Err(error.into());
                    }
                } else {
                    warn!(
                        "Trying to stamp {} as arrived but uri {} is already present.",
                        envelope.command_type(),
                        kernel_uri
                    );
                }

                let result = kernel.handle_command(envelope.clone()).await;

                if let Some(context) = &context {
                    context.set_handling_kernel(previous);
                }
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
            }
            None => Err(KernelError::KernelNotFound(target.unwrap_or_default())),
        }
    }

    /// Publishes the composite's own descriptor, then fans the request out
    /// to every child that supports it. Child requests continue the
    /// incoming command's routing slip.
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

        let children = self.collection.read().kernels();
        for child in children {
            if !child.supports_command(REQUEST_KERNEL_INFO) {
                continue;
            }
            let child_envelope = KernelCommandEnvelope::new(
                REQUEST_KERNEL_INFO,
                KernelCommand::for_target(child.name()),
            );
            child_envelope
                .continue_routing_slip_with(&invocation.command_envelope.routing_slip_entries())?;
            child.handle_command(child_envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "composite_tests.rs"]
mod tests;
