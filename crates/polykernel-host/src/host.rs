//! Binds a composite kernel tree to the transports of its process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use polykernel_core::{CompositeKernel, Kernel, KernelScheduler, ProxyKernel, Subscription};
use polykernel_protocols::events::{KERNEL_INFO_PRODUCED, KERNEL_READY};
use polykernel_protocols::uri::{extract_host_root, normalize_kernel_uri};
use polykernel_protocols::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandEnvelope,
    KernelEventEnvelope, KernelInfo, KernelInfoProduced, KernelMessage, KernelReady,
    TransportError,
};

use crate::connector::Connector;
use crate::error::{HostError, HostResult};

/// Background work started by [`KernelHost::connect`].
///
/// Dropping it stops event forwarding and inbound dispatch.
struct ConnectionTasks {
    _events: Subscription,
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl Drop for ConnectionTasks {
    fn drop(&mut self) {
        self.outbound.abort();
        self.inbound.abort();
    }
}

/// Owns a [`CompositeKernel`] on behalf of one process and wires it to the
/// transports that reach other processes.
///
/// Constructing a host re-roots every kernel URI in the tree under the
/// host's own URI. [`connect`](KernelHost::connect) then bridges the tree to
/// the default transport pair: local events flow out through the sender,
/// inbound commands are scheduled onto the tree, and the remote peer is
/// greeted with `KernelReady` followed by a `KernelInfoProduced` per kernel.
/// Additional transports join through
/// [`try_add_connector`](KernelHost::try_add_connector), and
/// [`connect_proxy_kernel`](KernelHost::connect_proxy_kernel) grafts local
/// stand-ins for kernels living behind any of them.
pub struct KernelHost {
    kernel: Arc<CompositeKernel>,
    uri: String,
    scheduler: Arc<KernelScheduler<KernelCommandEnvelope>>,
    default_connector: Arc<Connector>,
    connectors: Mutex<Vec<Arc<Connector>>>,
    kernels_by_remote_uri: Mutex<HashMap<String, Arc<dyn Kernel>>>,
    kernels_by_origin_uri: Mutex<HashMap<String, Arc<dyn Kernel>>>,
    kernel_infos_by_name: Mutex<HashMap<String, KernelInfo>>,
    connection: Mutex<Option<ConnectionTasks>>,
}

impl KernelHost {
    /// Wraps `kernel`, re-rooting its URIs under `host_uri`, and pairs the
    /// supplied transport halves as the default connector.
    ///
    /// An empty `host_uri` defaults to `kernel://<composite name>`.
    pub fn new(
        kernel: Arc<CompositeKernel>,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
        host_uri: &str,
    ) -> HostResult<Self> {
        let uri = if host_uri.is_empty() {
            normalize_kernel_uri(&format!("kernel://{}", kernel.name()))?
        } else {
            normalize_kernel_uri(host_uri)?
        };
        kernel.attach_host(&uri)?;

        let default_connector = Arc::new(Connector::new(sender, receiver, &[]));
        Ok(Self {
            kernel,
            uri,
            scheduler: Arc::new(KernelScheduler::new()),
            default_connector: Arc::clone(&default_connector),
            connectors: Mutex::new(vec![default_connector]),
            kernels_by_remote_uri: Mutex::new(HashMap::new()),
            kernels_by_origin_uri: Mutex::new(HashMap::new()),
            kernel_infos_by_name: Mutex::new(HashMap::new()),
            connection: Mutex::new(None),
        })
    }

    /// This host's own normalized URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The composite kernel this host serves.
    pub fn kernel(&self) -> &Arc<CompositeKernel> {
        &self.kernel
    }

    pub fn default_connector(&self) -> &Arc<Connector> {
        &self.default_connector
    }

    /// Bridges the kernel tree to the default connector and greets the peer.
    ///
    /// Every event the composite kernel publishes is forwarded out through
    /// the default sender, in publish order. Every inbound command envelope
    /// is submitted to this host's scheduler, whose executor hands it to the
    /// composite kernel; events arriving on the same channel are left to the
    /// proxy kernels subscribed to it. Once the bridge is up, the peer is
    /// sent a `KernelReady` stamped with this host's URI and then one
    /// `KernelInfoProduced` per kernel in the tree.
    pub async fn connect(&self) -> HostResult<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<KernelEventEnvelope>();
        let events = self.kernel.events().subscribe(move |event| {
            let _ = event_tx.send(event);
        });

        let sender = self.default_connector.sender();
        let host_uri = self.uri.clone();
        let outbound = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!("host {} forwarding event {}", host_uri, event.event_type());
                let message = KernelMessage::Event(event.to_model());
                if let Err(error) = sender.send(message).await {
                    warn!("Failed to forward an event to the remote peer: {error}");
                }
            }
        });

        let kernel = Arc::clone(&self.kernel);
        let scheduler = Arc::clone(&self.scheduler);
        let mut messages = self.default_connector.receiver().subscribe();
        let inbound = tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(KernelMessage::Command(model)) => {
                        let envelope = KernelCommandEnvelope::from_model(model);
                        info!("host dispatching inbound command {}", envelope.command_type());
                        let target = Arc::clone(&kernel);
                        // The scheduler enqueues before run_async returns;
                        // nobody awaits the outcome of remote submissions.
                        let submission = scheduler
                            .run_async(envelope, move |envelope| async move {
                                target.send(envelope).await
                            });
                        drop(submission);
                    }
                    Ok(KernelMessage::Event(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Host receiver lagged, {skipped} inbound messages were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        *self.connection.lock() = Some(ConnectionTasks {
            _events: events,
            outbound,
            inbound,
        });

        let ready = KernelReady {
            kernel_infos: self.kernel_infos_for_ready(),
        };
        let payload = serde_json::to_value(&ready).map_err(TransportError::from)?;
        let envelope = KernelEventEnvelope::new(KERNEL_READY, payload);
        let root_uri = self.kernel.kernel_info().uri;
        envelope.stamp(&root_uri)?;
        self.default_connector
            .sender()
            .send(KernelMessage::Event(envelope.to_model()))
            .await?;

        self.publish_kernel_info().await?;
        Ok(())
    }

    /// Sends a `KernelInfoProduced` for every kernel in the tree to the peer.
    pub async fn publish_kernel_info(&self) -> HostResult<()> {
        let sender = self.default_connector.sender();
        for event in self.kernel_info_produced()? {
            sender.send(KernelMessage::Event(event.to_model())).await?;
        }
        Ok(())
    }

    /// Kernel infos for the whole tree, the composite's own first.
    pub fn kernel_infos(&self) -> Vec<KernelInfo> {
        let mut infos = vec![self.kernel.kernel_info()];
        infos.extend(
            self.kernel
                .child_kernels()
                .into_iter()
                .map(|child| child.kernel_info()),
        );
        infos
    }

    /// A `KernelInfoProduced` envelope per kernel, each stamped with the
    /// described kernel's URI.
    pub fn kernel_info_produced(&self) -> HostResult<Vec<KernelEventEnvelope>> {
        self.kernel_infos()
            .into_iter()
            .map(|kernel_info| {
                let uri = kernel_info.uri.clone();
                let payload = serde_json::to_value(&KernelInfoProduced { kernel_info })
                    .map_err(TransportError::from)?;
                let event = KernelEventEnvelope::new(KERNEL_INFO_PRODUCED, payload);
                event.stamp(&uri)?;
                Ok(event)
            })
            .collect()
    }

    /// Resolves the kernel an inbound envelope addresses.
    ///
    /// Resolution order: destination URI, origin URI, target kernel name,
    /// and finally the root composite.
    pub fn get_kernel(&self, envelope: &KernelCommandEnvelope) -> Arc<dyn Kernel> {
        let uri_to_lookup = envelope.destination_uri().or_else(|| envelope.origin_uri());
        let mut kernel =
            uri_to_lookup.and_then(|uri| self.kernel.find_kernel_by_uri(&uri));
        if kernel.is_none() {
            if let Some(target) = envelope.target_kernel_name() {
                kernel = self.kernel.find_kernel_by_name(&target);
            }
        }
        let kernel = kernel.unwrap_or_else(|| Arc::clone(&self.kernel) as Arc<dyn Kernel>);
        info!("Using kernel {}", kernel.name());
        kernel
    }

    /// Registers a further transport pair, unless one of its remote URIs is
    /// already served.
    ///
    /// A pair declaring no remote URIs is always added, as a catch-all that
    /// learns its reachability from traffic. A pair declaring remote URIs is
    /// added only when none of them is reachable through an existing
    /// connector, so the first connector to claim a peer keeps it.
    pub fn try_add_connector(
        &self,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
        remote_uris: Option<&[String]>,
    ) -> bool {
        let mut connectors = self.connectors.lock();
        match remote_uris {
            None => {
                connectors.push(Arc::new(Connector::new(sender, receiver, &[])));
                true
            }
            Some(uris) => {
                let already_reachable = uris
                    .iter()
                    .any(|uri| connectors.iter().any(|connector| connector.can_reach(uri)));
                if already_reachable {
                    return false;
                }
                connectors.push(Arc::new(Connector::new(sender, receiver, uris)));
                true
            }
        }
    }

    /// The first registered connector that can reach `remote_uri`.
    pub fn try_get_connector(&self, remote_uri: &str) -> Option<Arc<Connector>> {
        self.connectors
            .lock()
            .iter()
            .find(|connector| connector.can_reach(remote_uri))
            .cloned()
    }

    /// Adds a proxy kernel for `remote_kernel_uri` over whichever connector
    /// reaches it.
    pub fn connect_proxy_kernel(
        &self,
        local_name: &str,
        remote_kernel_uri: &str,
        aliases: &[String],
    ) -> HostResult<Arc<ProxyKernel>> {
        let connector = self
            .try_get_connector(remote_kernel_uri)
            .ok_or_else(|| HostError::ConnectorNotFound(remote_kernel_uri.to_string()))?;
        self.add_proxy_kernel(local_name, &connector, Some(remote_kernel_uri), aliases)
    }

    /// Adds a proxy kernel bound to the default connector.
    pub fn connect_proxy_kernel_on_default_connector(
        &self,
        local_name: &str,
        remote_kernel_uri: Option<&str>,
        aliases: &[String],
    ) -> HostResult<Arc<ProxyKernel>> {
        let connector = Arc::clone(&self.default_connector);
        self.add_proxy_kernel(local_name, &connector, remote_kernel_uri, aliases)
    }

    fn add_proxy_kernel(
        &self,
        local_name: &str,
        connector: &Arc<Connector>,
        remote_kernel_uri: Option<&str>,
        aliases: &[String],
    ) -> HostResult<Arc<ProxyKernel>> {
        let kernel = ProxyKernel::new(local_name, connector.sender(), connector.receiver());
        if let Some(remote_uri) = remote_kernel_uri {
            kernel.set_remote_uri(remote_uri);
            self.kernels_by_remote_uri
                .lock()
                .insert(remote_uri.to_string(), Arc::clone(&kernel) as Arc<dyn Kernel>);
        }
        self.kernel
            .add(Arc::clone(&kernel) as Arc<dyn Kernel>, aliases)?;
        Ok(kernel)
    }

    /// Makes sure the tree has a kernel for `kernel_info` from a remote host.
    ///
    /// A proxy info pointing back into this host is ignored. Otherwise the
    /// info's remote URI (for proxies) or own URI identifies the kernel: a
    /// miss grafts a fresh proxy over whichever connector reaches that URI,
    /// and an existing proxy has the incoming info merged into its own.
    pub fn ensure_or_update_proxy_for_kernel_info(
        &self,
        kernel_info: &KernelInfo,
    ) -> HostResult<()> {
        if kernel_info.is_proxy {
            let remote_root = kernel_info
                .remote_uri
                .as_deref()
                .and_then(extract_host_root);
            let own_root = extract_host_root(&self.kernel.kernel_info().uri);
            if remote_root.is_some() && remote_root == own_root {
                warn!(
                    "Skipping proxy creation for {}, its remote is this host",
                    kernel_info.local_name
                );
                return Ok(());
            }
        }

        let uri_to_lookup = if kernel_info.is_proxy {
            kernel_info.remote_uri.clone()
        } else {
            Some(kernel_info.uri.clone())
        };
        let Some(uri_to_lookup) = uri_to_lookup else {
            return Ok(());
        };

        let kernel = match self.kernel.find_kernel_by_uri(&uri_to_lookup) {
            Some(kernel) => kernel,
            None => {
                info!(
                    "creating proxy {} for remote kernel at {}",
                    kernel_info.local_name, uri_to_lookup
                );
                let proxy = self.connect_proxy_kernel(
                    &kernel_info.local_name,
                    &uri_to_lookup,
                    &kernel_info.aliases,
                )?;
                proxy.core().merge_info_from(kernel_info);
                return Ok(());
            }
        };
        if kernel.kernel_info().is_proxy {
            kernel.core().merge_info_from(kernel_info);
        }
        Ok(())
    }

    /// Records `kernel_info` for `kernel`, re-rooted under this host's URI.
    pub fn add_kernel_info(
        &self,
        kernel: &Arc<dyn Kernel>,
        mut kernel_info: KernelInfo,
    ) -> HostResult<()> {
        let uri = normalize_kernel_uri(&format!("{}{}", self.uri, kernel.name()))?;
        kernel_info.uri = uri.clone();
        self.kernel_infos_by_name
            .lock()
            .insert(kernel.name().to_string(), kernel_info);
        self.kernels_by_origin_uri
            .lock()
            .insert(uri, Arc::clone(kernel));
        Ok(())
    }

    pub fn try_get_kernel_info(&self, kernel: &dyn Kernel) -> Option<KernelInfo> {
        self.kernel_infos_by_name.lock().get(kernel.name()).cloned()
    }

    pub fn try_get_kernel_by_remote_uri(&self, remote_uri: &str) -> Option<Arc<dyn Kernel>> {
        self.kernels_by_remote_uri.lock().get(remote_uri).cloned()
    }

    pub fn try_get_kernel_by_origin_uri(&self, origin_uri: &str) -> Option<Arc<dyn Kernel>> {
        self.kernels_by_origin_uri.lock().get(origin_uri).cloned()
    }

    fn kernel_infos_for_ready(&self) -> Vec<KernelInfo> {
        let mut infos = vec![self.kernel.kernel_info()];
        infos.extend(
            self.kernel
                .child_kernels()
                .into_iter()
                .map(|child| child.kernel_info())
                .filter(|info| !info.is_proxy),
        );
        infos
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
