//! Sender/receiver pairing with passively-learned reachability.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use polykernel_protocols::events::KERNEL_INFO_PRODUCED;
use polykernel_protocols::uri::extract_host_root;
use polykernel_protocols::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelInfoProduced, KernelMessage,
};

/// One transport pair and the set of remote host roots reachable through it.
///
/// Reachability is learned passively from inbound traffic: a
/// `KernelInfoProduced` event whose kernel info carries no `remoteUri`
/// describes a kernel living at the remote end, so its `uri` names a
/// reachable host root, and the first routing-slip entry of any event names
/// the host its journey started from. Seeded roots can be supplied up front
/// for connectors whose peers are known before any traffic flows.
pub struct Connector {
    sender: Arc<dyn KernelCommandAndEventSender>,
    receiver: Arc<dyn KernelCommandAndEventReceiver>,
    remote_host_uris: Arc<Mutex<HashSet<String>>>,
    listener: JoinHandle<()>,
}

impl Connector {
    /// Pairs a sender and receiver, seeding reachability from `remote_uris`,
    /// and starts listening for roots the remote peer reveals.
    pub fn new(
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
        remote_uris: &[String],
    ) -> Self {
        let seeded: HashSet<String> = remote_uris
            .iter()
            .filter_map(|uri| extract_host_root(uri))
            .collect();
        let remote_host_uris = Arc::new(Mutex::new(seeded));

        let learned = Arc::clone(&remote_host_uris);
        let mut messages = receiver.subscribe();
        let listener = tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(KernelMessage::Event(event)) => {
                        if event.event_type == KERNEL_INFO_PRODUCED {
                            let produced: Result<KernelInfoProduced, _> =
                                serde_json::from_value(event.event.clone());
                            if let Ok(produced) = produced {
                                if produced.kernel_info.remote_uri.is_none() {
                                    if let Some(root) = extract_host_root(&produced.kernel_info.uri)
                                    {
                                        learned.lock().insert(root);
                                    }
                                }
                            }
                        }
                        if let Some(origin) = event.routing_slip.first() {
                            if let Some(root) = extract_host_root(origin) {
                                learned.lock().insert(root);
                            }
                        }
                    }
                    Ok(KernelMessage::Command(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connector receiver lagged, {skipped} messages were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            sender,
            receiver,
            remote_host_uris,
            listener,
        }
    }

    pub fn sender(&self) -> Arc<dyn KernelCommandAndEventSender> {
        Arc::clone(&self.sender)
    }

    pub fn receiver(&self) -> Arc<dyn KernelCommandAndEventReceiver> {
        Arc::clone(&self.receiver)
    }

    /// The host roots currently known to be reachable through this pair.
    pub fn remote_host_uris(&self) -> Vec<String> {
        self.remote_host_uris.lock().iter().cloned().collect()
    }

    /// Records `remote_uri`'s host root as reachable.
    pub fn add_remote_host_uri(&self, remote_uri: &str) {
        if let Some(root) = extract_host_root(remote_uri) {
            self.remote_host_uris.lock().insert(root);
        }
    }

    /// True when `remote_uri` lives under a known host root.
    pub fn can_reach(&self, remote_uri: &str) -> bool {
        extract_host_root(remote_uri)
            .is_some_and(|root| self.remote_host_uris.lock().contains(&root))
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
#[path = "connector_tests.rs"]
mod tests;
