//! Child-kernel bookkeeping for a composite kernel.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use polykernel_protocols::uri::normalize_kernel_uri;

use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, same_kernel};

/// Indexes a composite's children by name, alias, local URI, and, for
/// proxies, remote URI.
#[derive(Default)]
pub(crate) struct KernelCollection {
    kernels: Vec<Arc<dyn Kernel>>,
    by_name_or_alias: HashMap<String, Arc<dyn Kernel>>,
    by_local_uri: HashMap<String, Arc<dyn Kernel>>,
    by_remote_uri: HashMap<String, Arc<dyn Kernel>>,
}

impl KernelCollection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `kernel` under `base_uri`, indexing its name and every alias.
    ///
    /// Rejects the addition when the name or any alias already maps to a
    /// different kernel; nothing is indexed in that case. The kernel's URI
    /// is rewritten to `base_uri`/`local_name` as it joins.
    pub(crate) fn add(&mut self, kernel: Arc<dyn Kernel>, base_uri: &str) -> KernelResult<()> {
        let kernel_info = kernel.kernel_info();

        if self.maps_to_other_kernel(&kernel_info.local_name, &kernel) {
            return Err(KernelError::DuplicateKernelName(kernel_info.local_name));
        }
        for alias in &kernel_info.aliases {
            if self.maps_to_other_kernel(alias, &kernel) {
                return Err(KernelError::DuplicateKernelAlias(alias.clone()));
            }
        }

        self.by_name_or_alias
            .insert(kernel_info.local_name.clone(), Arc::clone(&kernel));
        for alias in &kernel_info.aliases {
            self.by_name_or_alias
                .insert(alias.clone(), Arc::clone(&kernel));
        }

        self.index_uris(&kernel, base_uri);
        self.kernels.push(kernel);
        Ok(())
    }

    /// Rewrites every child's URI under a new base and refreshes the URI
    /// indexes. Entries under the old base are left in place.
    pub(crate) fn reindex(&mut self, base_uri: &str) {
        let kernels = self.kernels.clone();
        for kernel in &kernels {
            self.index_uris(kernel, base_uri);
        }
    }

    pub(crate) fn try_get_by_alias(&self, name: &str) -> Option<Arc<dyn Kernel>> {
        self.by_name_or_alias.get(name).cloned()
    }

    /// Looks `normalized_uri` up among the children's local URIs, then
    /// among proxy remote URIs.
    pub(crate) fn try_get_by_uri(&self, normalized_uri: &str) -> Option<Arc<dyn Kernel>> {
        self.by_local_uri
            .get(normalized_uri)
            .or_else(|| self.by_remote_uri.get(normalized_uri))
            .cloned()
    }

    pub(crate) fn kernels(&self) -> Vec<Arc<dyn Kernel>> {
        self.kernels.clone()
    }

    pub(crate) fn single(&self) -> Option<Arc<dyn Kernel>> {
        match self.kernels.as_slice() {
            [kernel] => Some(Arc::clone(kernel)),
            _ => None,
        }
    }

    fn maps_to_other_kernel(&self, name: &str, kernel: &Arc<dyn Kernel>) -> bool {
        self.by_name_or_alias
            .get(name)
            .is_some_and(|existing| !same_kernel(existing.as_ref(), kernel.as_ref()))
    }

    fn index_uris(&mut self, kernel: &Arc<dyn Kernel>, base_uri: &str) {
        let kernel_info = kernel.kernel_info();

        let mut derived = base_uri.to_string();
        if !derived.ends_with('/') {
            derived.push('/');
        }
        derived.push_str(&kernel_info.local_name);
        match normalize_kernel_uri(&derived) {
            Ok(local_uri) => {
                kernel.core().set_uri(local_uri.clone());
                self.by_local_uri.insert(local_uri, Arc::clone(kernel));
            }
            Err(error) => {
                warn!(
                    "Could not derive a uri for kernel {} under {}: {error}",
                    kernel_info.local_name, base_uri
                );
            }
        }

        if let Some(remote_uri) = &kernel_info.remote_uri {
            match normalize_kernel_uri(remote_uri) {
                Ok(remote_uri) => {
                    self.by_remote_uri.insert(remote_uri, Arc::clone(kernel));
                }
                Err(error) => {
                    warn!(
                        "Could not index the remote uri of kernel {}: {error}",
                        kernel_info.local_name
                    );
                }
            }
        }
    }
}
