//! A loaded package together with the typed resources being edited.

use std::{
    fmt::{self, Debug},
    path::{Path, PathBuf},
    sync::Arc,
};

use dbpf_package::{read::Package, ResourceKey};
use dbpf_resource::Resource;
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    error::{Error, Result},
    source::Source,
};

/// A package opened through a [`PackageService`](crate::PackageService)
///
/// Typed resources handed to [`PackageHandle::track`] are written back by the next save if
/// they were changed.
pub struct PackageHandle {
    pub(crate) package: Arc<Package<Source>>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) tracked: IndexMap<ResourceKey, Box<dyn Resource>>,
}

impl Debug for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PackageHandle")
            .field("path", &self.path)
            .field("package", &self.package)
            .field("tracked", &self.tracked.len())
            .finish()
    }
}

impl PackageHandle {
    pub(crate) fn new(package: Package<Source>, path: Option<PathBuf>) -> Self {
        Self {
            package: Arc::new(package),
            path,
            tracked: IndexMap::new(),
        }
    }

    /// The underlying package
    pub fn package(&self) -> &Package<Source> {
        &self.package
    }

    /// File the package was loaded from or last saved to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Keys of every resource in the package, in index order
    pub fn enumerate(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.package.enumerate()
    }

    /// Whether a save would write anything new
    pub fn is_modified(&self) -> bool {
        self.package.is_modified() || self.tracked.values().any(|r| r.is_changed())
    }

    fn package_mut(&mut self) -> Result<&mut Package<Source>> {
        Arc::get_mut(&mut self.package).ok_or(Error::PackageBusy)
    }

    /// Add raw resource bytes, replacing any existing resource and any tracked resource
    /// with the same key
    pub fn add_resource(&mut self, key: ResourceKey, data: impl Into<Arc<[u8]>>) -> Result<bool> {
        let replaced = self.package_mut()?.add_resource(key, data)?;
        self.tracked.shift_remove(&key);
        Ok(replaced)
    }

    /// Remove a resource, returning whether it existed
    pub fn remove_resource(&mut self, key: &ResourceKey) -> Result<bool> {
        let removed = self.package_mut()?.remove_resource(key);
        Ok(self.tracked.shift_remove(key).is_some() || removed)
    }

    /// Read the decompressed bytes of a resource on the blocking pool
    pub async fn get_resource(&self, key: ResourceKey) -> Result<Arc<[u8]>> {
        let package = Arc::clone(&self.package);
        let data = tokio::task::spawn_blocking(move || package.get_resource(&key)).await??;
        Ok(data)
    }

    /// Keep a typed resource so its edits are written by the next save
    pub fn track(&mut self, key: ResourceKey, resource: Box<dyn Resource>) {
        debug!(%key, kind = resource.type_name(), "tracking resource");
        self.tracked.insert(key, resource);
    }

    /// A tracked resource
    pub fn tracked(&self, key: &ResourceKey) -> Option<&dyn Resource> {
        self.tracked.get(key).map(|r| r.as_ref())
    }

    /// A tracked resource, for editing
    pub fn tracked_mut(&mut self, key: &ResourceKey) -> Option<&mut (dyn Resource + 'static)> {
        self.tracked.get_mut(key).map(|r| r.as_mut())
    }

    /// Stop tracking a resource, returning it
    pub fn untrack(&mut self, key: &ResourceKey) -> Option<Box<dyn Resource>> {
        self.tracked.shift_remove(key)
    }

    /// Serialized bytes of every tracked resource that changed since it was loaded or saved
    pub(crate) fn pending(&self) -> Result<dbpf_package::Pending> {
        let mut pending = dbpf_package::Pending::new();
        for (key, resource) in self.tracked.iter().filter(|(_, r)| r.is_changed()) {
            pending.insert(*key, resource.serialize()?.into());
        }
        Ok(pending)
    }

    /// Swap in the freshly written package and mark tracked resources as saved
    pub(crate) fn saved(&mut self, package: Package<Source>, path: PathBuf) {
        self.package = Arc::new(package);
        self.path = Some(path);
        for resource in self.tracked.values_mut() {
            resource.mark_saved();
        }
    }
}
