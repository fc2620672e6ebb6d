//! Async loading, decoding and saving of packages.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use bon::Builder;
use dbpf_package::{
    read::{Package, PackageOptions},
    CompactionStats, PackageWriter, Pending, ResourceKey, SaveOptions,
};
use dbpf_resource::{Resource, ResourceRegistry};
use tempfile::NamedTempFile;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    error::{Error, Result},
    handle::PackageHandle,
    source::Source,
};

/// Default number of resources decoded at the same time by [`PackageService::resources`]
pub const DEFAULT_DECODE_CONCURRENCY: usize = 8;

/// Settings shared by every operation of a [`PackageService`]
#[derive(Debug, Clone, Copy, Builder)]
pub struct ServiceOptions {
    /// Limits used when loading packages
    #[builder(default)]
    pub package: PackageOptions,

    /// How packages are written
    #[builder(default)]
    pub save: SaveOptions,

    /// Resource api version passed to the registry
    #[builder(default)]
    pub api_version: u32,

    /// Resources decoded at the same time
    #[builder(default = DEFAULT_DECODE_CONCURRENCY)]
    pub decode_concurrency: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// How a save lays out the new file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveMode {
    Preserve,
    Compact,
}

/// Runs package work on the blocking pool and decodes resources through a registry
///
/// ```no_run
/// use dbpf_resource::{ResourceRegistry, StringTable};
/// use dbpf_service::{PackageService, ServiceOptions};
/// use tokio_util::sync::CancellationToken;
///
/// async fn rename(path: &str) -> dbpf_service::error::Result<()> {
///     let service = PackageService::new(ResourceRegistry::with_defaults(), ServiceOptions::default());
///     let token = CancellationToken::new();
///     let mut handle = service.load(path, &token).await?;
///
///     let keys: Vec<_> = handle.enumerate().collect();
///     for key in keys {
///         let mut resource = service.resource(&handle, key, &token).await?;
///         if let Some(table) = resource.downcast_mut::<StringTable>() {
///             table.insert(0x1, "renamed");
///             handle.track(key, resource);
///         }
///     }
///
///     service.save(&mut handle, &token).await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PackageService {
    registry: Arc<ResourceRegistry>,
    options: ServiceOptions,
    decode_permits: Arc<Semaphore>,
}

impl PackageService {
    /// Create a service decoding resources with `registry`
    pub fn new(registry: ResourceRegistry, options: ServiceOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            decode_permits: Arc::new(Semaphore::new(options.decode_concurrency.max(1))),
            options,
        }
    }

    /// The registry resources are decoded with
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// The settings of this service
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// A new package without resources and without a file path
    pub fn create_empty(&self) -> Result<PackageHandle> {
        let bytes = PackageWriter::new(std::io::Cursor::new(Vec::new()), self.options.save)?
            .finish()?
            .into_inner();
        let package = Package::load_with(Source::from(bytes), self.options.package)?;
        Ok(PackageHandle::new(package, None))
    }

    /// Open a package file
    ///
    /// Cancelling returns [`Error::Cancelled`] right away; the parse still running on the
    /// blocking pool is discarded.
    #[instrument(skip(self, path, token), fields(path = %path.as_ref().display()), err)]
    pub async fn load(
        &self,
        path: impl AsRef<Path>,
        token: &CancellationToken,
    ) -> Result<PackageHandle> {
        let path = path.as_ref().to_path_buf();
        let options = self.options.package;
        let task_path = path.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<Package<Source>> {
            let file = File::open(&task_path)?;
            Ok(Package::load_with(Source::from(file), options)?)
        });

        let package = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            package = task => package??,
        };

        info!(entries = package.len(), "loaded package");
        Ok(PackageHandle::new(package, Some(path)))
    }

    /// Open a package held in memory
    #[instrument(skip_all, fields(len = bytes.len()), err)]
    pub async fn load_bytes(
        &self,
        bytes: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<PackageHandle> {
        let options = self.options.package;
        let task = tokio::task::spawn_blocking(move || {
            Package::load_with(Source::from(bytes), options)
        });

        let package = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            package = task => package??,
        };

        Ok(PackageHandle::new(package, None))
    }

    /// Read and decode one resource on the blocking pool
    #[instrument(skip(self, handle, token), fields(key = %key), err)]
    pub async fn resource(
        &self,
        handle: &PackageHandle,
        key: ResourceKey,
        token: &CancellationToken,
    ) -> Result<Box<dyn Resource>> {
        let task = decode(
            Arc::clone(&handle.package),
            Arc::clone(&self.registry),
            self.options.api_version,
            key,
        );

        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            resource = task => resource,
        }
    }

    /// Read and decode many resources concurrently
    ///
    /// Each resource gets its own result, in the order of `keys`; one failing resource does
    /// not stop the others. Cancelling aborts every decode still running.
    #[instrument(skip_all, err)]
    pub async fn resources(
        &self,
        handle: &PackageHandle,
        keys: impl IntoIterator<Item = ResourceKey>,
        token: &CancellationToken,
    ) -> Result<Vec<(ResourceKey, Result<Box<dyn Resource>>)>> {
        let mut tasks = JoinSet::new();
        let mut results: Vec<(ResourceKey, Option<Result<Box<dyn Resource>>>)> = Vec::new();

        for (slot, key) in keys.into_iter().enumerate() {
            results.push((key, None));

            let permits = Arc::clone(&self.decode_permits);
            let package = Arc::clone(&handle.package);
            let registry = Arc::clone(&self.registry);
            let api_version = self.options.api_version;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (slot, decode(package, registry, api_version, key).await)
            });
        }

        debug!(count = results.len(), "decoding resources");

        loop {
            let joined = tokio::select! {
                _ = token.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                Some(joined) => {
                    let (slot, resource) = joined?;
                    results[slot].1 = Some(resource);
                }
                None => break,
            }
        }

        Ok(results
            .into_iter()
            .map(|(key, resource)| (key, resource.unwrap_or(Err(Error::Cancelled))))
            .collect())
    }

    /// Write the package back to the file it was loaded from
    ///
    /// Changed tracked resources are written alongside the package's own edits. The new file
    /// replaces the old one only once it is complete; on error or cancellation the old file
    /// and the handle are left as they were.
    pub async fn save(&self, handle: &mut PackageHandle, token: &CancellationToken) -> Result<()> {
        let path = handle.path.clone().ok_or(Error::NoPath)?;
        self.write(handle, path, SaveMode::Preserve, token).await?;
        Ok(())
    }

    /// Like [`PackageService::save`], writing to `path` instead
    ///
    /// The handle refers to `path` afterwards.
    pub async fn save_as(
        &self,
        handle: &mut PackageHandle,
        path: impl AsRef<Path>,
        token: &CancellationToken,
    ) -> Result<()> {
        self.write(handle, path.as_ref().to_path_buf(), SaveMode::Preserve, token)
            .await?;
        Ok(())
    }

    /// Like [`PackageService::save`], rewriting the file with only the live resources
    pub async fn compact(
        &self,
        handle: &mut PackageHandle,
        token: &CancellationToken,
    ) -> Result<CompactionStats> {
        let path = handle.path.clone().ok_or(Error::NoPath)?;
        let stats = self.write(handle, path, SaveMode::Compact, token).await?;
        info!(reclaimed = stats.reclaimed(), "compacted package");
        Ok(stats)
    }

    #[instrument(skip(self, handle, token), fields(path = %path.display()), err)]
    async fn write(
        &self,
        handle: &mut PackageHandle,
        path: PathBuf,
        mode: SaveMode,
        token: &CancellationToken,
    ) -> Result<CompactionStats> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let pending = handle.pending()?;
        let package = Arc::clone(&handle.package);
        let options = self.options;
        let token = token.clone();
        let target = path.clone();

        let (saved, stats) = tokio::task::spawn_blocking(move || {
            write_package(&package, &target, mode, &options, &pending, &token)
        })
        .await??;

        handle.saved(saved, path);
        info!(entries = stats.live_entries, "saved package");
        Ok(stats)
    }
}

async fn decode(
    package: Arc<Package<Source>>,
    registry: Arc<ResourceRegistry>,
    api_version: u32,
    key: ResourceKey,
) -> Result<Box<dyn Resource>> {
    tokio::task::spawn_blocking(move || -> Result<Box<dyn Resource>> {
        let data = package.get_resource(&key)?;
        Ok(registry.create_from_bytes(api_version, key.resource_type, &data)?)
    })
    .await?
}

/// Write `package` to a temporary file next to `path`, load it back and move it over `path`
fn write_package(
    package: &Package<Source>,
    path: &Path,
    mode: SaveMode,
    options: &ServiceOptions,
    pending: &Pending,
    token: &CancellationToken,
) -> Result<(Package<Source>, CompactionStats)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // Dropping the temp file on any early return deletes it.
    let mut temp = NamedTempFile::new_in(dir)?;
    let check = || {
        if token.is_cancelled() {
            Err(dbpf_package::error::Error::Cancelled)
        } else {
            Ok(())
        }
    };

    let writer = BufWriter::new(temp.as_file_mut());
    let (mut writer, stats) = match mode {
        SaveMode::Preserve => {
            let writer = package.save_to_with(writer, &options.save, pending, check)?;
            let stats = CompactionStats {
                live_entries: package.len()
                    + pending.keys().filter(|k| !package.contains(k)).count(),
                bytes_before: package.stream_len(),
                bytes_after: 0,
            };
            (writer, stats)
        }
        SaveMode::Compact => package.compact_to_with(writer, &options.save, pending, check)?,
    };
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    let bytes_after = temp.as_file().metadata()?.len();

    // The reloaded file handle follows the temp file through the rename, and a file that
    // cannot be loaded back never replaces `path`.
    let saved = Package::load_with(Source::from(temp.reopen()?), options.package)?;
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    temp.persist(path).map_err(|e| e.error)?;
    debug!(bytes_after, "replaced package file");

    Ok((saved, CompactionStats { bytes_after, ..stats }))
}
