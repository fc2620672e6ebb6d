//! Maps resource type ids to the factories that parse them.

use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::name_map::NameMap;
use crate::resource::{DefaultResource, Resource, TypedResource};
use crate::stbl::StringTable;
use crate::text::TextResource;

/// Resource API versions accepted by [`ResourceRegistry::create_resource`]; 0 means latest
pub const SUPPORTED_API_VERSIONS: &[u32] = &[0, 1];

/// Default bound on the bytes read from a resource stream (256 MiB)
pub const DEFAULT_MAX_RESOURCE_SIZE: usize = 256 * 1024 * 1024;

/// Builds typed resources from their stored bytes
pub trait ResourceFactory: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Parse `data`, stored under `type_id`
    fn create(&self, type_id: u32, data: &[u8]) -> Result<Box<dyn Resource>>;
}

/// Factory for any [`TypedResource`]
pub struct TypedFactory<T>(PhantomData<fn() -> T>);

impl<T> TypedFactory<T> {
    /// Create a factory producing `T`
    pub fn new() -> Self {
        TypedFactory(PhantomData)
    }
}

impl<T> Default for TypedFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TypedResource> ResourceFactory for TypedFactory<T> {
    fn name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn create(&self, _type_id: u32, data: &[u8]) -> Result<Box<dyn Resource>> {
        Ok(Box::new(T::parse(data)?))
    }
}

/// Which type ids a registration applies to
#[derive(Clone)]
pub enum TypeMatcher {
    /// A single type id
    Exact(u32),
    /// Any of the listed type ids
    OneOf(Vec<u32>),
    /// Type ids accepted by a function
    Predicate(fn(u32) -> bool),
    /// Every type id
    Any,
}

impl TypeMatcher {
    /// Whether `type_id` is matched
    pub fn matches(&self, type_id: u32) -> bool {
        match self {
            TypeMatcher::Exact(id) => *id == type_id,
            TypeMatcher::OneOf(ids) => ids.contains(&type_id),
            TypeMatcher::Predicate(f) => f(type_id),
            TypeMatcher::Any => true,
        }
    }
}

impl fmt::Debug for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeMatcher::Exact(id) => write!(f, "Exact({id:08X})"),
            TypeMatcher::OneOf(ids) => f.debug_tuple("OneOf").field(ids).finish(),
            TypeMatcher::Predicate(_) => f.write_str("Predicate"),
            TypeMatcher::Any => f.write_str("Any"),
        }
    }
}

struct Registration {
    matcher: TypeMatcher,
    priority: i32,
    factory: Arc<dyn ResourceFactory>,
}

/// Ordered set of resource factories
///
/// The factory used for a type id is the matching registration with the highest priority.
/// Between equal priorities the one registered first wins. Types nothing matches are returned
/// as [`DefaultResource`].
///
/// ```
/// use dbpf_resource::{registry::ResourceRegistry, stbl::StringTable};
///
/// let registry = ResourceRegistry::with_defaults();
/// let resource = registry
///     .create_from_bytes(0, 0x220557DA, b"STBL\x05\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00")
///     .unwrap();
/// assert!(resource.downcast_ref::<StringTable>().is_some());
/// ```
pub struct ResourceRegistry {
    registrations: Vec<Registration>,
    max_resource_size: usize,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| {
                (r.factory.name(), &r.matcher, r.priority)
            }))
            .finish()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    /// Create a registry without any factories
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            max_resource_size: DEFAULT_MAX_RESOURCE_SIZE,
        }
    }

    /// Create a registry holding the factories of this crate, all at priority 0
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_typed::<StringTable>(0);
        registry.register_typed::<NameMap>(0);
        registry.register_typed::<TextResource>(0);
        registry
    }

    /// Limit the number of bytes [`ResourceRegistry::create_resource`] reads
    pub fn with_max_resource_size(mut self, limit: usize) -> Self {
        self.max_resource_size = limit;
        self
    }

    /// Add a factory
    pub fn register(
        &mut self,
        matcher: TypeMatcher,
        priority: i32,
        factory: impl ResourceFactory + 'static,
    ) {
        debug!(factory = factory.name(), ?matcher, priority, "registering factory");
        self.registrations.push(Registration {
            matcher,
            priority,
            factory: Arc::new(factory),
        });
    }

    /// Add the factory of a [`TypedResource`] for its own type ids
    pub fn register_typed<T: TypedResource>(&mut self, priority: i32) {
        let matcher = match T::TYPE_IDS {
            [id] => TypeMatcher::Exact(*id),
            ids => TypeMatcher::OneOf(ids.to_vec()),
        };
        self.register(matcher, priority, TypedFactory::<T>::new());
    }

    /// Find the factory for a type id
    pub fn resolve(&self, type_id: u32) -> Option<&Arc<dyn ResourceFactory>> {
        let mut best: Option<&Registration> = None;
        for registration in &self.registrations {
            if !registration.matcher.matches(type_id) {
                continue;
            }
            if best.map_or(true, |b| registration.priority > b.priority) {
                best = Some(registration);
            }
        }
        best.map(|r| &r.factory)
    }

    /// Read a resource stream and build the typed resource for `type_id`
    ///
    /// The api version is checked before anything is read.
    #[instrument(skip(self, reader), fields(type_id = format_args!("{type_id:08X}")), err)]
    pub fn create_resource(
        &self,
        api_version: u32,
        type_id: u32,
        reader: impl Read,
    ) -> Result<Box<dyn Resource>> {
        check_api_version(api_version)?;

        let limit = self.max_resource_size as u64;
        let mut data = Vec::new();
        reader.take(limit + 1).read_to_end(&mut data)?;
        if data.len() as u64 > limit {
            return Err(Error::TooLarge {
                size: data.len() as u64,
                limit,
            });
        }

        self.parse(type_id, &data)
    }

    /// Build the typed resource for `type_id` from bytes already in memory
    pub fn create_from_bytes(
        &self,
        api_version: u32,
        type_id: u32,
        data: &[u8],
    ) -> Result<Box<dyn Resource>> {
        check_api_version(api_version)?;
        if data.len() > self.max_resource_size {
            return Err(Error::TooLarge {
                size: data.len() as u64,
                limit: self.max_resource_size as u64,
            });
        }

        self.parse(type_id, data)
    }

    fn parse(&self, type_id: u32, data: &[u8]) -> Result<Box<dyn Resource>> {
        match self.resolve(type_id) {
            Some(factory) => factory.create(type_id, data),
            None => Ok(Box::new(DefaultResource::parse(data)?)),
        }
    }
}

fn check_api_version(api_version: u32) -> Result<()> {
    if SUPPORTED_API_VERSIONS.contains(&api_version) {
        Ok(())
    } else {
        Err(Error::UnsupportedApiVersion {
            requested: api_version,
        })
    }
}

#[cfg(test)]
mod test {
    use std::any::Any;
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::error::{Error, Result};
    use crate::registry::{ResourceFactory, ResourceRegistry, TypeMatcher};
    use crate::resource::{ChangeTracker, DefaultResource, Resource};
    use crate::text::TextResource;

    /// Records which factory produced it
    #[derive(Debug, Default)]
    struct Tagged {
        tag: &'static str,
        tracker: ChangeTracker,
    }

    impl Resource for Tagged {
        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(self.tag.as_bytes().to_vec())
        }

        fn type_name(&self) -> &'static str {
            "Tagged"
        }

        fn tracker(&self) -> &ChangeTracker {
            &self.tracker
        }

        fn tracker_mut(&mut self) -> &mut ChangeTracker {
            &mut self.tracker
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct TagFactory(&'static str);

    impl ResourceFactory for TagFactory {
        fn name(&self) -> &'static str {
            self.0
        }

        fn create(&self, _type_id: u32, _data: &[u8]) -> Result<Box<dyn Resource>> {
            Ok(Box::new(Tagged {
                tag: self.0,
                ..Default::default()
            }))
        }
    }

    fn tag_of(registry: &ResourceRegistry, type_id: u32) -> Option<&'static str> {
        registry.resolve(type_id).map(|f| f.name())
    }

    #[traced_test]
    #[test]
    fn highest_priority_wins() {
        let mut registry = ResourceRegistry::new();
        registry.register(TypeMatcher::Exact(0x1234), 50, TagFactory("low"));
        registry.register(TypeMatcher::Exact(0x1234), 100, TagFactory("high"));

        assert_eq!(tag_of(&registry, 0x1234), Some("high"));
        assert!(logs_contain("registering factory"));
    }

    #[test]
    fn ties_go_to_the_first_registration() {
        let mut registry = ResourceRegistry::new();
        registry.register(TypeMatcher::Any, 10, TagFactory("first"));
        registry.register(TypeMatcher::OneOf(vec![1, 2]), 10, TagFactory("second"));
        registry.register(TypeMatcher::Predicate(|t| t % 2 == 0), 5, TagFactory("even"));

        assert_eq!(tag_of(&registry, 2), Some("first"));
        assert_eq!(tag_of(&registry, 7), Some("first"));
    }

    #[test]
    fn matchers() {
        assert!(TypeMatcher::Exact(3).matches(3));
        assert!(!TypeMatcher::Exact(3).matches(4));
        assert!(TypeMatcher::OneOf(vec![1, 5]).matches(5));
        assert!(TypeMatcher::Predicate(|t| t > 10).matches(11));
        assert!(TypeMatcher::Any.matches(0));
    }

    #[test]
    fn unknown_types_fall_back_to_raw_bytes() -> Result<()> {
        let registry = ResourceRegistry::with_defaults();
        assert!(registry.resolve(0xDEADBEEF).is_none());

        let resource = registry.create_resource(0, 0xDEADBEEF, Cursor::new(vec![1, 2, 3]))?;
        assert_eq!(resource.type_name(), "DefaultResource");
        assert_eq!(
            resource.downcast_ref::<DefaultResource>().map(|r| r.data().to_vec()),
            Some(vec![1, 2, 3])
        );

        Ok(())
    }

    #[test]
    fn defaults_resolve_builtin_types() -> Result<()> {
        let registry = ResourceRegistry::with_defaults();
        let resource = registry.create_from_bytes(1, 0x03B33DDF, b"<xml/>")?;

        assert_eq!(
            resource.downcast_ref::<TextResource>().map(|t| t.text().to_string()),
            Some("<xml/>".to_string())
        );
        assert_eq!(resource.serialize()?, b"<xml/>".to_vec());

        Ok(())
    }

    #[test]
    fn rejects_unsupported_api_versions_first() {
        let registry = ResourceRegistry::with_defaults();
        assert!(matches!(
            registry.create_resource(2, 0x03B33DDF, Cursor::new(vec![0xFF])),
            Err(Error::UnsupportedApiVersion { requested: 2 })
        ));
    }

    #[test]
    fn bounds_the_bytes_read() {
        let registry = ResourceRegistry::new().with_max_resource_size(4);
        assert!(matches!(
            registry.create_resource(0, 1, Cursor::new(vec![0; 100])),
            Err(Error::TooLarge { size: 5, limit: 4 })
        ));
        assert!(registry.create_resource(0, 1, Cursor::new(vec![0; 4])).is_ok());
    }

    #[test]
    fn failed_parse_produces_no_resource() {
        let registry = ResourceRegistry::with_defaults();
        assert!(registry
            .create_from_bytes(0, 0x220557DA, b"not a string table")
            .is_err());
    }
}
