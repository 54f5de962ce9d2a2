//! Process-wide registries.
//!
//! Everything the engine resolves at runtime lives here: the storage driver,
//! registered model types with their definitions and dispatchers, the type
//! directory used to resolve relation targets by name, and the optional
//! collaborators (cache, translator, requester provider, encrypter, N+1
//! tracker). Each registry is lock-guarded and [`reset`] returns all of them
//! to their initial state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

use relata_core::translate::translate_or_default;
use relata_core::{
    Definition, Dispatcher, Error, LifecycleEvent, ListenerId, Propagation, RelationKind, Result,
    Translator, definitions,
};

use crate::acl::{Requester, RequesterProvider};
use crate::behaviors;
use crate::cache::ModelCache;
use crate::driver::Driver;
use crate::encrypt::Encrypter;
use crate::entity::{Behaviors, ModelType, Schema};
use crate::model::Model;
use crate::n1::LazyLoadTracker;
use crate::transaction;

/// A registered model type.
pub struct TypeEntry {
    ty: ModelType,
    definition: Arc<Definition>,
    behaviors: Behaviors,
    dispatcher: RwLock<Arc<Dispatcher<Model>>>,
}

impl TypeEntry {
    pub fn model_type(&self) -> &ModelType {
        &self.ty
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn behaviors(&self) -> &Behaviors {
        &self.behaviors
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher<Model>> {
        read(&self.dispatcher).clone()
    }

    /// Replaces the dispatcher with one holding only the built-in listeners.
    fn reset_dispatcher(&self) {
        *write(&self.dispatcher) = Arc::new(builtin_dispatcher(&self.definition, &self.behaviors));
    }
}

impl std::fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEntry")
            .field("ty", &self.ty)
            .field("table", &self.definition.table())
            .field("behaviors", &self.behaviors)
            .finish_non_exhaustive()
    }
}

fn builtin_dispatcher(definition: &Definition, behaviors: &Behaviors) -> Dispatcher<Model> {
    let dispatcher = Dispatcher::new();
    behaviors::install(&dispatcher, definition, behaviors);
    dispatcher
}

#[derive(Default)]
struct Registry {
    driver: RwLock<Option<Arc<dyn Driver>>>,
    types: RwLock<HashMap<String, Arc<TypeEntry>>>,
    directory: RwLock<HashMap<String, ModelType>>,
    cache: RwLock<Option<Arc<dyn ModelCache>>>,
    cache_ttl: RwLock<Option<Duration>>,
    translator: RwLock<Option<Arc<dyn Translator>>>,
    locale: RwLock<Option<String>>,
    requester: RwLock<Option<Arc<dyn RequesterProvider>>>,
    encrypter: RwLock<Option<Arc<dyn Encrypter>>>,
    lazy_loads: Mutex<LazyLoadTracker>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Driver
// ============================================================================

pub fn set_driver(driver: Arc<dyn Driver>) {
    *write(&registry().driver) = Some(driver);
}

pub fn clear_driver() {
    *write(&registry().driver) = None;
}

/// The installed driver, or [`Error::NoDriver`].
pub fn driver() -> Result<Arc<dyn Driver>> {
    read(&registry().driver).clone().ok_or(Error::NoDriver)
}

// ============================================================================
// Model types
// ============================================================================

/// Registers `ty` on first use and returns its entry.
///
/// Registration builds the definition, records the types the schema relates
/// to in the type directory, checks that every relation target resolves, and
/// installs the built-in listeners. The schema is evaluated outside the
/// registry locks; when two threads race, the first stored entry wins.
pub fn register(ty: &ModelType) -> Result<Arc<TypeEntry>> {
    if let Some(entry) = read(&registry().types).get(ty.name()) {
        return Ok(entry.clone());
    }

    let Schema {
        properties,
        options,
        related,
        behaviors,
    } = ty.schema();
    {
        let mut directory = write(&registry().directory);
        directory.insert(ty.name().to_string(), ty.clone());
        for target in related {
            directory.entry(target.name().to_string()).or_insert(target);
        }
    }

    let definition =
        definitions().get_or_build(ty.name(), || Definition::build(ty.name(), properties, options))?;
    check_relation_targets(&definition)?;

    let dispatcher = builtin_dispatcher(&definition, &behaviors);
    let entry = Arc::new(TypeEntry {
        ty: ty.clone(),
        definition,
        behaviors,
        dispatcher: RwLock::new(Arc::new(dispatcher)),
    });

    tracing::debug!(
        model = ty.name(),
        table = entry.definition.table(),
        "registered model type"
    );

    Ok(write(&registry().types)
        .entry(ty.name().to_string())
        .or_insert(entry)
        .clone())
}

fn check_relation_targets(definition: &Definition) -> Result<()> {
    let directory = read(&registry().directory);
    for relation in definition.relations() {
        let targets: Vec<&str> = match (&relation.kind, &relation.morph) {
            (RelationKind::Polymorphic, Some(morph)) => {
                morph.map.values().map(String::as_str).collect()
            }
            _ => vec![relation.target.as_str()],
        };
        if let Some(missing) = targets.into_iter().find(|t| !directory.contains_key(*t)) {
            return Err(Error::config(format!(
                "relation `{}` on {} targets unknown type `{}`",
                relation.name,
                definition.model_name(),
                missing
            )));
        }
    }
    Ok(())
}

/// Resolves a type name recorded in a relation.
pub fn resolve_type(name: &str) -> Result<ModelType> {
    read(&registry().directory)
        .get(name)
        .cloned()
        .ok_or_else(|| Error::config(format!("unknown model type `{}`", name)))
}

/// Adds a listener to `ty`'s dispatcher.
pub fn listen<F>(
    ty: &ModelType,
    event: LifecycleEvent,
    priority: i32,
    listener: F,
) -> Result<ListenerId>
where
    F: Fn(&mut Model) -> Propagation + Send + Sync + 'static,
{
    Ok(register(ty)?.dispatcher().listen(event, priority, listener))
}

/// Drops application listeners of every registered type, keeping the built-ins.
pub fn reset_listeners() {
    for entry in read(&registry().types).values() {
        entry.reset_dispatcher();
    }
}

// ============================================================================
// Collaborators
// ============================================================================

pub fn set_cache(cache: Arc<dyn ModelCache>) {
    *write(&registry().cache) = Some(cache);
}

/// TTL for types that do not set their own.
pub fn set_cache_ttl(ttl: Option<Duration>) {
    *write(&registry().cache_ttl) = ttl;
}

pub fn clear_cache() {
    *write(&registry().cache) = None;
}

/// The cache and TTL that apply to `entry`, if caching is on for it.
pub(crate) fn cache_for(entry: &TypeEntry) -> Option<(Arc<dyn ModelCache>, Option<Duration>)> {
    if !entry.behaviors.is_cached() {
        return None;
    }
    let cache = read(&registry().cache).clone()?;
    let ttl = entry.behaviors.cache_ttl().or(*read(&registry().cache_ttl));
    Some((cache, ttl))
}

pub fn set_translator(translator: Arc<dyn Translator>) {
    *write(&registry().translator) = Some(translator);
}

pub fn set_locale(locale: Option<String>) {
    *write(&registry().locale) = locale;
}

/// Renders a phrase through the installed translator and locale, falling back
/// to the built-in phrases.
pub fn translate(key: &str, fallback: Option<&str>, params: &BTreeMap<String, String>) -> String {
    let translator = read(&registry().translator).clone();
    let locale = read(&registry().locale).clone();
    translate_or_default(translator.as_deref(), key, fallback, params, locale.as_deref())
}

pub fn set_requester_provider(provider: Arc<dyn RequesterProvider>) {
    *write(&registry().requester) = Some(provider);
}

pub fn current_requester() -> Option<Requester> {
    let provider = read(&registry().requester).clone()?;
    provider.requester()
}

pub fn set_encrypter(encrypter: Arc<dyn Encrypter>) {
    *write(&registry().encrypter) = Some(encrypter);
}

pub fn encrypter() -> Option<Arc<dyn Encrypter>> {
    read(&registry().encrypter).clone()
}

/// Runs `f` with the process-wide lazy-load tracker.
pub fn lazy_loads<R>(f: impl FnOnce(&mut LazyLoadTracker) -> R) -> R {
    f(&mut lock(&registry().lazy_loads))
}

pub fn set_n1_threshold(threshold: usize) {
    lazy_loads(|tracker| tracker.set_threshold(threshold));
}

/// Returns every registry to its initial state, including the definition
/// registry and the transaction depth.
pub fn reset() {
    let registry = registry();
    *write(&registry.driver) = None;
    write(&registry.types).clear();
    write(&registry.directory).clear();
    *write(&registry.cache) = None;
    *write(&registry.cache_ttl) = None;
    *write(&registry.translator) = None;
    *write(&registry.locale) = None;
    *write(&registry.requester) = None;
    *write(&registry.encrypter) = None;
    *lock(&registry.lazy_loads) = LazyLoadTracker::new();
    definitions().reset();
    transaction::reset();
    tracing::debug!("registries reset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use relata_core::Property;

    struct Orphan;

    impl Entity for Orphan {
        const NAME: &'static str = "RegistryOrphan";

        fn schema() -> Schema {
            Schema::new().property(Property::relation(
                "ghost",
                relata_core::RelationSpec::belongs_to("RegistryGhost"),
            ))
        }
    }

    struct Sample;

    impl Entity for Sample {
        const NAME: &'static str = "RegistrySample";

        fn schema() -> Schema {
            Schema::new()
                .property(Property::string("name"))
                .belongs_to("orphan", ModelType::from_fn("RegistryTarget", Schema::new))
        }
    }

    #[test]
    fn test_unknown_relation_target_is_config_error() {
        let err = register(&Orphan::model_type()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("RegistryGhost"));
    }

    #[test]
    fn test_register_is_memoized_and_records_targets() {
        let first = register(&Sample::model_type()).unwrap();
        let second = register(&Sample::model_type()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.definition().contains("orphan_id"));
        assert_eq!(resolve_type("RegistryTarget").unwrap().name(), "RegistryTarget");
        assert!(resolve_type("RegistryNowhere").is_err());
    }
}
