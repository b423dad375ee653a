//! Callback targets for watches and their resolution from identifiers.
//!
//! A watch only persists the qualified name of its callback. After a
//! restart the name is turned back into a live object through a
//! [`CallbackResolver`], a static table of known callback kinds filled at
//! process init. Names that are not in the table never resolve.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::CallbackResolutionError;

/// Receiver of translated filesystem events.
pub trait FsCallback: Send + Sync {
    /// Qualified identifier of the callback kind, `<module-path>.<TypeName>`.
    fn qualified_name(&self) -> &str;

    /// A file or directory appeared.
    fn on_created(&self, path: &Path);

    /// A file or directory disappeared.
    fn on_deleted(&self, path: &Path);

    /// A file or directory changed in place.
    fn on_modified(&self, path: &Path);
}

/// Callback kinds that can be referenced by type.
pub trait NamedCallback {
    const QUALIFIED_NAME: &'static str;
}

/// Build a qualified callback name for a type in the calling module.
///
/// ```ignore
/// const NAME: &str = qualified_name!("Geoserver");
/// // "stacksync::handlers::geoserver.Geoserver"
/// ```
#[macro_export]
macro_rules! qualified_name {
    ($type_name:literal) => {
        concat!(module_path!(), ".", $type_name)
    };
}

/// Reference to a callback: a live instance, a type, or a persisted name.
#[derive(Clone)]
pub enum CallbackRef {
    Instance(Arc<dyn FsCallback>),
    Type(&'static str),
    Name(String),
}

impl CallbackRef {
    /// Reference a callback kind by type.
    pub fn of<T: NamedCallback>() -> Self {
        CallbackRef::Type(T::QUALIFIED_NAME)
    }

    /// Reference a callback kind by its persisted identifier.
    pub fn name(name: impl Into<String>) -> Self {
        CallbackRef::Name(name.into())
    }

    /// The identifier this reference claims, without resolving it.
    pub fn identifier(&self) -> &str {
        match self {
            CallbackRef::Instance(callback) => callback.qualified_name(),
            CallbackRef::Type(name) => name,
            CallbackRef::Name(name) => name,
        }
    }
}

impl From<Arc<dyn FsCallback>> for CallbackRef {
    fn from(callback: Arc<dyn FsCallback>) -> Self {
        CallbackRef::Instance(callback)
    }
}

impl fmt::Debug for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackRef::Instance(callback) => f
                .debug_tuple("Instance")
                .field(&callback.qualified_name())
                .finish(),
            CallbackRef::Type(name) => f.debug_tuple("Type").field(name).finish(),
            CallbackRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

type CallbackConstructor = Arc<dyn Fn() -> Option<Arc<dyn FsCallback>> + Send + Sync>;

/// Static table from qualified names to callback accessors.
#[derive(Default)]
pub struct CallbackResolver {
    constructors: RwLock<HashMap<String, CallbackConstructor>>,
}

impl CallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accessor for a qualified name.
    ///
    /// Registering the same name twice replaces the accessor.
    pub fn register<F>(&self, name: &str, constructor: F) -> Result<(), CallbackResolutionError>
    where
        F: Fn() -> Option<Arc<dyn FsCallback>> + Send + Sync + 'static,
    {
        validate_identifier(name)?;
        let previous = self
            .constructors
            .write()
            .insert(name.to_string(), Arc::new(constructor));
        if previous.is_some() {
            tracing::warn!("[resolver] replaced accessor for callback {name}");
        } else {
            crate::debug_event!("resolver", "registered", "{name}");
        }
        Ok(())
    }

    /// Register an accessor for a callback type.
    pub fn register_type<T, F>(&self, constructor: F) -> Result<(), CallbackResolutionError>
    where
        T: NamedCallback,
        F: Fn() -> Option<Arc<dyn FsCallback>> + Send + Sync + 'static,
    {
        self.register(T::QUALIFIED_NAME, constructor)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    /// Names of every registered callback kind, sorted.
    pub fn known(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Turn a reference into a live callback.
    pub fn resolve(
        &self,
        reference: &CallbackRef,
    ) -> Result<Arc<dyn FsCallback>, CallbackResolutionError> {
        match reference {
            CallbackRef::Instance(callback) => Ok(Arc::clone(callback)),
            CallbackRef::Type(name) => self.resolve_name(name),
            CallbackRef::Name(name) => self.resolve_name(name),
        }
    }

    fn resolve_name(&self, name: &str) -> Result<Arc<dyn FsCallback>, CallbackResolutionError> {
        validate_identifier(name)?;

        // Clone the accessor out so it runs without the table lock held.
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CallbackResolutionError::Unknown(name.to_string()))?;

        let callback =
            constructor().ok_or_else(|| CallbackResolutionError::Unavailable(name.to_string()))?;

        if callback.qualified_name() != name {
            return Err(CallbackResolutionError::Mismatch {
                requested: name.to_string(),
                resolved: callback.qualified_name().to_string(),
            });
        }

        Ok(callback)
    }
}

impl fmt::Debug for CallbackResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackResolver")
            .field("known", &self.known())
            .finish()
    }
}

/// Check the `<module-path>.<TypeName>` shape of a callback identifier.
pub fn validate_identifier(name: &str) -> Result<(), CallbackResolutionError> {
    let malformed = || CallbackResolutionError::Malformed(name.to_string());

    let (module, type_name) = name.rsplit_once('.').ok_or_else(malformed)?;

    let is_ident = |s: &str| {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    if !is_ident(type_name) {
        return Err(malformed());
    }

    let module_ok = !module.is_empty()
        && module
            .split("::")
            .flat_map(|segment| segment.split('.'))
            .all(is_ident);
    if !module_ok {
        return Err(malformed());
    }

    Ok(())
}
