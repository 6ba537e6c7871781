//! Named host-chooser factories and the cache of their instances.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::opts::Opts;

use super::chooser::{HostChooser, chooser_for};
use super::tracker::HostStatusTracker;

/// Constructs a fresh chooser for a registered name.
pub type ChooserFactory = Arc<dyn Fn() -> Box<dyn HostChooser> + Send + Sync>;

/// A chooser shared by every connection attempt with the same parameters.
pub type SharedChooser = Arc<Mutex<Box<dyn HostChooser>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChooserKey {
    url: String,
    options: String,
    name: String,
}

impl ChooserKey {
    fn new(opts: &Opts, name: &str) -> Self {
        let hosts = opts
            .hosts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "postgres://{}@{}/{}",
            opts.user,
            hosts,
            opts.database.as_deref().unwrap_or_default()
        );

        let mut params: Vec<_> = opts.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        params.sort();
        let options = format!(
            "targetServerType={}&hostChooserImplProperties={}&{}",
            opts.target_server_type,
            opts.host_chooser_properties.as_deref().unwrap_or_default(),
            params.join("&")
        );

        Self {
            url,
            options,
            name: name.to_string(),
        }
    }
}

/// Name-to-factory map for custom host choosers.
///
/// Factories are registered at startup. At connect time `hostChooserImpl`
/// selects one by name; the initialised instance is cached by connection
/// URL, options and name so that repeated attempts reuse its state.
#[derive(Default)]
pub struct ChooserRegistry {
    factories: Mutex<HashMap<String, ChooserFactory>>,
    instances: Mutex<HashMap<ChooserKey, SharedChooser>>,
}

impl fmt::Debug for ChooserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = factories.keys().collect();
        names.sort();
        f.debug_struct("ChooserRegistry")
            .field("factories", &names)
            .finish_non_exhaustive()
    }
}

impl ChooserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous registration.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn HostChooser> + Send + Sync + 'static,
    {
        let mut factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
        factories.insert(name.into(), Arc::new(factory));
    }

    /// Whether a factory is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        let factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(name)
    }

    /// The chooser to use for `opts`.
    ///
    /// Without `hostChooserImpl` this is a fresh built-in chooser. With it,
    /// the cached instance for these parameters, or a newly initialised one.
    pub fn resolve(&self, opts: &Opts, tracker: &Arc<HostStatusTracker>) -> Result<SharedChooser> {
        match opts.host_chooser_impl.as_deref() {
            None => Ok(Arc::new(Mutex::new(chooser_for(opts, tracker)?))),
            Some(name) => self.custom(opts, name),
        }
    }

    fn custom(&self, opts: &Opts, name: &str) -> Result<SharedChooser> {
        let key = ChooserKey::new(opts, name);
        {
            let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(chooser) = instances.get(&key) {
                return Ok(Arc::clone(chooser));
            }
        }

        let factory = {
            let factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
            factories.get(name).cloned()
        }
        .ok_or_else(|| Error::Config(format!("Unknown host chooser implementation: {name}")))?;

        // init may be slow; it runs without either lock held
        let mut chooser = factory();
        chooser.init(&key.url, opts, opts.target_server_type)?;
        tracing::debug!(name, url = %key.url, "initialised custom host chooser");

        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let shared = instances
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(chooser)));
        Ok(Arc::clone(shared))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::host::{CandidateHost, Candidates, HostRequirement, HostSpec};

    struct Fixed {
        inits: Arc<AtomicUsize>,
        host: Option<HostSpec>,
    }

    impl HostChooser for Fixed {
        fn init(&mut self, _url: &str, opts: &Opts, _req: HostRequirement) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            self.host = opts.hosts.last().cloned();
            Ok(())
        }

        fn candidates(&mut self) -> Candidates {
            let host = self.host.clone();
            Box::new(
                host.into_iter()
                    .map(|h| CandidateHost::new(h, HostRequirement::Any)),
            )
        }
    }

    fn opts_with(name: Option<&str>) -> Opts {
        Opts {
            hosts: vec![HostSpec::new("a", 5432), HostSpec::new("b", 5432)],
            host_chooser_impl: name.map(str::to_string),
            ..Opts::default()
        }
    }

    #[test]
    fn unknown_name_is_a_config_error() {
        let registry = ChooserRegistry::new();
        let tracker = Arc::new(HostStatusTracker::new());
        let err = registry
            .resolve(&opts_with(Some("missing")), &tracker)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn instances_are_cached_per_parameters() {
        let registry = ChooserRegistry::new();
        let tracker = Arc::new(HostStatusTracker::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        registry.register("last", move || {
            Box::new(Fixed {
                inits: Arc::clone(&counter),
                host: None,
            })
        });

        let opts = opts_with(Some("last"));
        let first = registry.resolve(&opts, &tracker).unwrap();
        let second = registry.resolve(&opts, &tracker).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        let mut other = opts.clone();
        other.database = Some("other".into());
        let third = registry.resolve(&other, &tracker).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        let got: Vec<_> = first.lock().unwrap().candidates().collect();
        assert_eq!(got[0].host, HostSpec::new("b", 5432));
    }

    #[test]
    fn builtin_chooser_without_name() {
        let registry = ChooserRegistry::new();
        let tracker = Arc::new(HostStatusTracker::new());
        let chooser = registry.resolve(&opts_with(None), &tracker).unwrap();
        let got: Vec<_> = chooser.lock().unwrap().candidates().collect();
        assert_eq!(got.len(), 2);
    }
}
