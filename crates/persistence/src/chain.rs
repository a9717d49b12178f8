//! Versioned document loading.
//!
//! A [`VersionChain`] is an ordered list of [`SchemaVersion`] records. Each
//! record knows how to load its own stored form, and every record after the
//! first knows how to upgrade the previous version's value into its own.
//! Loading reads the declared version, runs that version's loader, then
//! every later upgrader in order. Upgraders may queue side effects as
//! [`UpgradeHooks`]; nothing is executed or written until the caller
//! commits the result.
//!
//! Versions hold different Rust types, so records are type-erased behind
//! `Box<dyn Any + Send>`. The typed constructors [`SchemaVersion::initial`]
//! and [`SchemaVersion::upgraded`] do the boxing and downcasting.

use std::any::Any;
use std::marker::PhantomData;
use std::path::Path;

use crate::context::LoadContext;
use crate::error::PersistenceError;

type Erased = Box<dyn Any + Send>;
type LoaderFn = Box<dyn Fn(serde_json::Value, &LoadContext) -> Result<Erased, String> + Send + Sync>;
type UpgraderFn = Box<dyn Fn(Erased, &LoadContext) -> Result<(Erased, UpgradeHooks), String> + Send + Sync>;
type HookFn = Box<dyn FnOnce() -> Result<(), PersistenceError> + Send>;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Deferred side effects produced by upgrades, in chain order.
#[derive(Default)]
pub struct UpgradeHooks {
    hooks: Vec<(String, HookFn)>,
}

impl UpgradeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Result<(), PersistenceError> + Send + 'static,
    {
        self.hooks.push((label.into(), Box::new(hook)));
    }

    pub fn extend(&mut self, other: UpgradeHooks) {
        self.hooks.extend(other.hooks);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(label, _)| label.as_str())
    }

    /// Run every hook once, in order. Stops at the first failure.
    pub fn run(self) -> Result<usize, PersistenceError> {
        let count = self.hooks.len();
        for (label, hook) in self.hooks {
            tracing::debug!(hook = %label, "Running upgrade hook");
            hook()?;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for UpgradeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.labels()).finish()
    }
}

/// Result of a typed upgrade function.
pub struct Upgraded<T> {
    pub data: T,
    pub hooks: UpgradeHooks,
}

impl<T> Upgraded<T> {
    /// An upgrade with no side effects.
    pub fn plain(data: T) -> Self {
        Self {
            data,
            hooks: UpgradeHooks::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema versions
// ---------------------------------------------------------------------------

/// One link of a chain.
pub struct SchemaVersion {
    version: u32,
    unversioned: bool,
    loader: LoaderFn,
    upgrader: Option<UpgraderFn>,
}

impl SchemaVersion {
    /// The oldest version: a loader and nothing to upgrade from.
    pub fn initial<T, L>(version: u32, load: L) -> Self
    where
        T: Any + Send,
        L: Fn(serde_json::Value, &LoadContext) -> Result<T, String> + Send + Sync + 'static,
    {
        Self {
            version,
            unversioned: false,
            loader: erase_loader(load),
            upgrader: None,
        }
    }

    /// A later version: its own loader, plus an upgrade from the previous
    /// version's value `P`.
    pub fn upgraded<P, T, L, U>(version: u32, load: L, upgrade: U) -> Self
    where
        P: Any + Send,
        T: Any + Send,
        L: Fn(serde_json::Value, &LoadContext) -> Result<T, String> + Send + Sync + 'static,
        U: Fn(P, &LoadContext) -> Result<Upgraded<T>, String> + Send + Sync + 'static,
    {
        let upgrader: UpgraderFn = Box::new(move |previous: Erased, ctx: &LoadContext| {
            let previous = previous
                .downcast::<P>()
                .map_err(|_| format!("version {version} received an unexpected input type"))?;
            let Upgraded { data, hooks } = upgrade(*previous, ctx)?;
            Ok((Box::new(data) as Erased, hooks))
        });
        Self {
            version,
            unversioned: false,
            loader: erase_loader(load),
            upgrader: Some(upgrader),
        }
    }

    /// Documents without a `version` field are read as this version.
    pub fn unversioned(mut self) -> Self {
        self.unversioned = true;
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

fn erase_loader<T, L>(load: L) -> LoaderFn
where
    T: Any + Send,
    L: Fn(serde_json::Value, &LoadContext) -> Result<T, String> + Send + Sync + 'static,
{
    Box::new(move |raw, ctx| load(raw, ctx).map(|value| Box::new(value) as Erased))
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// A loaded, possibly upgraded, document.
#[derive(Debug)]
pub struct Loaded<T> {
    pub data: T,
    pub from_version: u32,
    pub to_version: u32,
    /// Whether the stored form is older than the newest version.
    pub save: bool,
    pub hooks: UpgradeHooks,
}

impl<T> Loaded<T> {
    /// Apply the upgrade: run pending hooks, then persist the newest form
    /// via `save_fn`. With persistence disabled nothing is written and
    /// pending work is reported as a warning.
    pub fn commit<F>(self, persistence_enabled: bool, save_fn: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&T) -> Result<(), PersistenceError>,
    {
        if !self.save && self.hooks.is_empty() {
            return Ok(self.data);
        }

        if !persistence_enabled {
            tracing::warn!(
                from = self.from_version,
                to = self.to_version,
                hooks = self.hooks.len(),
                "Upgrade pending but persistence is disabled, stored data left as is"
            );
            return Ok(self.data);
        }

        let ran = self.hooks.run()?;
        if self.save {
            save_fn(&self.data)?;
        }
        tracing::info!(
            from = self.from_version,
            to = self.to_version,
            hooks = ran,
            "Upgrade committed"
        );
        Ok(self.data)
    }
}

/// Ordered schema versions for one document type `T` (the newest version's
/// value type).
pub struct VersionChain<T> {
    name: String,
    versions: Vec<SchemaVersion>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for VersionChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionChain")
            .field("name", &self.name)
            .field("versions", &self.versions.iter().map(|v| v.version).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Any + Send> VersionChain<T> {
    /// Check that versions are consecutive, that only the first lacks an
    /// upgrader, and that at most one is marked unversioned.
    pub fn new(name: impl Into<String>, versions: Vec<SchemaVersion>) -> Result<Self, PersistenceError> {
        let name = name.into();
        let invalid = |reason: String| PersistenceError::InvalidChain {
            name: name.clone(),
            reason,
        };

        let Some(first) = versions.first() else {
            return Err(invalid("no versions".to_string()));
        };
        if first.upgrader.is_some() {
            return Err(invalid(format!(
                "oldest version {} must not have an upgrader",
                first.version
            )));
        }
        for pair in versions.windows(2) {
            if pair[1].version != pair[0].version + 1 {
                return Err(invalid(format!(
                    "version {} does not follow {}",
                    pair[1].version, pair[0].version
                )));
            }
            if pair[1].upgrader.is_none() {
                return Err(invalid(format!(
                    "version {} has no upgrader",
                    pair[1].version
                )));
            }
        }
        if versions.iter().filter(|v| v.unversioned).count() > 1 {
            return Err(invalid("more than one unversioned version".to_string()));
        }

        Ok(Self {
            name,
            versions,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oldest(&self) -> u32 {
        self.versions[0].version
    }

    pub fn newest(&self) -> u32 {
        self.versions[self.versions.len() - 1].version
    }

    /// Version assumed for documents without a `version` field.
    pub fn unversioned_version(&self) -> Option<u32> {
        self.versions.iter().find(|v| v.unversioned).map(|v| v.version)
    }

    /// Read `path` and bring it to the newest version. Nothing is written.
    pub fn load(&self, path: &Path, ctx: &LoadContext) -> Result<Loaded<T>, PersistenceError> {
        let raw = read_document(path)?;
        self.load_value(path, raw, ctx)
    }

    /// Read `path`, which must already be at the newest version.
    pub fn load_newest(&self, path: &Path, ctx: &LoadContext) -> Result<T, PersistenceError> {
        let raw = read_document(path)?;
        let version = self.declared_version(path, &raw)?;
        if version != self.newest() {
            return Err(PersistenceError::OutdatedVersion {
                path: path.to_path_buf(),
                version,
                newest: self.newest(),
            });
        }
        let loaded = self.load_value(path, raw, ctx)?;
        Ok(loaded.data)
    }

    /// Read `path` as `version` regardless of its contents. Used for legacy
    /// files whose version is implied by where they are stored, so a
    /// `version` key in them is plain data.
    pub fn load_at_version(
        &self,
        path: &Path,
        version: u32,
        ctx: &LoadContext,
    ) -> Result<Loaded<T>, PersistenceError> {
        if version < self.oldest() || version > self.newest() {
            return Err(PersistenceError::IncompatibleVersion {
                path: path.to_path_buf(),
                version: i64::from(version),
                oldest: self.oldest(),
                newest: self.newest(),
            });
        }
        let raw = read_document(path)?;
        self.upgrade_from(path, raw, version, ctx)
    }

    /// Same as [`load`](Self::load) for an already parsed document.
    pub fn load_value(
        &self,
        path: &Path,
        raw: serde_json::Value,
        ctx: &LoadContext,
    ) -> Result<Loaded<T>, PersistenceError> {
        let from_version = self.declared_version(path, &raw)?;
        self.upgrade_from(path, raw, from_version, ctx)
    }

    fn upgrade_from(
        &self,
        path: &Path,
        raw: serde_json::Value,
        from_version: u32,
        ctx: &LoadContext,
    ) -> Result<Loaded<T>, PersistenceError> {
        let start = (from_version - self.oldest()) as usize;

        let mut value = (self.versions[start].loader)(raw, ctx).map_err(|reason| {
            PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("version {from_version}: {reason}"),
            }
        })?;

        let mut hooks = UpgradeHooks::new();
        for step in &self.versions[start + 1..] {
            let Some(upgrade) = &step.upgrader else {
                continue;
            };
            let (next, step_hooks) =
                upgrade(value, ctx).map_err(|reason| PersistenceError::UpgradeFailed {
                    path: path.to_path_buf(),
                    version: step.version,
                    reason,
                })?;
            value = next;
            hooks.extend(step_hooks);
            tracing::info!(
                document = %self.name,
                version = step.version,
                "Migration applied"
            );
        }

        let data = value.downcast::<T>().map_err(|_| PersistenceError::InvalidChain {
            name: self.name.clone(),
            reason: "newest version does not produce the chain's type".to_string(),
        })?;

        Ok(Loaded {
            data: *data,
            from_version,
            to_version: self.newest(),
            save: from_version != self.newest(),
            hooks,
        })
    }

    fn declared_version(&self, path: &Path, raw: &serde_json::Value) -> Result<u32, PersistenceError> {
        let declared = raw.as_object().and_then(|obj| obj.get("version"));
        let version = match declared {
            Some(v) => v.as_i64().ok_or_else(|| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("version is not an integer: {v}"),
            })?,
            None => match self.unversioned_version() {
                Some(v) => i64::from(v),
                None => {
                    return Err(PersistenceError::Corrupt {
                        path: path.to_path_buf(),
                        reason: "missing version".to_string(),
                    })
                }
            },
        };

        if version < i64::from(self.oldest()) || version > i64::from(self.newest()) {
            return Err(PersistenceError::IncompatibleVersion {
                path: path.to_path_buf(),
                version,
                oldest: self.oldest(),
                newest: self.newest(),
            });
        }
        Ok(version as u32)
    }
}

fn read_document(path: &Path) -> Result<serde_json::Value, PersistenceError> {
    let text = std::fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::context::LoginResolver;

    fn ctx() -> LoadContext {
        LoadContext::new(std::env::temp_dir(), Utc::now(), Arc::new(LoginResolver))
    }

    /// v1: bare number. v2: {"version":2,"n":..} as i64. v3: {"version":3,"s":..} as String.
    fn chain(log: Arc<Mutex<Vec<String>>>) -> VersionChain<String> {
        let log2 = log.clone();
        VersionChain::new(
            "counter",
            vec![
                SchemaVersion::initial(1, |raw, _| raw.as_u64().ok_or("not a number".to_string()))
                    .unversioned(),
                SchemaVersion::upgraded(
                    2,
                    |raw, _| raw["n"].as_i64().ok_or("missing n".to_string()),
                    move |prev: u64, _| {
                        let mut up = Upgraded::plain(prev as i64 * 10);
                        let log = log.clone();
                        up.hooks.push("first", move || {
                            log.lock().unwrap().push("first".into());
                            Ok(())
                        });
                        Ok(up)
                    },
                ),
                SchemaVersion::upgraded(
                    3,
                    |raw, _| {
                        raw["s"]
                            .as_str()
                            .map(str::to_string)
                            .ok_or("missing s".to_string())
                    },
                    move |prev: i64, _| {
                        let mut up = Upgraded::plain(format!("#{prev}"));
                        let log = log2.clone();
                        up.hooks.push("second", move || {
                            log.lock().unwrap().push("second".into());
                            Ok(())
                        });
                        Ok(up)
                    },
                ),
            ],
        )
        .expect("valid chain")
    }

    fn raw(json: &str) -> serde_json::Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn unversioned_document_walks_whole_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(log.clone());
        let loaded = chain.load_value(Path::new("x"), raw("4"), &ctx()).unwrap();
        assert_eq!(loaded.data, "#40");
        assert_eq!((loaded.from_version, loaded.to_version), (1, 3));
        assert!(loaded.save);
        assert_eq!(loaded.hooks.labels().collect::<Vec<_>>(), ["first", "second"]);

        // Loading does not run hooks.
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn commit_runs_hooks_once_in_order_then_saves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(log.clone());
        let loaded = chain.load_value(Path::new("x"), raw("4"), &ctx()).unwrap();

        let saved = Arc::new(Mutex::new(None));
        let saved2 = saved.clone();
        let log_at_save = log.clone();
        let data = loaded
            .commit(true, move |d| {
                assert_eq!(log_at_save.lock().unwrap().len(), 2);
                *saved2.lock().unwrap() = Some(d.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(data, "#40");
        assert_eq!(*log.lock().unwrap(), ["first", "second"]);
        assert_eq!(saved.lock().unwrap().as_deref(), Some("#40"));
    }

    #[test]
    fn commit_without_persistence_runs_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(log.clone());
        let loaded = chain.load_value(Path::new("x"), raw("4"), &ctx()).unwrap();
        let data = loaded
            .commit(false, |_| panic!("must not save"))
            .unwrap();
        assert_eq!(data, "#40");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn newest_document_needs_no_save() {
        let chain = chain(Arc::default());
        let loaded = chain
            .load_value(Path::new("x"), raw(r#"{"version":3,"s":"hi"}"#), &ctx())
            .unwrap();
        assert_eq!(loaded.data, "hi");
        assert!(!loaded.save);
        assert!(loaded.hooks.is_empty());
    }

    #[test]
    fn out_of_range_version_is_incompatible() {
        let chain = chain(Arc::default());
        let err = chain
            .load_value(Path::new("x"), raw(r#"{"version":9}"#), &ctx())
            .unwrap_err();
        assert_matches!(
            err,
            PersistenceError::IncompatibleVersion { version: 9, oldest: 1, newest: 3, .. }
        );
        assert!(err.to_string().contains("supported versions are 1 to 3"));
    }

    #[test]
    fn non_integer_version_is_corrupt() {
        let chain = chain(Arc::default());
        assert_matches!(
            chain.load_value(Path::new("x"), raw(r#"{"version":"2"}"#), &ctx()),
            Err(PersistenceError::Corrupt { .. })
        );
    }

    #[test]
    fn forced_version_ignores_version_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"version": "oops", "n": 3}"#).unwrap();
        let chain = chain(Arc::default());

        assert_matches!(chain.load(&path, &ctx()), Err(PersistenceError::Corrupt { .. }));

        let loaded = chain.load_at_version(&path, 2, &ctx()).unwrap();
        assert_eq!(loaded.data, "#30");
        assert_eq!(loaded.from_version, 2);
        assert_eq!(chain.unversioned_version(), Some(1));

        assert_matches!(
            chain.load_at_version(&path, 5, &ctx()),
            Err(PersistenceError::IncompatibleVersion { version: 5, .. })
        );
    }

    #[test]
    fn loader_failure_is_corrupt() {
        let chain = chain(Arc::default());
        assert_matches!(
            chain.load_value(Path::new("x"), raw(r#"{"version":2}"#), &ctx()),
            Err(PersistenceError::Corrupt { ref reason, .. }) if reason.contains("missing n")
        );
    }

    #[test]
    fn invalid_chains_are_rejected() {
        let gap = VersionChain::<u64>::new(
            "gap",
            vec![
                SchemaVersion::initial(1, |_, _| Ok(1u64)),
                SchemaVersion::upgraded(3, |_, _| Ok(1u64), |p: u64, _| Ok(Upgraded::plain(p))),
            ],
        );
        assert_matches!(gap, Err(PersistenceError::InvalidChain { .. }));
        assert_matches!(
            VersionChain::<u64>::new("empty", Vec::new()),
            Err(PersistenceError::InvalidChain { .. })
        );
    }
}
