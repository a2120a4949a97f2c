//! Upload categories ("subdirectories").
//!
//! Every upload lands in a category that is bound to a table and, optionally,
//! to one of that table's fields. The category key doubles as the first path
//! segment under the storer root: `{key}/{refid}/{file}`, where a refid of `0`
//! marks files that are not yet attached to a row.
//!
//! The registry is built once at startup and shared behind an `Arc`. All
//! access goes through an internal `RwLock`, so late registrations are safe as
//! well.

use crate::services::thumbnail::ThumbSize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported category descriptor `{descriptor}`: {reason}")]
    UnsupportedDescriptor {
        descriptor: String,
        reason: &'static str,
    },
}

/// Structured `(table, field)` binding of an upload category.
///
/// The textual form is `table` or `table.field`, split at the first dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdirDescriptor {
    pub table: String,
    pub field: Option<String>,
}

impl SubdirDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, RegistryError> {
        let unsupported = |reason| RegistryError::UnsupportedDescriptor {
            descriptor: descriptor.to_string(),
            reason,
        };

        let (table, field) = match descriptor.split_once('.') {
            Some((table, field)) => (table, Some(field)),
            None => (descriptor, None),
        };
        if table.is_empty() {
            return Err(unsupported("table part is empty"));
        }
        if !is_segment_safe(table) {
            return Err(unsupported(
                "table may only contain ASCII letters, digits, `_` and `-`",
            ));
        }
        let field = match field {
            None | Some("") => None,
            Some(f) if is_segment_safe(f) => Some(f.to_string()),
            Some(_) => {
                return Err(unsupported(
                    "field may only contain ASCII letters, digits, `_` and `-`",
                ));
            }
        };

        Ok(Self {
            table: table.to_string(),
            field,
        })
    }

    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or("")
    }
}

fn is_segment_safe(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// What a checker gets to see during checkin.
#[derive(Debug, Clone, Copy)]
pub struct CheckinContext<'a> {
    pub owner_type: &'a str,
    pub owner_id: i64,
    pub field: &'a str,
    pub refid: Option<&'a str>,
}

/// Category-specific gate run during checkin. Returns a human readable
/// rejection reason.
pub trait SubdirChecker: Send + Sync {
    fn check(&self, ctx: &CheckinContext<'_>) -> Result<(), String>;
}

/// Uploads for site configuration must name the config key they belong to.
pub struct ConfigKeyChecker;

impl SubdirChecker for ConfigKeyChecker {
    fn check(&self, ctx: &CheckinContext<'_>) -> Result<(), String> {
        let key = ctx
            .refid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "a config key (`refid`) is required".to_string())?;
        if !key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        {
            return Err(format!("invalid config key `{key}`"));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct SubdirInfo {
    pub key: String,
    pub name: String,
    pub name_en: String,
    pub description: String,
    pub allowed: bool,
    pub table_name: String,
    /// field name -> label; `""` is the category's default field.
    pub fields: BTreeMap<String, String>,
    /// Overrides the configured thumbnail sizes when non-empty.
    pub thumb_sizes: Vec<ThumbSize>,
    pub checker: Option<Arc<dyn SubdirChecker>>,
}

impl fmt::Debug for SubdirInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubdirInfo")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("name_en", &self.name_en)
            .field("allowed", &self.allowed)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .field("thumb_sizes", &self.thumb_sizes)
            .field("checker", &self.checker.is_some())
            .finish()
    }
}

impl SubdirInfo {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            allowed: true,
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.fields.insert(field.into(), label.into());
        self
    }

    pub fn with_checker(mut self, checker: impl SubdirChecker + 'static) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    pub fn with_thumb_sizes(mut self, sizes: Vec<ThumbSize>) -> Self {
        self.thumb_sizes = sizes;
        self
    }

    pub fn disallowed(mut self) -> Self {
        self.allowed = false;
        self
    }

    /// A category without declared fields accepts any field name.
    pub fn accepts_field(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.contains_key(field)
    }

    /// Merge `other` into `self`. `allowed` is always taken over; strings only
    /// when non-empty; fields are merged; checker and thumb sizes only when
    /// `other` provides them.
    pub fn copy_from(&mut self, other: &SubdirInfo) -> &mut Self {
        self.allowed = other.allowed;
        for (dst, src) in [
            (&mut self.name, &other.name),
            (&mut self.name_en, &other.name_en),
            (&mut self.description, &other.description),
            (&mut self.table_name, &other.table_name),
        ] {
            if !src.is_empty() {
                dst.clone_from(src);
            }
        }
        for (field, label) in &other.fields {
            self.fields.insert(field.clone(), label.clone());
        }
        if !other.thumb_sizes.is_empty() {
            self.thumb_sizes.clone_from(&other.thumb_sizes);
        }
        if other.checker.is_some() {
            self.checker.clone_from(&other.checker);
        }
        self
    }
}

#[derive(Default)]
struct Inner {
    subdirs: HashMap<String, SubdirInfo>,
    table_to_key: HashMap<String, String>,
}

#[derive(Default)]
pub struct SubdirRegistry {
    inner: RwLock<Inner>,
}

impl SubdirRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in categories.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_object(
            SubdirInfo::new("user", "Admin users")
                .with_table("user")
                .with_field("", "Personal files")
                .with_field("avatar", "Avatar"),
        );
        registry.register_object(
            SubdirInfo::new("config", "Site configuration")
                .with_table("config")
                .with_field("", "Content images")
                .with_checker(ConfigKeyChecker),
        );
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a category from its `table[.field]` descriptor. `names` holds
    /// up to `[name, name_en, description]`.
    pub fn register(&self, descriptor: &str, names: &[&str]) -> Result<SubdirInfo, RegistryError> {
        let parsed = SubdirDescriptor::parse(descriptor)?;
        let mut info = SubdirInfo::new(parsed.table.clone(), names.first().copied().unwrap_or(""))
            .with_table(parsed.table.clone());
        info.name_en = names.get(1).copied().unwrap_or("").to_string();
        info.description = names.get(2).copied().unwrap_or("").to_string();
        if let Some(field) = parsed.field {
            info.fields.insert(field, String::new());
        }
        Ok(self.register_object(info))
    }

    /// Insert `info`, or merge it into the entry already registered under the
    /// same key. Returns the stored entry.
    pub fn register_object(&self, info: SubdirInfo) -> SubdirInfo {
        let mut inner = self.write();
        let stored = match inner.subdirs.get_mut(&info.key) {
            Some(existing) => {
                debug!(key = %info.key, "subdir.merge");
                existing.copy_from(&info).clone()
            }
            None => {
                info!(key = %info.key, "subdir.register");
                inner.subdirs.insert(info.key.clone(), info.clone());
                info
            }
        };
        if !stored.table_name.is_empty() {
            inner
                .table_to_key
                .insert(stored.table_name.clone(), stored.key.clone());
        }
        stored
    }

    pub fn unregister(&self, keys: &[&str]) {
        let mut inner = self.write();
        for key in keys {
            if let Some(removed) = inner.subdirs.remove(*key) {
                inner
                    .table_to_key
                    .retain(|_, k| k.as_str() != removed.key.as_str());
                info!(key = %removed.key, "subdir.unregister");
            }
        }
    }

    pub fn all(&self) -> Vec<SubdirInfo> {
        let mut all: Vec<_> = self.read().subdirs.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.read().subdirs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<SubdirInfo> {
        self.read().subdirs.get(key).cloned()
    }

    pub fn get_by_table(&self, table: &str) -> Option<SubdirInfo> {
        let inner = self.read();
        let key = inner.table_to_key.get(table)?;
        inner.subdirs.get(key).cloned()
    }

    /// Returns the entry for `key`, registering an empty one if it is unknown.
    pub fn get_or_create(&self, key: &str) -> SubdirInfo {
        if let Some(info) = self.get(key) {
            return info;
        }
        self.register_object(SubdirInfo::new(key, ""))
    }

    /// True when `key` is registered and allowed. Otherwise the answer for
    /// `default` is used, resolved exactly one level deep so chains of
    /// defaults cannot loop.
    pub fn is_allowed(&self, key: &str, default: Option<&str>) -> bool {
        let inner = self.read();
        if inner.subdirs.get(key).is_some_and(|info| info.allowed) {
            return true;
        }
        match default {
            Some(fallback) if fallback != key => inner
                .subdirs
                .get(fallback)
                .is_some_and(|info| info.allowed),
            _ => false,
        }
    }

    /// Calls `deleter` with `{prefix}/{key}/0/` for every registered key, in
    /// key order. The first error stops the sweep and is returned.
    pub async fn clean_temp_files<F, Fut, E>(&self, prefix: &str, mut deleter: F) -> Result<(), E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        for key in self.keys() {
            deleter(format!("{prefix}{key}/0/")).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_splits_at_first_dot() {
        let d = SubdirDescriptor::parse("user.avatar").unwrap();
        assert_eq!(d.table, "user");
        assert_eq!(d.field.as_deref(), Some("avatar"));

        let d = SubdirDescriptor::parse("config").unwrap();
        assert_eq!(d.field, None);
        assert_eq!(d.field_name(), "");

        let err = SubdirDescriptor::parse(".avatar").unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedDescriptor { .. }));
        assert!(SubdirDescriptor::parse("user.a.b").is_err());
        assert!(SubdirDescriptor::parse("../etc").is_err());
    }

    #[test]
    fn register_rejects_bad_descriptor_instead_of_panicking() {
        let registry = SubdirRegistry::new();
        let err = registry.register("", &["Empty"]).unwrap_err();
        assert!(err.to_string().contains("table part is empty"));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn register_fills_names_and_binding() {
        let registry = SubdirRegistry::new();
        let info = registry
            .register("article.cover", &["Articles", "Articles EN", "cover images"])
            .unwrap();
        assert_eq!(info.key, "article");
        assert_eq!(info.table_name, "article");
        assert_eq!(info.name_en, "Articles EN");
        assert_eq!(info.description, "cover images");
        assert!(info.accepts_field("cover"));
        assert!(!info.accepts_field("body"));
        assert!(info.allowed);
    }

    #[test]
    fn reregistration_merges_into_existing_entry() {
        let registry = SubdirRegistry::new();
        registry.register_object(
            SubdirInfo::new("news", "News")
                .with_table("news")
                .with_field("cover", "Cover")
                .with_checker(ConfigKeyChecker),
        );
        let merged = registry.register_object(SubdirInfo::new("news", "").with_field("body", "Body"));

        assert_eq!(merged.name, "News");
        assert_eq!(merged.table_name, "news");
        assert!(merged.accepts_field("cover"));
        assert!(merged.accepts_field("body"));
        assert!(merged.checker.is_some());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn is_allowed_falls_back_one_level() {
        let registry = SubdirRegistry::new();
        registry.register_object(SubdirInfo::new("open", ""));
        registry.register_object(SubdirInfo::new("closed", "").disallowed());
        registry.register_object(SubdirInfo::new("closed_too", "").disallowed());

        assert!(registry.is_allowed("open", None));
        assert!(!registry.is_allowed("closed", None));
        assert!(!registry.is_allowed("missing", None));
        assert!(registry.is_allowed("missing", Some("open")));
        assert!(registry.is_allowed("closed", Some("open")));
        assert!(!registry.is_allowed("missing", Some("missing")));
        // the default is not followed any further
        assert!(!registry.is_allowed("missing", Some("closed_too")));
    }

    #[test]
    fn get_or_create_registers_unknown_keys() {
        let registry = SubdirRegistry::new();
        assert!(registry.get("scratch").is_none());
        let created = registry.get_or_create("scratch");
        assert_eq!(created.key, "scratch");
        assert!(registry.get("scratch").is_some());
    }

    #[test]
    fn unregister_drops_table_index() {
        let registry = SubdirRegistry::with_defaults();
        assert_eq!(registry.get_by_table("user").unwrap().key, "user");
        registry.unregister(&["user", "nope"]);
        assert!(registry.get("user").is_none());
        assert!(registry.get_by_table("user").is_none());
        assert!(registry.get("config").is_some());
    }

    #[test]
    fn config_checker_requires_key() {
        let ctx = CheckinContext {
            owner_type: "user",
            owner_id: 1,
            field: "",
            refid: None,
        };
        assert!(ConfigKeyChecker.check(&ctx).is_err());
        let ctx = CheckinContext {
            refid: Some("site_logo"),
            ..ctx
        };
        assert!(ConfigKeyChecker.check(&ctx).is_ok());
        let ctx = CheckinContext {
            refid: Some("Site Logo"),
            ..ctx
        };
        assert!(ConfigKeyChecker.check(&ctx).is_err());
    }

    #[tokio::test]
    async fn clean_temp_files_visits_every_key() {
        let registry = SubdirRegistry::with_defaults();
        let mut seen = Vec::new();
        let res: Result<(), String> = registry
            .clean_temp_files("tmp", |dir| {
                seen.push(dir);
                async { Ok(()) }
            })
            .await;
        assert!(res.is_ok());
        assert_eq!(seen, vec!["tmp/config/0/", "tmp/user/0/"]);
    }

    #[tokio::test]
    async fn clean_temp_files_stops_at_first_error() {
        let registry = SubdirRegistry::with_defaults();
        let mut calls = 0;
        let res = registry
            .clean_temp_files("", |dir| {
                calls += 1;
                async move { Err::<(), _>(format!("cannot delete {dir}")) }
            })
            .await;
        assert_eq!(res.unwrap_err(), "cannot delete config/0/");
        assert_eq!(calls, 1);
    }
}
