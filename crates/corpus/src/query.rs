//! The fluent query frontend over the corpus.
//!
//! Every user-supplied predicate, projection, and key function runs
//! inside an open-session guard: the app's archive session is entered,
//! the function runs against the [`Session`], and the session closes
//! before the pipeline moves on — under exceptions too. Stages are lazy
//! and parallel (per-element work dispatches onto the corpus pool) with
//! output order always matching input order.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;

use models::LockStore;
use seq::{Pool, Seq};

use crate::app::{from_lock_entry, App};
use crate::session::Session;
use crate::Datum;

/// A per-app projection, evaluated inside the app's open session.
pub type AppFn = Arc<dyn Fn(&Session<'_>) -> Datum + Send + Sync>;

/// A per-group projection, evaluated against the group's `Apps`.
pub type GroupFn = Arc<dyn Fn(&Apps) -> Datum + Send + Sync>;

/// Convenience constructor for a named [`AppFn`] column.
pub fn column(
    name: &str,
    f: impl Fn(&Session<'_>) -> Datum + Send + Sync + 'static,
) -> (String, AppFn) {
    (name.to_owned(), Arc::new(f))
}

/// Convenience constructor for a named [`GroupFn`] column.
pub fn group_column(
    name: &str,
    f: impl Fn(&Apps) -> Datum + Send + Sync + 'static,
) -> (String, GroupFn) {
    (name.to_owned(), Arc::new(f))
}

/// A queryable sequence of apps, optionally tagged with grouping values
/// and carrying the selector its groups render with.
#[derive(Clone)]
pub struct Apps {
    seq: Seq<App>,
    groupings: Arc<IndexMap<String, Datum>>,
    selector: Arc<Vec<(String, GroupFn)>>,
}

impl Apps {
    /// Load the corpus: every successful lock entry becomes an app, and
    /// the pipeline root owns a worker pool of the given width.
    pub fn init(cache_dir: &Path, pool_size: usize) -> anyhow::Result<Apps> {
        let lock = LockStore::new(cache_dir)
            .read()
            .context("failed to locate or read the lock file")?;
        let apps: Vec<App> = lock
            .values()
            .filter(|entry| entry.is_success())
            .map(|entry| from_lock_entry(entry, cache_dir))
            .collect();
        let pool = Pool::new(pool_size).context("failed to build the corpus worker pool")?;
        Ok(Apps {
            seq: Seq::of(apps).with_pool(Some(pool)),
            groupings: Arc::new(IndexMap::new()),
            selector: Arc::new(Vec::new()),
        })
    }

    /// A corpus over the given apps, without a pool. Tests and embedders.
    pub fn from_apps(apps: Vec<App>) -> Apps {
        Apps {
            seq: Seq::of(apps),
            groupings: Arc::new(IndexMap::new()),
            selector: Arc::new(Vec::new()),
        }
    }

    fn with_seq(&self, seq: Seq<App>) -> Apps {
        Apps {
            seq,
            groupings: Arc::clone(&self.groupings),
            selector: Arc::clone(&self.selector),
        }
    }

    pub fn iter(&self) -> seq::Cursor<App> {
        self.seq.iter()
    }

    pub fn list(&self) -> Vec<App> {
        self.seq.list()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn nth(&self, n: usize) -> Option<App> {
        self.seq.nth(n)
    }

    pub fn limit(&self, n: usize) -> Apps {
        self.with_seq(self.seq.take(n))
    }

    pub fn slice(&self, start: usize, end: Option<usize>) -> Apps {
        self.with_seq(self.seq.slice(start, end))
    }

    /// Keep apps for which the predicate holds. One failing app fails
    /// closed (`false`), not the whole pipeline.
    pub fn where_(
        &self,
        predicate: impl Fn(&Session<'_>) -> bool + Send + Sync + 'static,
    ) -> Apps {
        self.with_seq(self.seq.filter(move |app| app.scope(|s| predicate(s))))
    }

    /// Attach projected columns to each app (as `App::data`).
    pub fn select(&self, columns: Vec<(String, AppFn)>) -> Apps {
        let columns = Arc::new(columns);
        self.with_seq(self.seq.map(move |app| {
            let data = app.scope(|s| {
                columns
                    .iter()
                    .map(|(name, f)| (name.clone(), f(s)))
                    .collect::<IndexMap<String, Datum>>()
            });
            app.with_data(data)
        }))
    }

    /// Stable sort by a per-app key; key evaluation is parallel.
    pub fn order_by(
        &self,
        key: impl Fn(&Session<'_>) -> Datum + Send + Sync + 'static,
        reverse: bool,
    ) -> Apps {
        self.with_seq(
            self.seq
                .sort_by_key(move |app| app.scope(|s| key(s)), reverse),
        )
    }

    /// Multi-column grouping. Groups come out in ascending key order,
    /// each tagged with its grouping values and inheriting this
    /// pipeline's selector.
    pub fn group_by(&self, columns: Vec<(String, AppFn)>) -> AppGroups {
        let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        let key_fns: Vec<AppFn> = columns.into_iter().map(|(_, f)| f).collect();
        let selector = Arc::clone(&self.selector);
        let key = move |app: &App| {
            app.scope(|s| key_fns.iter().map(|f| f(s)).collect::<Vec<Datum>>())
        };
        let build = move |key: Vec<Datum>, members: Seq<App>| Apps {
            seq: members,
            groupings: Arc::new(names.iter().cloned().zip(key).collect()),
            selector: Arc::clone(&selector),
        };
        AppGroups {
            seq: self.seq.group_by(key, build),
        }
    }

    /// Distinct repositories: one app per `(org, app)`, preferring the
    /// environment that sorts first (`prod` before `tt02`).
    pub fn unique_repos(&self) -> Apps {
        self.with_seq(
            self.seq
                .sort_by_key(|app| app.env().to_string(), false)
                .unique_by(|app| app.repo_key()),
        )
    }

    /// Per-app map, then left-fold; `None` on an empty corpus.
    pub fn map_reduce<T: Clone + Send + 'static>(
        &self,
        map: impl Fn(&Session<'_>) -> T + Send + Sync + 'static,
        reduce: impl Fn(T, T) -> T,
    ) -> Option<T> {
        self.seq
            .map(move |app| app.scope(|s| map(s)))
            .reduce(reduce)
    }

    /// Replace the selector rendered by group materializations.
    pub fn with_selector(&self, selector: Vec<(String, GroupFn)>) -> Apps {
        Apps {
            seq: self.seq.clone(),
            groupings: Arc::clone(&self.groupings),
            selector: Arc::new(selector),
        }
    }

    pub fn group_keys(&self) -> Vec<String> {
        self.groupings.keys().cloned().collect()
    }

    pub fn group_values(&self) -> Vec<Datum> {
        self.groupings.values().cloned().collect()
    }

    pub fn data_keys(&self) -> Vec<String> {
        self.selector.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn data_values(&self) -> Vec<Datum> {
        self.selector.iter().map(|(_, f)| f(self)).collect()
    }

    /// Resolve a name against groupings first, then the selector —
    /// `group.get("Count")` works either way the column was declared.
    pub fn get(&self, name: &str) -> Option<Datum> {
        if let Some(value) = self.groupings.get(name) {
            return Some(value.clone());
        }
        self.selector
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, f)| f(self))
    }
}

/// The result of `group_by`: a queryable sequence of tagged groups.
#[derive(Clone)]
pub struct AppGroups {
    pub(crate) seq: Seq<Apps>,
}

impl AppGroups {
    pub fn list(&self) -> Vec<Apps> {
        self.seq.list()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn nth(&self, n: usize) -> Option<Apps> {
        self.seq.nth(n)
    }

    pub fn limit(&self, n: usize) -> AppGroups {
        AppGroups {
            seq: self.seq.take(n),
        }
    }

    pub fn slice(&self, start: usize, end: Option<usize>) -> AppGroups {
        AppGroups {
            seq: self.seq.slice(start, end),
        }
    }

    pub fn where_(&self, predicate: impl Fn(&Apps) -> bool + Send + Sync + 'static) -> AppGroups {
        AppGroups {
            seq: self.seq.filter(move |group| predicate(group)),
        }
    }

    pub fn order_by(
        &self,
        key: impl Fn(&Apps) -> Datum + Send + Sync + 'static,
        reverse: bool,
    ) -> AppGroups {
        AppGroups {
            seq: self.seq.sort_by_key(move |group| key(group), reverse),
        }
    }

    /// Declare the columns each group renders with.
    pub fn select(&self, selector: Vec<(String, GroupFn)>) -> AppGroups {
        let selector = Arc::new(selector);
        AppGroups {
            seq: self.seq.map(move |group| {
                group.with_selector(selector.as_ref().clone())
            }),
        }
    }
}
