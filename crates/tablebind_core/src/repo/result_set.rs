//! Lazy, restartable query results.
//!
//! A `ResultSet` captures a query; statements run only when it is read.
//! Every read re-queries the store, so a set can be iterated more than
//! once and always reflects the rows present at read time.

use super::repository::Repository;
use crate::db::PendingOp;
use crate::error::OrmResult;
use crate::model::descriptor::ResourceDescriptor;
use crate::model::resource::Resource;
use crate::query::filter::Filter;
use crate::query::options::FindOptions;
use std::collections::VecDeque;
use std::sync::Arc;

const PAGE_SIZE: u64 = 64;

#[derive(Debug, Clone)]
pub struct ResultSet {
    repository: Repository,
    descriptor: Arc<ResourceDescriptor>,
    filter: Option<Filter>,
    options: FindOptions,
}

impl ResultSet {
    pub(crate) fn new(
        repository: Repository,
        descriptor: Arc<ResourceDescriptor>,
        filter: Option<Filter>,
        options: FindOptions,
    ) -> Self {
        Self {
            repository,
            descriptor,
            filter,
            options,
        }
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Number of rows the set currently covers.
    pub fn count(&self) -> OrmResult<u64> {
        self.count_async().wait()
    }

    pub fn count_async(&self) -> PendingOp<u64> {
        self.repository.count_window_async(
            Arc::clone(&self.descriptor),
            self.filter.clone(),
            self.options.offset,
            self.options.limit,
        )
    }

    /// Up to `limit` instances starting at `offset` within the set.
    pub fn fetch(&self, offset: u64, limit: u64) -> OrmResult<Vec<Resource>> {
        self.fetch_async(offset, limit).wait()
    }

    pub fn fetch_async(&self, offset: u64, limit: u64) -> PendingOp<Vec<Resource>> {
        match self.window(offset, Some(limit)) {
            Some((start, limit)) => self.repository.select_async(
                Arc::clone(&self.descriptor),
                self.filter.clone(),
                self.options.order_sql(&self.descriptor),
                start,
                limit,
            ),
            None => PendingOp::ready(Ok(Vec::new())),
        }
    }

    /// Every instance in the set, in order.
    pub fn collect_all(&self) -> OrmResult<Vec<Resource>> {
        self.collect_all_async().wait()
    }

    pub fn collect_all_async(&self) -> PendingOp<Vec<Resource>> {
        match self.window(0, None) {
            Some((start, limit)) => self.repository.select_async(
                Arc::clone(&self.descriptor),
                self.filter.clone(),
                self.options.order_sql(&self.descriptor),
                start,
                limit,
            ),
            None => PendingOp::ready(Ok(Vec::new())),
        }
    }

    /// Iterates the set page by page using blocking fetches.
    pub fn iter(&self) -> ResultIter {
        ResultIter {
            set: self.clone(),
            buffer: VecDeque::new(),
            position: 0,
            done: false,
        }
    }

    /// Maps a window relative to the set onto absolute offset and limit;
    /// `None` when the window is empty or starts beyond any addressable row.
    fn window(&self, offset: u64, limit: Option<u64>) -> Option<(u64, Option<u64>)> {
        let remaining = match self.options.limit {
            Some(total) if offset >= total => return None,
            Some(total) => Some(total - offset),
            None => None,
        };
        let limit = match (limit, remaining) {
            (Some(requested), Some(remaining)) => Some(requested.min(remaining)),
            (requested, remaining) => requested.or(remaining),
        };
        if limit == Some(0) {
            return None;
        }
        let start = self.options.offset.checked_add(offset)?;
        i64::try_from(start).ok()?;
        Some((start, limit))
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = OrmResult<Resource>;
    type IntoIter = ResultIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Paging iterator over a [`ResultSet`].
///
/// Yields one error and then stops if a page cannot be read.
pub struct ResultIter {
    set: ResultSet,
    buffer: VecDeque<Resource>,
    position: u64,
    done: bool,
}

impl Iterator for ResultIter {
    type Item = OrmResult<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(resource) = self.buffer.pop_front() {
            return Some(Ok(resource));
        }
        if self.done {
            return None;
        }
        match self.set.fetch(self.position, PAGE_SIZE) {
            Ok(page) => {
                let fetched = page.len() as u64;
                if fetched < PAGE_SIZE {
                    self.done = true;
                }
                self.position += fetched;
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
