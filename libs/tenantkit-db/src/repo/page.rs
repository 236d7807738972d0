use serde::{Deserialize, Serialize};

use crate::query::{Filter, OrderBy};

/// Caller-side list parameters. The tenant clause is never part of it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub filter: Option<Filter>,
    pub order: Vec<OrderBy>,
    pub offset: u64,
    /// `None` means the repository default; values above the maximum are clamped.
    pub limit: Option<u64>,
}

impl ListQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; repeated calls are ANDed.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

impl PageRequest {
    #[must_use]
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }
}

/// One page of results plus the totals needed to navigate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Paginated<E> {
    pub items: Vec<E>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<E> Paginated<E> {
    pub(super) fn new(items: Vec<E>, total: u64, page: u64, page_size: u64) -> Self {
        let pages = total.div_ceil(page_size);
        Self {
            items,
            total,
            page,
            page_size,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }

    /// Transform the items, keeping the navigation fields.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(E) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            pages: self.pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}
