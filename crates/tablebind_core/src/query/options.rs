//! Ordering and paging options for `find`.

use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::ResourceDescriptor;
use crate::sql::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn to_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub property: String,
    pub direction: SortDirection,
}

/// Ordering, limit and offset of a result set.
///
/// The primary key is always appended as the last sort key, so every
/// ordering is total and paging over it is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            property: property.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn validate(&self, descriptor: &ResourceDescriptor) -> OrmResult<()> {
        for order in &self.order_by {
            descriptor.require_property(&order.property)?;
        }
        if self.limit.is_some_and(|limit| limit > i64::MAX as u64) || self.offset > i64::MAX as u64
        {
            return Err(OrmError::Validation("limit/offset out of range".into()));
        }
        Ok(())
    }

    /// `ORDER BY` body, always ending with the primary key.
    pub(crate) fn order_sql(&self, descriptor: &ResourceDescriptor) -> String {
        let mut terms: Vec<String> = self
            .order_by
            .iter()
            .map(|order| format!("{} {}", quote_ident(&order.property), order.direction.to_sql()))
            .collect();
        if !self
            .order_by
            .iter()
            .any(|order| order.property == descriptor.primary_key)
        {
            terms.push(format!("{} ASC", quote_ident(&descriptor.primary_key)));
        }
        terms.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::{FindOptions, SortDirection};
    use crate::model::descriptor::{PropertyDef, ResourceDescriptor};

    fn items() -> ResourceDescriptor {
        ResourceDescriptor::builder("items")
            .primary_key("id")
            .property(PropertyDef::integer("id"))
            .property(PropertyDef::text("name"))
            .build()
            .unwrap()
    }

    #[test]
    fn primary_key_is_the_final_tie_breaker() {
        let d = items();
        let options = FindOptions::new().order_by("name", SortDirection::Descending);
        assert_eq!(options.order_sql(&d), "\"name\" DESC, \"id\" ASC");
        assert_eq!(FindOptions::new().order_sql(&d), "\"id\" ASC");
    }

    #[test]
    fn unknown_sort_property_is_rejected() {
        let d = items();
        assert!(FindOptions::new()
            .order_by("rank", SortDirection::Ascending)
            .validate(&d)
            .is_err());
    }
}
