//! Immutable predicate trees and their translation to bound SQL.
//!
//! # Responsibility
//! - Build filters against a descriptor, validating as early as possible.
//! - Translate a tree into a condition fragment plus ordered parameters.
//!
//! # Invariants
//! - Every leaf names a property of the target descriptor.
//! - Literal values only ever leave as positional parameters, one per
//!   leaf, in pre-order with children left to right.
//! - A single-child composite translates to its child's fragment.

use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::ResourceDescriptor;
use crate::sql::quote_ident;
use crate::value::{Value, ValueType};

/// Comparison applied by a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    Glob,
    IsNull,
}

impl Operator {
    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::Glob => "GLOB",
            // Bound NULL keeps one parameter per leaf.
            Self::IsNull => "IS",
        }
    }

    fn accepts(self, ty: ValueType) -> bool {
        match self {
            Self::Eq | Self::Neq | Self::IsNull => true,
            Self::Lt | Self::Lte | Self::Gt | Self::Gte => ty.is_ordered(),
            Self::Like | Self::Glob => ty == ValueType::Text,
        }
    }
}

/// Boolean connective of a composite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    fn to_sql(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        property: String,
        operator: Operator,
        value: Value,
    },
    Composite {
        connective: Connective,
        children: Vec<Filter>,
    },
}

/// Validated predicate tree bound to one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    table: String,
    node: Node,
}

/// Condition text plus the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Filter {
    /// Builds a leaf after checking property, operator and literal type.
    ///
    /// # Errors
    /// - `Validation` for unknown properties, operators that do not apply
    ///   to the property type, or literals of the wrong type.
    pub fn leaf(
        descriptor: &ResourceDescriptor,
        property: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> OrmResult<Self> {
        let (_, definition) = descriptor.require_property(property)?;
        let ty = definition.value_type;
        if !operator.accepts(ty) {
            return Err(OrmError::Validation(format!(
                "operator {operator:?} does not apply to {}.{property} ({ty})",
                descriptor.table
            )));
        }

        let value = value.into();
        let value = if operator == Operator::IsNull {
            Value::Null
        } else {
            if value.is_null() {
                return Err(OrmError::Validation(format!(
                    "{}.{property}: use is_null to match NULL",
                    descriptor.table
                )));
            }
            let kind = value.kind();
            value.conform_to(ty).ok_or_else(|| {
                OrmError::Validation(format!(
                    "{}.{property} expects {ty} but filter literal is {kind}",
                    descriptor.table
                ))
            })?
        };

        Ok(Self {
            table: descriptor.table.clone(),
            node: Node::Leaf {
                property: property.to_string(),
                operator,
                value,
            },
        })
    }

    pub fn eq(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Eq, value)
    }

    pub fn neq(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Neq, value)
    }

    pub fn lt(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Lt, value)
    }

    pub fn lte(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Lte, value)
    }

    pub fn gt(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Gt, value)
    }

    pub fn gte(d: &ResourceDescriptor, property: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Gte, value)
    }

    pub fn like(d: &ResourceDescriptor, property: &str, pattern: &str) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Like, pattern)
    }

    pub fn glob(d: &ResourceDescriptor, property: &str, pattern: &str) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::Glob, pattern)
    }

    pub fn is_null(d: &ResourceDescriptor, property: &str) -> OrmResult<Self> {
        Self::leaf(d, property, Operator::IsNull, Value::Null)
    }

    /// Equality on the descriptor's primary key.
    pub fn primary_key(d: &ResourceDescriptor, value: impl Into<Value>) -> OrmResult<Self> {
        Self::leaf(d, &d.primary_key, Operator::Eq, value)
    }

    pub fn and(children: Vec<Filter>) -> OrmResult<Self> {
        Self::composite(Connective::And, children)
    }

    pub fn or(children: Vec<Filter>) -> OrmResult<Self> {
        Self::composite(Connective::Or, children)
    }

    /// Combines children under one connective.
    ///
    /// # Errors
    /// - `Validation` when `children` is empty or spans several tables.
    pub fn composite(connective: Connective, children: Vec<Filter>) -> OrmResult<Self> {
        let table = match children.first() {
            Some(first) => first.table.clone(),
            None => {
                return Err(OrmError::Validation(format!(
                    "{connective:?} filter needs at least one child"
                )))
            }
        };
        if let Some(stray) = children.iter().find(|child| child.table != table) {
            return Err(OrmError::Validation(format!(
                "cannot combine filters on `{table}` and `{}`",
                stray.table
            )));
        }
        Ok(Self {
            table,
            node: Node::Composite {
                connective,
                children,
            },
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of leaves, which is also the number of bound parameters.
    pub fn leaf_count(&self) -> usize {
        match &self.node {
            Node::Leaf { .. } => 1,
            Node::Composite { children, .. } => children.iter().map(Filter::leaf_count).sum(),
        }
    }

    /// Whether the filter is exactly an equality on the primary key.
    pub fn is_primary_key_lookup(&self, descriptor: &ResourceDescriptor) -> bool {
        match &self.node {
            Node::Leaf {
                property,
                operator: Operator::Eq,
                ..
            } => self.table == descriptor.table && *property == descriptor.primary_key,
            Node::Composite { children, .. } if children.len() == 1 => {
                children[0].is_primary_key_lookup(descriptor)
            }
            _ => false,
        }
    }

    /// Checks that the filter can run against `descriptor`.
    pub(crate) fn check_target(&self, descriptor: &ResourceDescriptor) -> OrmResult<()> {
        if self.table != descriptor.table {
            return Err(OrmError::Validation(format!(
                "filter targets `{}` but query is on `{}`",
                self.table, descriptor.table
            )));
        }
        match &self.node {
            Node::Leaf { property, .. } => descriptor.require_property(property).map(|_| ()),
            Node::Composite { children, .. } => children
                .iter()
                .try_for_each(|child| child.check_target(descriptor)),
        }
    }

    pub fn to_sql(&self) -> SqlFragment {
        let mut fragment = SqlFragment {
            sql: String::new(),
            params: Vec::with_capacity(self.leaf_count()),
        };
        self.write_sql(&mut fragment);
        fragment
    }

    fn write_sql(&self, out: &mut SqlFragment) {
        match &self.node {
            Node::Leaf {
                property,
                operator,
                value,
            } => {
                out.sql.push_str(&quote_ident(property));
                out.sql.push(' ');
                out.sql.push_str(operator.to_sql());
                out.sql.push_str(" ?");
                out.params.push(value.clone());
            }
            Node::Composite { children, .. } if children.len() == 1 => {
                children[0].write_sql(out);
            }
            Node::Composite {
                connective,
                children,
            } => {
                out.sql.push('(');
                for (position, child) in children.iter().enumerate() {
                    if position > 0 {
                        out.sql.push_str(connective.to_sql());
                    }
                    child.write_sql(out);
                }
                out.sql.push(')');
            }
        }
    }
}
