//! Lines of an aggregate query.
//!
//! The aggregate builder emits its statement as a list of lines, each tagged
//! with the clause it belongs to and, where it matters to the renderer, the
//! role it plays (axis column, count column, pivot column, top x).

use super::fragment::SqlFragment;

/// The clause a line belongs to, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryComponent {
    VariableDeclaration,
    Select,
    QueryTimeColumn,
    From,
    JoinInfoJoin,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Postfix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum LineRole {
    #[default]
    None,
    Axis,
    CountFunction,
    Pivot,
    TopX,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLine {
    pub fragment: SqlFragment,
    pub component: QueryComponent,
    pub role: LineRole,
}

impl QueryLine {
    pub fn new(fragment: impl Into<SqlFragment>, component: QueryComponent) -> Self {
        Self {
            fragment: fragment.into(),
            component,
            role: LineRole::None,
        }
    }

    pub fn with_role(mut self, role: LineRole) -> Self {
        self.role = role;
        self
    }

    /// Text with `@name` markers, for inspection.
    pub fn text(&self) -> String {
        self.fragment.to_string()
    }
}
