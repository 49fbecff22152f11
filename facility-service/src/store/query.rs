use super::SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(&'static str, SqlValue),
    Ne(&'static str, SqlValue),
    Lt(&'static str, SqlValue),
    Gt(&'static str, SqlValue),
    In(&'static str, Vec<SqlValue>),
    IsNull(&'static str),
}

impl Condition {
    pub fn column(&self) -> &'static str {
        match self {
            Condition::Eq(c, _)
            | Condition::Ne(c, _)
            | Condition::Lt(c, _)
            | Condition::Gt(c, _)
            | Condition::In(c, _)
            | Condition::IsNull(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Filters, ordering and pagination for a single-table select.
///
/// Conditions are combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub order: Vec<(&'static str, Direction)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub for_update: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        // `= NULL` never matches in SQL, callers mean IS NULL.
        match value.into() {
            SqlValue::Null => self.conditions.push(Condition::IsNull(column)),
            value => self.conditions.push(Condition::Eq(column, value)),
        }
        self
    }

    pub fn ne(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Ne(column, value.into()));
        self
    }

    pub fn lt(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Lt(column, value.into()));
        self
    }

    pub fn gt(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Gt(column, value.into()));
        self
    }

    pub fn is_in<V: Into<SqlValue>>(
        mut self,
        column: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            column,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order.push((column, direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Lock the selected rows until the transaction ends.
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}
