//! Fluent table-scoped query builder.
//!
//! # Responsibility
//! - Accumulate a clause tree (where/join/group/having/order) and
//!   compile it into parameterized SQL.
//! - Route every terminal operation through the owning instance's
//!   execute/fetch primitives; the builder never touches the engine.
//!
//! # Invariants
//! - Compiled placeholders are numbered (`?1`, `?2`, ...) so the Nth
//!   placeholder always binds the Nth accumulated parameter.
//! - Parameters bind in where-bindings, then join-bindings, then
//!   having-bindings order, each category in clause-add order.
//! - Raw fragments may use `?` only as a placeholder; literal question
//!   marks belong in bound values.

use crate::db::database::Database;
use crate::db::DbResult;
use crate::value::{escape_column, normalize, IntoValue, SqlRow};
use rusqlite::types::Value;

/// Sort direction for `ORDER BY` clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

impl Connector {
    fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone)]
enum WhereNode {
    Basic {
        connector: Connector,
        column: String,
        op: String,
        value: Value,
    },
    In {
        connector: Connector,
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Null {
        connector: Connector,
        column: String,
        negated: bool,
    },
    Between {
        connector: Connector,
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    Group {
        connector: Connector,
        nodes: Vec<WhereNode>,
    },
    Raw {
        connector: Connector,
        sql: String,
        params: Vec<Value>,
    },
}

impl WhereNode {
    fn connector(&self) -> Connector {
        match self {
            Self::Basic { connector, .. }
            | Self::In { connector, .. }
            | Self::Null { connector, .. }
            | Self::Between { connector, .. }
            | Self::Group { connector, .. }
            | Self::Raw { connector, .. } => *connector,
        }
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Self::Basic { column, op, value, .. } => {
                params.push(value.clone());
                format!("{} {op} ?", escape_column(column))
            }
            Self::In {
                column,
                values,
                negated,
                ..
            } => {
                // IN over an empty list is invalid SQL; collapse to a
                // constant that preserves the clause's truth table.
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{} {keyword} ({placeholders})", escape_column(column))
            }
            Self::Null {
                column, negated, ..
            } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {keyword}", escape_column(column))
            }
            Self::Between {
                column,
                low,
                high,
                negated,
                ..
            } => {
                params.push(low.clone());
                params.push(high.clone());
                let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                format!("{} {keyword} ? AND ?", escape_column(column))
            }
            Self::Group { nodes, .. } => {
                if nodes.is_empty() {
                    return "1 = 1".to_string();
                }
                format!("({})", render_where_nodes(nodes, params))
            }
            Self::Raw { sql, params: own, .. } => {
                params.extend(own.iter().cloned());
                sql.clone()
            }
        }
    }
}

fn render_where_nodes(nodes: &[WhereNode], params: &mut Vec<Value>) -> String {
    let mut sql = String::new();
    for (index, node) in nodes.iter().enumerate() {
        if index > 0 {
            sql.push(' ');
            sql.push_str(node.connector().as_sql());
            sql.push(' ');
        }
        sql.push_str(&node.render(params));
    }
    sql
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
    Cross,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone)]
enum JoinOn {
    Columns {
        left: String,
        op: String,
        right: String,
    },
    Raw {
        sql: String,
        params: Vec<Value>,
    },
}

#[derive(Debug, Clone)]
struct JoinNode {
    kind: JoinKind,
    table: String,
    on: Option<JoinOn>,
}

impl JoinNode {
    fn render(&self, params: &mut Vec<Value>) -> String {
        let mut sql = format!("{} {}", self.kind.as_sql(), render_table(&self.table));
        match &self.on {
            Some(JoinOn::Columns { left, op, right }) => {
                sql.push_str(&format!(
                    " ON {} {op} {}",
                    escape_column(left),
                    escape_column(right)
                ));
            }
            Some(JoinOn::Raw { sql: on_sql, params: own }) => {
                params.extend(own.iter().cloned());
                sql.push_str(" ON ");
                sql.push_str(on_sql);
            }
            None => {}
        }
        sql
    }
}

#[derive(Debug, Clone)]
enum HavingNode {
    Basic {
        connector: Connector,
        column: String,
        op: String,
        value: Value,
    },
    Raw {
        connector: Connector,
        sql: String,
        params: Vec<Value>,
    },
}

impl HavingNode {
    fn connector(&self) -> Connector {
        match self {
            Self::Basic { connector, .. } | Self::Raw { connector, .. } => *connector,
        }
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Self::Basic { column, op, value, .. } => {
                params.push(value.clone());
                format!("{} {op} ?", escape_column(column))
            }
            Self::Raw { sql, params: own, .. } => {
                params.extend(own.iter().cloned());
                sql.clone()
            }
        }
    }
}

/// Builder for a parenthesized group of where clauses.
#[derive(Debug, Default)]
pub struct Group {
    nodes: Vec<WhereNode>,
}

impl Group {
    pub fn filter(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.nodes.push(WhereNode::Basic {
            connector: Connector::And,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn or_filter(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.nodes.push(WhereNode::Basic {
            connector: Connector::Or,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn filter_null(mut self, column: &str) -> Self {
        self.nodes.push(WhereNode::Null {
            connector: Connector::And,
            column: column.to_string(),
            negated: false,
        });
        self
    }

    pub fn or_filter_null(mut self, column: &str) -> Self {
        self.nodes.push(WhereNode::Null {
            connector: Connector::Or,
            column: column.to_string(),
            negated: false,
        });
        self
    }

    pub fn filter_raw(mut self, sql: &str, params: Vec<Value>) -> Self {
        self.nodes.push(WhereNode::Raw {
            connector: Connector::And,
            sql: sql.to_string(),
            params,
        });
        self
    }
}

/// Page of results plus pagination bookkeeping.
#[derive(Debug)]
pub struct Pagination {
    pub rows: Vec<SqlRow>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

/// Table-scoped fluent query builder bound to one database instance.
///
/// Obtained via [`Database::query`]. Clause methods consume and return
/// the builder; terminals borrow it, so a finished builder can run
/// several terminals (`count` then `paginate`, chunked reads, ...).
pub struct Query<'db> {
    db: &'db Database,
    table: String,
    columns: Vec<String>,
    distinct: bool,
    wheres: Vec<WhereNode>,
    joins: Vec<JoinNode>,
    groups: Vec<String>,
    havings: Vec<HavingNode>,
    orders: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<'db> Query<'db> {
    pub(crate) fn new(db: &'db Database, table: &str) -> Self {
        Self {
            db,
            table: table.to_string(),
            columns: Vec::new(),
            distinct: false,
            wheres: Vec::new(),
            joins: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    // ---- projection ------------------------------------------------------

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // ---- where clauses ---------------------------------------------------

    pub fn filter(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.wheres.push(WhereNode::Basic {
            connector: Connector::And,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn or_filter(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.wheres.push(WhereNode::Basic {
            connector: Connector::Or,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn filter_in<I, T>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoValue,
    {
        self.wheres.push(in_node(column, values, false));
        self
    }

    pub fn filter_not_in<I, T>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoValue,
    {
        self.wheres.push(in_node(column, values, true));
        self
    }

    pub fn filter_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereNode::Null {
            connector: Connector::And,
            column: column.to_string(),
            negated: false,
        });
        self
    }

    pub fn filter_not_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereNode::Null {
            connector: Connector::And,
            column: column.to_string(),
            negated: true,
        });
        self
    }

    pub fn filter_between(
        mut self,
        column: &str,
        low: impl IntoValue,
        high: impl IntoValue,
    ) -> Self {
        self.wheres.push(between_node(column, low, high, false));
        self
    }

    pub fn filter_not_between(
        mut self,
        column: &str,
        low: impl IntoValue,
        high: impl IntoValue,
    ) -> Self {
        self.wheres.push(between_node(column, low, high, true));
        self
    }

    /// Adds a parenthesized AND-connected group built by `build`.
    pub fn filter_group(mut self, build: impl FnOnce(Group) -> Group) -> Self {
        self.wheres.push(WhereNode::Group {
            connector: Connector::And,
            nodes: build(Group::default()).nodes,
        });
        self
    }

    /// Adds a parenthesized OR-connected group built by `build`.
    pub fn or_filter_group(mut self, build: impl FnOnce(Group) -> Group) -> Self {
        self.wheres.push(WhereNode::Group {
            connector: Connector::Or,
            nodes: build(Group::default()).nodes,
        });
        self
    }

    pub fn filter_raw(mut self, sql: &str, params: Vec<Value>) -> Self {
        self.wheres.push(WhereNode::Raw {
            connector: Connector::And,
            sql: sql.to_string(),
            params,
        });
        self
    }

    // ---- joins -----------------------------------------------------------

    pub fn join(mut self, table: &str, left: &str, op: &str, right: &str) -> Self {
        self.joins.push(column_join(JoinKind::Inner, table, left, op, right));
        self
    }

    pub fn left_join(mut self, table: &str, left: &str, op: &str, right: &str) -> Self {
        self.joins.push(column_join(JoinKind::Left, table, left, op, right));
        self
    }

    pub fn cross_join(mut self, table: &str) -> Self {
        self.joins.push(JoinNode {
            kind: JoinKind::Cross,
            table: table.to_string(),
            on: None,
        });
        self
    }

    pub fn join_raw(mut self, table: &str, on_sql: &str, params: Vec<Value>) -> Self {
        self.joins.push(JoinNode {
            kind: JoinKind::Inner,
            table: table.to_string(),
            on: Some(JoinOn::Raw {
                sql: on_sql.to_string(),
                params,
            }),
        });
        self
    }

    // ---- grouping / having / ordering / pagination -----------------------

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.groups
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn having(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.havings.push(HavingNode::Basic {
            connector: Connector::And,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn or_having(mut self, column: &str, op: &str, value: impl IntoValue) -> Self {
        self.havings.push(HavingNode::Basic {
            connector: Connector::Or,
            column: column.to_string(),
            op: op.to_string(),
            value: normalize(value.into_value()),
        });
        self
    }

    pub fn having_raw(mut self, sql: &str, params: Vec<Value>) -> Self {
        self.havings.push(HavingNode::Raw {
            connector: Connector::And,
            sql: sql.to_string(),
            params,
        });
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.orders.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    // ---- compilation -----------------------------------------------------

    /// Compiles the builder to SQL text plus its positional parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.compile(&self.columns, self.limit, self.offset)
    }

    fn compile(
        &self,
        columns: &[String],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = Vec::new();

        // Sections are rendered and numbered in binding order (where,
        // join, having) even though joins precede WHERE in the text;
        // numbered placeholders keep text position and binding order
        // independent.
        let where_raw = render_where_nodes(&self.wheres, &mut params);
        let join_raw = self
            .joins
            .iter()
            .map(|join| join.render(&mut params))
            .collect::<Vec<_>>()
            .join(" ");
        let mut having_nodes_sql = String::new();
        for (index, node) in self.havings.iter().enumerate() {
            if index > 0 {
                having_nodes_sql.push(' ');
                having_nodes_sql.push_str(node.connector().as_sql());
                having_nodes_sql.push(' ');
            }
            having_nodes_sql.push_str(&node.render(&mut params));
        }

        let mut next = 0usize;
        let where_sql = number_placeholders(&where_raw, &mut next);
        let join_sql = number_placeholders(&join_raw, &mut next);
        let having_sql = number_placeholders(&having_nodes_sql, &mut next);

        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| render_select_column(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&projection);
        sql.push_str(" FROM ");
        sql.push_str(&render_table(&self.table));
        if !join_sql.is_empty() {
            sql.push(' ');
            sql.push_str(&join_sql);
        }
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(
                &self
                    .groups
                    .iter()
                    .map(|c| escape_column(c))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        if !having_sql.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&having_sql);
        }
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .orders
                    .iter()
                    .map(|(column, direction)| {
                        format!("{} {}", escape_column(column), direction.as_sql())
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        } else if let Some(offset) = offset {
            sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"));
        }

        (sql, params)
    }

    // ---- read terminals --------------------------------------------------

    pub fn get(&self) -> DbResult<Vec<SqlRow>> {
        let (sql, params) = self.to_sql();
        self.db.fetch_all(&sql, &params)
    }

    pub fn first(&self) -> DbResult<Option<SqlRow>> {
        let (sql, params) = self.compile(&self.columns, Some(1), self.offset);
        self.db.fetch(&sql, &params)
    }

    /// First row's value for one column, if any row matches.
    pub fn value(&self, column: &str) -> DbResult<Option<Value>> {
        let (sql, params) = self.compile(&[column.to_string()], Some(1), self.offset);
        self.db.fetch_scalar(&sql, &params)
    }

    /// One column across all matching rows.
    pub fn pluck(&self, column: &str) -> DbResult<Vec<Value>> {
        let (sql, params) = self.compile(&[column.to_string()], self.limit, self.offset);
        let rows = self.db.fetch_all(&sql, &params)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_values().next())
            .collect())
    }

    // ---- aggregates ------------------------------------------------------

    pub fn count(&self) -> DbResult<u64> {
        let (sql, params) = self.compile_aggregate("COUNT(*)");
        match self.db.fetch_scalar(&sql, &params)? {
            Some(Value::Integer(n)) => Ok(u64::try_from(n).unwrap_or(0)),
            _ => Ok(0),
        }
    }

    pub fn exists(&self) -> DbResult<bool> {
        let one = ["1".to_string()];
        let (inner, params) = self.compile(&one, Some(1), None);
        let sql = format!("SELECT EXISTS ({inner})");
        match self.db.fetch_scalar(&sql, &params)? {
            Some(Value::Integer(n)) => Ok(n != 0),
            _ => Ok(false),
        }
    }

    pub fn sum(&self, column: &str) -> DbResult<Option<Value>> {
        self.aggregate(&format!("SUM({})", escape_column(column)))
    }

    pub fn avg(&self, column: &str) -> DbResult<Option<Value>> {
        self.aggregate(&format!("AVG({})", escape_column(column)))
    }

    pub fn min(&self, column: &str) -> DbResult<Option<Value>> {
        self.aggregate(&format!("MIN({})", escape_column(column)))
    }

    pub fn max(&self, column: &str) -> DbResult<Option<Value>> {
        self.aggregate(&format!("MAX({})", escape_column(column)))
    }

    fn aggregate(&self, expr: &str) -> DbResult<Option<Value>> {
        let (sql, params) = self.compile_aggregate(expr);
        match self.db.fetch_scalar(&sql, &params)? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(value)),
        }
    }

    fn compile_aggregate(&self, expr: &str) -> (String, Vec<Value>) {
        let projection = [expr.to_string()];
        if self.groups.is_empty() && !self.distinct {
            self.compile(&projection, None, None)
        } else {
            // GROUP BY and DISTINCT change row multiplicity; wrap so
            // the aggregate sees the reduced result set.
            let (inner, params) = self.compile(&self.columns, None, None);
            (format!("SELECT {expr} FROM ({inner})"), params)
        }
    }

    // ---- iteration / pagination ------------------------------------------

    /// Pages through results `size` rows at a time.
    ///
    /// Stops when a page comes back short or when `callback` returns
    /// `Ok(false)`.
    pub fn chunk(
        &self,
        size: u64,
        mut callback: impl FnMut(&[SqlRow]) -> DbResult<bool>,
    ) -> DbResult<()> {
        let size = size.max(1);
        let mut offset = 0u64;
        loop {
            let (sql, params) = self.compile(&self.columns, Some(size), Some(offset));
            let rows = self.db.fetch_all(&sql, &params)?;
            if rows.is_empty() {
                return Ok(());
            }
            let keep_going = callback(&rows)?;
            if !keep_going || (rows.len() as u64) < size {
                return Ok(());
            }
            offset += size;
        }
    }

    /// Fetches one 1-based page of results plus paging bookkeeping.
    pub fn paginate(&self, per_page: u64, page: u64) -> DbResult<Pagination> {
        let per_page = per_page.max(1);
        let page = page.max(1);

        let total = self.count()?;
        let last_page = total.div_ceil(per_page).max(1);
        let (sql, params) =
            self.compile(&self.columns, Some(per_page), Some((page - 1) * per_page));
        let rows = self.db.fetch_all(&sql, &params)?;

        Ok(Pagination {
            rows,
            total,
            per_page,
            current_page: page,
            last_page,
            next_page: (page < last_page).then(|| page + 1),
            prev_page: (page > 1).then(|| page - 1),
        })
    }

    // ---- mutations -------------------------------------------------------

    /// Inserts one row, returning its rowid.
    pub fn insert(&self, data: &[(&str, Value)]) -> DbResult<i64> {
        let columns = data
            .iter()
            .map(|(column, _)| escape_column(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=data.len())
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            render_table(&self.table)
        );
        let params: Vec<Value> = data.iter().map(|(_, v)| normalize(v.clone())).collect();
        let (_, rowid) = self.db.execute_returning_rowid(&sql, &params)?;
        Ok(rowid)
    }

    /// Inserts several rows sharing one column list, returning the
    /// affected row count.
    pub fn insert_many(&self, columns: &[&str], rows: &[Vec<Value>]) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let column_sql = columns
            .iter()
            .map(|c| escape_column(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut next = 0usize;
        let groups = rows
            .iter()
            .map(|row| {
                let group = (1..=row.len())
                    .map(|n| format!("?{}", next + n))
                    .collect::<Vec<_>>()
                    .join(", ");
                next += row.len();
                format!("({group})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_sql}) VALUES {groups}",
            render_table(&self.table)
        );
        let params: Vec<Value> = rows
            .iter()
            .flat_map(|row| row.iter().cloned().map(normalize))
            .collect();
        self.db.execute(&sql, &params)
    }

    /// Updates all rows matching the builder's where tree.
    pub fn update(&self, data: &[(&str, Value)]) -> DbResult<usize> {
        let mut params: Vec<Value> = data.iter().map(|(_, v)| normalize(v.clone())).collect();
        let assignments = data
            .iter()
            .enumerate()
            .map(|(index, (column, _))| format!("{} = ?{}", escape_column(column), index + 1))
            .collect::<Vec<_>>()
            .join(", ");

        let mut where_params: Vec<Value> = Vec::new();
        let where_raw = render_where_nodes(&self.wheres, &mut where_params);
        let mut next = params.len();
        let where_sql = number_placeholders(&where_raw, &mut next);
        params.extend(where_params);

        let mut sql = format!(
            "UPDATE {} SET {assignments}",
            render_table(&self.table)
        );
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        self.db.execute(&sql, &params)
    }

    /// Deletes all rows matching the builder's where tree.
    pub fn delete(&self) -> DbResult<usize> {
        let mut params: Vec<Value> = Vec::new();
        let where_raw = render_where_nodes(&self.wheres, &mut params);
        let mut next = 0usize;
        let where_sql = number_placeholders(&where_raw, &mut next);

        let mut sql = format!("DELETE FROM {}", render_table(&self.table));
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        self.db.execute(&sql, &params)
    }
}

fn in_node<I, T>(column: &str, values: I, negated: bool) -> WhereNode
where
    I: IntoIterator<Item = T>,
    T: IntoValue,
{
    WhereNode::In {
        connector: Connector::And,
        column: column.to_string(),
        values: values
            .into_iter()
            .map(|v| normalize(v.into_value()))
            .collect(),
        negated,
    }
}

fn between_node(
    column: &str,
    low: impl IntoValue,
    high: impl IntoValue,
    negated: bool,
) -> WhereNode {
    WhereNode::Between {
        connector: Connector::And,
        column: column.to_string(),
        low: normalize(low.into_value()),
        high: normalize(high.into_value()),
        negated,
    }
}

fn column_join(kind: JoinKind, table: &str, left: &str, op: &str, right: &str) -> JoinNode {
    JoinNode {
        kind,
        table: table.to_string(),
        on: Some(JoinOn::Columns {
            left: left.to_string(),
            op: op.to_string(),
            right: right.to_string(),
        }),
    }
}

fn render_select_column(column: &str) -> String {
    // `*`, `t.*`, aliased expressions and numeric literals pass
    // through untouched; quoting a literal would turn it into an
    // identifier.
    if column.contains('*')
        || column.contains(' ')
        || column.chars().all(|c| c.is_ascii_digit())
    {
        return column.to_string();
    }
    escape_column(column)
}

fn render_table(table: &str) -> String {
    if table.contains(' ') {
        return table.to_string();
    }
    escape_column(table)
}

/// Rewrites each naked `?` as a numbered `?N` placeholder, continuing
/// from `next`.
fn number_placeholders(sql: &str, next: &mut usize) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    for ch in sql.chars() {
        if ch == '?' {
            *next += 1;
            out.push_str(&format!("?{next}"));
        } else {
            out.push(ch);
        }
    }
    out
}
