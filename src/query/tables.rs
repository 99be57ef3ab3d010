//! Table resolution and join discovery.
//!
//! An aggregate names the tables its columns come from plus any forced joins.
//! From those this module finds the one primary extraction table, checks that
//! every table lives on the same engine, and discovers join lines by walking
//! the catalogue's join graph outward from the anchor table:
//!
//! ```text
//! FROM
//! [biochem]..[Results]
//! INNER JOIN [biochem]..[Headers] ON r.header_id = h.id
//! ```
//!
//! Tables only reachable through an unreferenced table pull that table in.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::error::{QueryBuildingError, QueryResult};
use crate::model::{Catalogue, TableId, TableInfo};
use crate::sql::Dialect;

#[derive(Debug, Clone)]
pub struct ResolvedTables<'a> {
    /// The table every other table is joined onto.
    pub anchor: &'a TableInfo,
    pub primary: Option<&'a TableInfo>,
    /// Anchor first, then joined tables in join order.
    pub tables: Vec<&'a TableInfo>,
    pub joins: Vec<String>,
    pub dialect: Dialect,
}

impl ResolvedTables<'_> {
    pub fn from_sql(&self) -> String {
        let mut sql = format!("FROM\n{}", self.anchor.name);
        for join in &self.joins {
            sql.push('\n');
            sql.push_str(join);
        }
        sql
    }
}

/// Resolve the tables behind an aggregate's columns and forced joins.
pub fn resolve_tables<'a, I>(
    catalogue: &'a Catalogue,
    referenced: I,
    forced: &[TableId],
    aggregate: &str,
) -> QueryResult<ResolvedTables<'a>>
where
    I: IntoIterator<Item = TableId>,
{
    let mut ids: Vec<TableId> = Vec::new();
    for id in referenced.into_iter().chain(forced.iter().copied()) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let tables = ids
        .iter()
        .map(|&id| {
            catalogue.table(id).ok_or_else(|| QueryBuildingError::UnknownTable {
                aggregate: aggregate.to_string(),
                table: id,
            })
        })
        .collect::<QueryResult<Vec<_>>>()?;

    let Some(&first) = tables.first() else {
        return Err(QueryBuildingError::NoTables {
            aggregate: aggregate.to_string(),
        });
    };

    let mut primaries = tables.iter().filter(|t| t.is_primary_extraction_table);
    let primary = primaries.next().copied();
    if let (Some(a), Some(b)) = (primary, primaries.next()) {
        return Err(QueryBuildingError::AmbiguousPrimaryTable {
            aggregate: aggregate.to_string(),
            first: a.name.clone(),
            second: b.name.clone(),
        });
    }

    let dialect = first.dialect;
    if tables.iter().any(|t| t.dialect != dialect) {
        let mut dialects: Vec<String> = Vec::new();
        for t in &tables {
            let name = t.dialect.to_string();
            if !dialects.contains(&name) {
                dialects.push(name);
            }
        }
        return Err(QueryBuildingError::MixedDialects {
            name: aggregate.to_string(),
            dialects,
        });
    }

    let anchor = primary.unwrap_or(first);
    let (joined, joins) = discover_joins(catalogue, anchor, &tables, aggregate)?;

    let mut all = vec![anchor];
    all.extend(joined);

    Ok(ResolvedTables {
        anchor,
        primary,
        tables: all,
        joins,
        dialect,
    })
}

fn discover_joins<'a>(
    catalogue: &'a Catalogue,
    anchor: &'a TableInfo,
    required: &[&'a TableInfo],
    aggregate: &str,
) -> QueryResult<(Vec<&'a TableInfo>, Vec<String>)> {
    let mut graph: UnGraph<TableId, usize> = UnGraph::new_undirected();
    let mut nodes: HashMap<TableId, NodeIndex> = HashMap::new();
    for table in &catalogue.tables {
        nodes.insert(table.id, graph.add_node(table.id));
    }
    for (i, join) in catalogue.joins.iter().enumerate() {
        if let (Some(&fk), Some(&pk)) = (
            nodes.get(&join.foreign_key.table_id),
            nodes.get(&join.primary_key.table_id),
        ) {
            graph.add_edge(fk, pk, i);
        }
    }

    let Some(&start) = nodes.get(&anchor.id) else {
        return Ok((Vec::new(), Vec::new()));
    };

    // BFS with parent pointers, remembering discovery order
    let mut parents: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
    let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
    let mut order: Vec<NodeIndex> = Vec::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for edge in graph.edges(current) {
            let id = edge.id();
            let Some((a, b)) = graph.edge_endpoints(id) else {
                continue;
            };
            let neighbor = if a == current { b } else { a };
            if visited.insert(neighbor) {
                parents.insert(neighbor, (current, id));
                order.push(neighbor);
                queue.push_back(neighbor);
            }
        }
    }

    let mut needed: HashSet<NodeIndex> = HashSet::new();
    for table in required {
        if table.id == anchor.id {
            continue;
        }
        let mut node = nodes[&table.id];
        if !parents.contains_key(&node) {
            return Err(QueryBuildingError::UnjoinableTable {
                aggregate: aggregate.to_string(),
                from: anchor.name.clone(),
                table: table.name.clone(),
            });
        }
        while let Some(&(parent, _)) = parents.get(&node) {
            if !needed.insert(node) {
                break;
            }
            node = parent;
        }
    }

    let mut joined = Vec::new();
    let mut lines = Vec::new();
    for node in order.into_iter().filter(|n| needed.contains(n)) {
        let (_, edge) = parents[&node];
        let join = &catalogue.joins[graph[edge]];
        let table_id = graph[node];
        let Some(table) = catalogue.table(table_id) else {
            continue;
        };
        // join_type reads fk -> pk; flip it when the fk side is the one being added
        let kind = if join.primary_key.table_id == table_id {
            join.join_type
        } else {
            join.join_type.flipped()
        };
        lines.push(format!(
            "{} {} ON {} = {}",
            kind.keyword(),
            table.name,
            join.foreign_key.column,
            join.primary_key.column
        ));
        joined.push(table);
    }

    Ok((joined, lines))
}
