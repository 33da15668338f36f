//! Query engine
//!
//! A [`Query`] holds "get" filters, whose matches are candidates, and "keep"
//! filters, whose matches are removed from the candidates. Each applicable
//! filter runs as its own task against one index; results are gathered
//! under a deadline, then subtracted, deduplicated, limited and optionally
//! reversed.
//!
//! Within one filter the order is the index's byte order. Across filters
//! results are concatenated in the order the filters were added.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cellar_core::{Error, Filter, FilterOp, Result};
use cellar_storage::{Direction, SecondaryIndex};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// A programmatic query over a collection's indexes
///
/// # Example
///
/// ```
/// use cellar_core::Filter;
/// use cellar_engine::Query;
///
/// let query = Query::new()
///     .get(Filter::greater("age", 20))
///     .keep(Filter::equal("status", "banned"))
///     .limit(10)
///     .distinct();
/// assert_eq!(query.get_filters().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    get: Vec<Filter>,
    keep: Vec<Filter>,
    limit: usize,
    distinct: bool,
    reverse: bool,
    timeout: Option<Duration>,
}

impl Query {
    /// Empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter whose matches are candidates
    pub fn get(mut self, filter: Filter) -> Self {
        self.get.push(filter);
        self
    }

    /// Add a filter whose matches are excluded
    pub fn keep(mut self, filter: Filter) -> Self {
        self.keep.push(filter);
        self
    }

    /// Cap the number of results; 0 uses the configured default
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Drop repeated ids, keeping the first occurrence
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Reverse the final order
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Override the configured deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Candidate filters
    pub fn get_filters(&self) -> &[Filter] {
        &self.get
    }

    /// Exclusion filters
    pub fn keep_filters(&self) -> &[Filter] {
        &self.keep
    }
}

/// Which accumulator a filter feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Get,
    Keep,
}

/// A filter bound to the index that serves it
#[derive(Debug)]
struct FilterPlan {
    role: Role,
    index: Arc<SecondaryIndex>,
    op: FilterOp,
    encoded: Vec<Vec<u8>>,
    equal: bool,
}

impl FilterPlan {
    /// Bind `filter` to the first index with the same selector whose type
    /// accepts every filter value.
    fn bind(role: Role, filter: &Filter, indexes: &[Arc<SecondaryIndex>]) -> Option<Self> {
        for index in indexes.iter().filter(|i| i.selector() == filter.selector()) {
            let encoded: Result<Vec<Vec<u8>>> = filter
                .values()
                .iter()
                .map(|v| index.encode_value(v))
                .collect();
            match encoded {
                Ok(encoded) => {
                    return Some(Self {
                        role,
                        index: Arc::clone(index),
                        op: filter.op(),
                        encoded,
                        equal: filter.is_equal_inclusive(),
                    })
                }
                Err(e) => {
                    debug!(index = index.name(), selector = %filter.selector(), error = %e, "Filter value rejected by index");
                }
            }
        }
        debug!(selector = %filter.selector(), "No index serves filter, skipping");
        None
    }

    fn run(&self) -> Vec<String> {
        let index = &self.index;
        match (self.op, self.encoded.as_slice()) {
            (FilterOp::Equal, [value, ..]) => index.get(value).unwrap_or_default(),
            (FilterOp::Greater, [from, ..]) => {
                index.range_scan(from, Direction::Ascending, None, self.equal)
            }
            (FilterOp::Less, [from, ..]) => {
                index.range_scan(from, Direction::Descending, None, self.equal)
            }
            (FilterOp::Between, [a, b, ..]) => {
                let (low, high) = if a <= b { (a, b) } else { (b, a) };
                index.range_scan(low, Direction::Ascending, Some(high), self.equal)
            }
            (FilterOp::Exists, _) => index.all(Direction::Ascending),
            _ => Vec::new(),
        }
    }
}

/// Ids produced by each filter, in filter order
#[derive(Debug, Default)]
pub(crate) struct Gathered {
    pub(crate) get: Vec<String>,
    pub(crate) keep: Vec<String>,
    pub(crate) timed_out: bool,
    /// Keep filters that produced nothing before the deadline
    pub(crate) missing_keep: usize,
}

/// Run every task concurrently and collect what finishes before `deadline`.
///
/// Tasks still running at the deadline are aborted. Results are kept in
/// submission order regardless of completion order.
pub(crate) async fn gather<F>(tasks: Vec<(Role, F)>, deadline: Instant) -> Gathered
where
    F: Future<Output = Vec<String>> + Send + 'static,
{
    let roles: Vec<Role> = tasks.iter().map(|(role, _)| *role).collect();
    let mut slots: Vec<Option<(Role, Vec<String>)>> = Vec::new();
    slots.resize_with(tasks.len(), || None);

    let mut set = JoinSet::new();
    for (position, (role, task)) in tasks.into_iter().enumerate() {
        set.spawn(async move { (position, role, task.await) });
    }

    let mut timed_out = false;
    loop {
        match timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((position, role, ids)))) => slots[position] = Some((role, ids)),
            Ok(Some(Err(e))) => warn!(error = %e, "Query task failed"),
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                set.abort_all();
                break;
            }
        }
    }

    let missing_keep = slots
        .iter()
        .zip(&roles)
        .filter(|(slot, role)| slot.is_none() && **role == Role::Keep)
        .count();
    let mut gathered = Gathered {
        timed_out,
        missing_keep,
        ..Default::default()
    };
    for (role, ids) in slots.into_iter().flatten() {
        match role {
            Role::Get => gathered.get.extend(ids),
            Role::Keep => gathered.keep.extend(ids),
        }
    }
    gathered
}

/// Subtract, dedupe, limit and reverse gathered ids
pub(crate) fn finish(gathered: Gathered, limit: usize, distinct: bool, reverse: bool) -> Vec<String> {
    let excluded: HashSet<&str> = gathered.keep.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut ids = Vec::new();
    for id in &gathered.get {
        if ids.len() >= limit {
            break;
        }
        if excluded.contains(id.as_str()) || (distinct && !seen.insert(id.as_str())) {
            continue;
        }
        ids.push(id.clone());
    }
    if reverse {
        ids.reverse();
    }
    ids
}

/// Evaluate `query` against `indexes`.
///
/// Filters without a serving index are skipped. On deadline the ids
/// gathered so far are returned; `Timeout` only when none were.
///
/// A keep filter that did not finish in time subtracts nothing, so a
/// partial result may hold ids that filter would have removed.
pub(crate) async fn execute(
    indexes: &[Arc<SecondaryIndex>],
    query: &Query,
    default_limit: usize,
    default_timeout: Duration,
) -> Result<Vec<String>> {
    let plans: Vec<FilterPlan> = query
        .get
        .iter()
        .map(|f| (Role::Get, f))
        .chain(query.keep.iter().map(|f| (Role::Keep, f)))
        .filter_map(|(role, f)| FilterPlan::bind(role, f, indexes))
        .collect();

    if !plans.iter().any(|p| p.role == Role::Get) {
        return Ok(Vec::new());
    }

    let filters = plans.len();
    let tasks: Vec<_> = plans
        .into_iter()
        .map(|plan| (plan.role, async move { plan.run() }))
        .collect();

    let deadline = Instant::now() + query.timeout.unwrap_or(default_timeout);
    let gathered = gather(tasks, deadline).await;

    if gathered.timed_out {
        if gathered.get.is_empty() {
            return Err(Error::Timeout);
        }
        warn!(
            filters,
            gathered = gathered.get.len(),
            missing_keep = gathered.missing_keep,
            "Query deadline reached, returning partial result"
        );
    }

    let limit = if query.limit == 0 { default_limit } else { query.limit };
    let ids = finish(gathered, limit, query.distinct, query.reverse);
    debug!(filters, results = ids.len(), "Query executed");
    Ok(ids)
}
