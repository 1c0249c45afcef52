//! 批量查询条件（Criteria）与分页结果（ResultSet）
//!
//! 过滤条件之间为“与”关系；排序键以 `-` 前缀表示降序；
//! 未指定排序时按聚合标识升序。进程内驱动统一通过 [`Criteria::apply`]
//! 求值，保证各驱动语义一致。
//!
use crate::{
    error::{DomainError, DomainResult},
    persist::SerializedAggregate,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// 字段比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::EndsWith => "endswith",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::In => "in",
        }
    }

    fn matches(&self, actual: Option<&Value>, expected: &Value) -> bool {
        let Some(actual) = actual else {
            // 缺失字段只与 null 精确相等
            return matches!(self, Lookup::Exact) && expected.is_null();
        };

        match self {
            Lookup::Exact => actual == expected,
            Lookup::IExact => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.to_lowercase() == e.to_lowercase(),
                _ => actual == expected,
            },
            Lookup::Contains => match (actual, expected) {
                (Value::String(a), Value::String(e)) => a.contains(e.as_str()),
                (Value::Array(items), e) => items.contains(e),
                _ => false,
            },
            Lookup::IContains => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.to_lowercase().contains(&e.to_lowercase()),
                _ => false,
            },
            Lookup::StartsWith => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.starts_with(e),
                _ => false,
            },
            Lookup::EndsWith => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.ends_with(e),
                _ => false,
            },
            Lookup::Gt => compare_same_kind(actual, expected) == Some(Ordering::Greater),
            Lookup::Gte => matches!(
                compare_same_kind(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Lookup::Lt => compare_same_kind(actual, expected) == Some(Ordering::Less),
            Lookup::Lte => matches!(
                compare_same_kind(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Lookup::In => expected
                .as_array()
                .is_some_and(|candidates| candidates.contains(actual)),
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lookup {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "endswith" => Lookup::EndsWith,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            other => {
                return Err(DomainError::InvalidValue {
                    reason: format!("unknown lookup `{other}`"),
                });
            }
        })
    }
}

/// 数字与数字、字符串与字符串可比较，其余组合不可比较
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// 排序用的全序：先按值的种类，再按值本身；缺失字段视为 null
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    compare_same_kind(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub lookup: Lookup,
    pub value: Value,
}

impl Filter {
    fn matches(&self, record: &SerializedAggregate) -> bool {
        self.lookup.matches(record.field(&self.field), &self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    filters: Vec<Filter>,
    order_by: Vec<String>,
    offset: usize,
    limit: Option<usize>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, lookup: Lookup, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            lookup,
            value,
        });
        self
    }

    /// 按 `field__lookup` 形式的键添加过滤条件，省略后缀时为 `exact`
    ///
    /// ```
    /// use ddd_core::persist::{Criteria, Lookup};
    /// use serde_json::json;
    ///
    /// let criteria = Criteria::new().filter_by("age__gte", json!(18)).unwrap();
    /// assert_eq!(criteria.filters()[0].lookup, Lookup::Gte);
    /// ```
    pub fn filter_by(self, key: &str, value: Value) -> DomainResult<Self> {
        let (field, lookup) = match key.rsplit_once("__") {
            Some((field, suffix)) => (field, suffix.parse::<Lookup>()?),
            None => (key, Lookup::Exact),
        };
        Ok(self.filter(field, lookup, value))
    }

    /// 排序键，`-` 前缀为降序；可多次调用形成多级排序
    pub fn order_by(mut self, key: impl Into<String>) -> Self {
        self.order_by.push(key.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[String] {
        &self.order_by
    }

    pub fn get_offset(&self) -> usize {
        self.offset
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    /// 记录是否满足全部过滤条件
    pub fn matches(&self, record: &SerializedAggregate) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// 在进程内完成过滤、排序与分页
    pub fn apply<I>(&self, records: I) -> ResultSet
    where
        I: IntoIterator<Item = SerializedAggregate>,
    {
        let mut matched: Vec<SerializedAggregate> =
            records.into_iter().filter(|r| self.matches(r)).collect();

        matched.sort_by(|a, b| {
            self.order_by
                .iter()
                .map(|key| {
                    let (field, descending) = match key.strip_prefix('-') {
                        Some(field) => (field, true),
                        None => (key.as_str(), false),
                    };
                    let ord = compare_for_sort(a.field(field), b.field(field));
                    if descending { ord.reverse() } else { ord }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.aggregate_id().cmp(b.aggregate_id()))
        });

        let total = matched.len();
        let items: Vec<_> = matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        ResultSet {
            offset: self.offset,
            limit: self.limit,
            total,
            items,
        }
    }
}

/// 一页查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet<T = SerializedAggregate> {
    pub offset: usize,
    pub limit: Option<usize>,
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> ResultSet<T> {
    pub fn empty(offset: usize, limit: Option<usize>) -> Self {
        Self {
            offset,
            limit,
            total: 0,
            items: Vec::new(),
        }
    }

    pub fn has_next(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.offset > 0
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ResultSet<U> {
        ResultSet {
            offset: self.offset,
            limit: self.limit,
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
