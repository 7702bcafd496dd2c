//! In-process evaluation of the predicate model
//!
//! Mirrors the SQL semantics closely enough for the memory backend and for
//! client-side filtering of change notifications: comparisons across
//! different JSON types never match, NULL only matches IS NULL.

use serde_json::Value;
use signal_system::Record;
use std::cmp::Ordering;

use crate::query_builder::builder::QueryBuilder;
use crate::query_builder::filter::{LogicalOperator, QueryCondition, QueryFilter, QueryOperator};

/// Order two JSON scalars of the same kind; `None` when they are not comparable
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// SQL LIKE matching: `%` any run, `_` one character, `\` escapes
pub(crate) fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let text = fold(text);

    enum Token {
        Literal(char),
        One,
        Many,
    }
    let mut tokens = Vec::new();
    let mut chars = fold(pattern).into_iter();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            '%' => Token::Many,
            '_' => Token::One,
            c => Token::Literal(c),
        });
    }

    // matched[j]: pattern prefix of length i matches text prefix of length j
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Many => {
                let mut any = false;
                for j in 0..=text.len() {
                    any |= matched[j];
                    next[j] = any;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            Token::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

fn condition_matches(condition: &QueryCondition, record: &Record) -> bool {
    let actual = record.get(&condition.field).unwrap_or(&Value::Null);
    let expected = condition.value.as_ref();

    match condition.operator {
        QueryOperator::IsNull => actual.is_null(),
        QueryOperator::IsNotNull => !actual.is_null(),
        QueryOperator::Eq => match expected {
            None | Some(Value::Null) => actual.is_null(),
            Some(expected) => !actual.is_null() && values_equal(actual, expected),
        },
        QueryOperator::Ne => match expected {
            None | Some(Value::Null) => !actual.is_null(),
            Some(expected) => !actual.is_null() && !values_equal(actual, expected),
        },
        QueryOperator::Gt | QueryOperator::Gte | QueryOperator::Lt | QueryOperator::Lte => {
            let Some(ordering) = expected.and_then(|expected| compare_values(actual, expected))
            else {
                return false;
            };
            match condition.operator {
                QueryOperator::Gt => ordering == Ordering::Greater,
                QueryOperator::Gte => ordering != Ordering::Less,
                QueryOperator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        QueryOperator::Like | QueryOperator::ILike => match (actual, expected) {
            (Value::String(text), Some(Value::String(pattern))) => {
                like_matches(text, pattern, condition.operator == QueryOperator::ILike)
            }
            _ => false,
        },
        QueryOperator::In => match expected {
            Some(Value::Array(options)) => {
                !actual.is_null() && options.iter().any(|option| values_equal(actual, option))
            }
            _ => false,
        },
        QueryOperator::NotIn => match expected {
            Some(Value::Array(options)) => {
                options.is_empty()
                    || (!actual.is_null()
                        && !options.iter().any(|option| values_equal(actual, option)))
            }
            _ => true,
        },
    }
}

impl QueryFilter {
    /// Whether `record` satisfies this filter
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            QueryFilter::Condition(condition) => condition_matches(condition, record),
            QueryFilter::Group {
                operator: LogicalOperator::And,
                filters,
            } => filters.iter().all(|f| f.matches(record)),
            QueryFilter::Group {
                operator: LogicalOperator::Or,
                filters,
            } => filters.iter().any(|f| f.matches(record)),
        }
    }
}

impl QueryBuilder {
    /// Whether `record` satisfies every condition (ordering and limit are ignored)
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|filter| filter.matches(record))
    }
}
