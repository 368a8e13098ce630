//! Cache key generation

use crate::domain::limit::LimitId;
use crate::domain::usage::SubjectId;

/// Keys under which limits and usage states are cached.
///
/// Free-form parts (names, plans, subjects) are escaped so that `:`, `=` and
/// `*` only ever appear as separators, and an unscoped limit carries no plan
/// component at all.
#[derive(Debug, Clone)]
pub struct LimitCacheKeys {
    prefix: String,
}

impl Default for LimitCacheKeys {
    fn default() -> Self {
        Self::new("limiter")
    }
}

impl LimitCacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn by_name(&self, name: &str, plan: Option<&str>) -> String {
        match plan {
            Some(plan) => format!(
                "{}:limit:name:{}:plan={}",
                self.prefix,
                escape(name),
                escape(plan)
            ),
            None => format!("{}:limit:name:{}", self.prefix, escape(name)),
        }
    }

    pub fn by_id(&self, id: &LimitId) -> String {
        format!("{}:limit:id:{}", self.prefix, id)
    }

    pub fn usage(&self, subject_id: &SubjectId, limit_id: &LimitId) -> String {
        format!(
            "{}:usage:{}:limit={}",
            self.prefix,
            escape(subject_id.as_str()),
            limit_id
        )
    }

    /// Pattern covering every subject's usage state for a limit
    pub fn usage_pattern(&self, limit_id: &LimitId) -> String {
        format!("{}:usage:*:limit={}", self.prefix, limit_id)
    }
}

fn escape(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());

    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '=' => escaped.push_str("%3D"),
            '*' => escaped.push_str("%2A"),
            _ => escaped.push(c),
        }
    }
    escaped
}
