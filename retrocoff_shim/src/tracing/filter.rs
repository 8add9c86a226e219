// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace filtering

use super::event::{ApiCategory, TraceEvent};

/// Filter rule for trace events
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Include all events
    All,
    /// Wrapper names, exact match
    Function(Vec<String>),
    /// Wrapper names matching a `*`/`?` wildcard pattern
    Pattern(String),
    Category(Vec<ApiCategory>),
}

impl FilterRule {
    fn matches(&self, event: &TraceEvent) -> bool {
        match self {
            FilterRule::All => true,
            FilterRule::Function(names) => names.iter().any(|n| *n == event.function),
            FilterRule::Pattern(pattern) => matches_pattern(&event.function, pattern),
            FilterRule::Category(categories) => categories.contains(&event.category),
        }
    }
}

/// Set of rules; an event is traced when any rule matches
#[derive(Debug, Clone)]
pub struct TraceFilter {
    rules: Vec<FilterRule>,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            rules: vec![FilterRule::All],
        }
    }
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. The implicit `All` rule is dropped by the first
    /// explicit one.
    #[must_use]
    pub fn add_rule(mut self, rule: FilterRule) -> Self {
        if matches!(self.rules.as_slice(), [FilterRule::All]) {
            self.rules.clear();
        }
        self.rules.push(rule);
        self
    }

    pub fn should_trace(&self, event: &TraceEvent) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(event))
    }
}

/// Wildcard match where `*` spans any run of characters and `?` exactly one.
fn matches_pattern(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last `*` seen and the text index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, start)) = backtrack {
            p = star + 1;
            t = start + 1;
            backtrack = Some((star, start + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("find_first", "find_*"));
        assert!(matches_pattern("find_close", "*close"));
        assert!(matches_pattern("get_file_time", "get*time"));
        assert!(matches_pattern("dup2", "dup?"));
        assert!(!matches_pattern("dup", "dup?"));
        assert!(!matches_pattern("read", "write*"));
        assert!(matches_pattern("", "*"));
        assert!(matches_pattern("abcabd", "*abd"));
    }

    #[test]
    fn test_filter_all() {
        let filter = TraceFilter::default();
        assert!(filter.should_trace(&TraceEvent::call("open_file", ApiCategory::FileIo)));
    }

    #[test]
    fn test_filter_function() {
        let filter = TraceFilter::new().add_rule(FilterRule::Function(vec!["spawn".into()]));
        assert!(filter.should_trace(&TraceEvent::call("spawn", ApiCategory::Process)));
        assert!(!filter.should_trace(&TraceEvent::call("exit", ApiCategory::Process)));
    }

    #[test]
    fn test_filter_category() {
        let filter = TraceFilter::new()
            .add_rule(FilterRule::Category(vec![ApiCategory::Directory]))
            .add_rule(FilterRule::Pattern("*heap".into()));

        assert!(filter.should_trace(&TraceEvent::call("chdir", ApiCategory::Directory)));
        assert!(filter.should_trace(&TraceEvent::call("grow_heap", ApiCategory::Memory)));
        assert!(!filter.should_trace(&TraceEvent::call("read", ApiCategory::FileIo)));
    }
}
