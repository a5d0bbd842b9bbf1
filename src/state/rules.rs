//! Write authorization.
//!
//! ## The rule tree
//!
//! Rules are not external configuration: they live inside the replicated state, under the
//! [`RULES_ROOT`] subtree, and change only when a committed transaction changes them. The rule tree
//! shadows the namespace of the state database. For example, the rule governing `a/b` is stored at
//! `rules/a/b`.
//!
//! Each node of the rule tree may hold a [`WRITE_RULE_KEY`] entry:
//! - `Boolean(true)`: writes to this path and its descendants are allowed,
//! - `Boolean(false)`: writes are denied,
//! - absent (or any other value): the node delegates to its ancestors.
//!
//! ## Longest-prefix match
//!
//! [`RuleTree::check_authorization`] walks from the root of the rule tree towards the written path and
//! applies the most specific explicit rule it passes. If no explicit rule applies, the
//! [`RulePolicy`] default is used: deny under a restricted prefix, allow everywhere else.
//!
//! ## Subtree writes
//!
//! A Set replaces the whole subtree at its path, so it also overwrites every path below it. A Set is
//! therefore checked with [`RuleTree::check_subtree_authorization`]: besides the written path itself,
//! every path below it that carries an explicit rule, or is a restricted prefix, must allow writes. An
//! Increase only ever writes numbers at its own paths, and is checked with
//! [`RuleTree::check_authorization`] alone.
//!
//! Authorization is checked when a transaction is admitted into the mempool, never when it is
//! replayed. Once committed, a transaction is part of history even if the rules later change.

use crate::types::{path::Path, value::Value};

use super::database::StateDatabase;

/// The top-level key under which the rule tree is stored in the state database.
pub const RULES_ROOT: &str = "rules";

/// The key, inside a rule tree node, that holds that node's write rule.
pub const WRITE_RULE_KEY: &str = ".write";

/// The explicit rule declared at a single node of the rule tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    Allow,
    Deny,
    Delegate,
}

/// Result of an authorization check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny,
}

/// The default applied when no explicit rule covers a path.
#[derive(Clone, Debug, PartialEq)]
pub struct RulePolicy {
    restricted_prefixes: Vec<Path>,
}

impl Default for RulePolicy {
    /// Deny by default under `restricted` and under the rule tree itself.
    fn default() -> Self {
        RulePolicy::new(
            ["restricted", RULES_ROOT]
                .into_iter()
                .filter_map(|prefix| Path::parse(prefix).ok())
                .collect(),
        )
    }
}

impl RulePolicy {
    pub fn new(restricted_prefixes: Vec<Path>) -> RulePolicy {
        RulePolicy {
            restricted_prefixes,
        }
    }

    pub fn restricted_prefixes(&self) -> &[Path] {
        &self.restricted_prefixes
    }

    fn default_for(&self, path: &Path) -> Authorization {
        if self
            .restricted_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
        {
            Authorization::Deny
        } else {
            Authorization::Allow
        }
    }
}

/// A read-only view of the rule tree stored in a [`StateDatabase`].
pub struct RuleTree<'a> {
    root: Option<&'a Value>,
    policy: &'a RulePolicy,
}

impl<'a> RuleTree<'a> {
    pub fn new(database: &'a StateDatabase, policy: &'a RulePolicy) -> RuleTree<'a> {
        let root = Path::parse(RULES_ROOT)
            .ok()
            .and_then(|rules_root| database.get(&rules_root));
        RuleTree { root, policy }
    }

    /// Get the explicit rule declared at `node`.
    pub fn rule_at(node: &Value) -> Rule {
        match node.get(WRITE_RULE_KEY) {
            Some(Value::Boolean(true)) => Rule::Allow,
            Some(Value::Boolean(false)) => Rule::Deny,
            _ => Rule::Delegate,
        }
    }

    /// Decide whether a write to `path` is allowed, using the most specific explicit rule on the way from
    /// the root to `path`, or the policy default if there is none.
    pub fn check_authorization(&self, path: &Path) -> Authorization {
        let mut decision = None;
        let mut cursor = self.root;
        if let Some(node) = cursor {
            decision = Self::apply(decision, Self::rule_at(node));
        }
        for segment in path.segments() {
            cursor = cursor.and_then(|node| node.get(segment));
            match cursor {
                Some(node) => decision = Self::apply(decision, Self::rule_at(node)),
                None => break,
            }
        }

        decision.unwrap_or_else(|| self.policy.default_for(path))
    }

    /// Decide whether replacing the whole subtree at `path` is allowed.
    ///
    /// Denied if a write to `path` is denied, or if a write to any path below it that has an explicit rule
    /// or is a restricted prefix is denied.
    pub fn check_subtree_authorization(&self, path: &Path) -> Authorization {
        if self.check_authorization(path) == Authorization::Deny {
            return Authorization::Deny;
        }

        let mut guarded: Vec<Path> = self
            .policy
            .restricted_prefixes
            .iter()
            .filter(|prefix| prefix.len() > path.len() && prefix.starts_with(path))
            .cloned()
            .collect();
        if let Some(node) = self.node_at(path) {
            Self::ruled_descendants(node, path.segments().to_vec(), &mut guarded);
        }

        if guarded
            .iter()
            .any(|descendant| self.check_authorization(descendant) == Authorization::Deny)
        {
            Authorization::Deny
        } else {
            Authorization::Allow
        }
    }

    fn node_at(&self, path: &Path) -> Option<&'a Value> {
        path.segments()
            .iter()
            .try_fold(self.root?, |node, segment| node.get(segment))
    }

    /// Collect the paths of every node strictly below `node` that declares an explicit rule.
    fn ruled_descendants(node: &Value, segments: Vec<String>, out: &mut Vec<Path>) {
        let Some(children) = node.as_mapping() else {
            return;
        };
        for (key, child) in children {
            if key == WRITE_RULE_KEY {
                continue;
            }
            let mut child_segments = segments.clone();
            child_segments.push(key.clone());
            if Self::rule_at(child) != Rule::Delegate {
                if let Ok(path) = Path::from_segments(child_segments.clone()) {
                    out.push(path);
                }
            }
            Self::ruled_descendants(child, child_segments, out);
        }
    }

    fn apply(decision: Option<Authorization>, rule: Rule) -> Option<Authorization> {
        match rule {
            Rule::Allow => Some(Authorization::Allow),
            Rule::Deny => Some(Authorization::Deny),
            Rule::Delegate => decision,
        }
    }
}

#[test]
fn longest_prefix_rule_wins_test() {
    let mut db = StateDatabase::new();
    db.set(
        &Path::parse("rules/restricted").unwrap(),
        [
            (WRITE_RULE_KEY, Value::Boolean(false)),
            (
                "open",
                [(WRITE_RULE_KEY, Value::Boolean(true))].into_iter().collect(),
            ),
        ]
        .into_iter()
        .collect(),
    );
    let policy = RulePolicy::new(Vec::new());
    let rules = RuleTree::new(&db, &policy);

    let check = |reference: &str| rules.check_authorization(&Path::parse(reference).unwrap());
    assert_eq!(check("restricted/path"), Authorization::Deny);
    assert_eq!(check("restricted/open/deeper"), Authorization::Allow);
    assert_eq!(check("test/anything"), Authorization::Allow);
}

#[test]
fn subtree_write_respects_rules_below_it_test() {
    let mut db = StateDatabase::new();
    db.set(
        &Path::parse("rules/a/b").unwrap(),
        [(WRITE_RULE_KEY, Value::Boolean(false))].into_iter().collect(),
    );
    let policy = RulePolicy::new(vec![Path::parse("x/locked").unwrap()]);
    let rules = RuleTree::new(&db, &policy);
    let path = |reference: &str| Path::parse(reference).unwrap();

    // Writing `a` itself is allowed, but replacing its subtree would overwrite `a/b`.
    assert_eq!(rules.check_authorization(&path("a")), Authorization::Allow);
    assert_eq!(rules.check_subtree_authorization(&path("a")), Authorization::Deny);
    assert_eq!(rules.check_subtree_authorization(&path("a/c")), Authorization::Allow);

    // Restricted prefixes below the written path count too.
    assert_eq!(rules.check_subtree_authorization(&path("x")), Authorization::Deny);
    assert_eq!(rules.check_subtree_authorization(&path("y")), Authorization::Allow);
}
