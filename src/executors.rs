//! Iterate executor plugins.
//!
//! The `iterate` verb delegates its iteration strategy to a named
//! executor selected by the `by` rule (`"RANGE: FROM 0"` selects `RANGE`
//! with the clause `FROM 0`). An executor instance is bound to the `on`
//! value at creation and then driven through `it_begin` / `it_next` /
//! `it_value`; destruction is `Drop`.
//!
//! Built-ins: `RANGE` (index ranges over linear containers), `MUL`
//! (numeric multiples), and `SQL`, whose rule parser is an unfinished
//! path and surfaces `executor-not-implemented` rather than guessing a
//! grammar.

use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::error::{ExecResult, RuntimeError};
use crate::variant::Variant;

// =============================================================================
// Executor interface
// =============================================================================

/// One live iteration over an `on` value.
pub trait Executor {
    /// Parse `rule` and position at the first item. `false` means the
    /// iteration is empty.
    fn it_begin(&mut self, rule: &str) -> ExecResult<bool>;

    /// Advance to the next item; the rule may be re-evaluated per step.
    /// `false` means exhausted.
    fn it_next(&mut self, rule: Option<&str>) -> ExecResult<bool>;

    /// Value at the current position.
    fn it_value(&self) -> ExecResult<Variant>;
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Executor")
    }
}

/// Factory signature stored in the registry.
pub type ExecutorCreate = fn(on: Variant) -> ExecResult<Box<dyn Executor>>;

// =============================================================================
// Registry
// =============================================================================

/// Named executor factories. `RANGE`, `MUL`, and `SQL` are pre-registered.
pub struct ExecutorRegistry {
    map: FxHashMap<CompactString, ExecutorCreate>,
}

impl ExecutorRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self { map: FxHashMap::default() };
        registry.map.insert(CompactString::new("RANGE"), range_create as ExecutorCreate);
        registry.map.insert(CompactString::new("MUL"), mul_create as ExecutorCreate);
        registry.map.insert(CompactString::new("SQL"), sql_create as ExecutorCreate);
        registry
    }

    /// Register a custom executor; re-registering a name is `duplicated`.
    pub fn register(&mut self, name: &str, create: ExecutorCreate) -> ExecResult<()> {
        if self.map.contains_key(name) {
            return Err(RuntimeError::Duplicated(format!("executor '{name}'")));
        }
        self.map.insert(CompactString::new(name), create);
        Ok(())
    }

    /// Split a rule into `(executor name, clause)`.
    pub fn parse_rule(rule: &str) -> (&str, &str) {
        match rule.split_once(':') {
            Some((name, clause)) => (name.trim(), clause.trim()),
            None => (rule.trim(), ""),
        }
    }

    /// Create an instance for `rule` bound to `on`.
    pub fn instantiate(&self, rule: &str, on: Variant) -> ExecResult<Box<dyn Executor>> {
        let (name, _) = Self::parse_rule(rule);
        let create = self
            .map
            .get(name)
            .ok_or_else(|| RuntimeError::not_exists(format!("executor '{name}'")))?;
        create(on)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// =============================================================================
// Rule clause parsing
// =============================================================================

/// Parsed `FROM … TO … ADVANCE …` clause, shared by RANGE and MUL.
#[derive(Debug, Clone, Copy)]
struct RangeClause {
    from: i64,
    to: Option<i64>,
    advance: i64,
}

fn parse_range_clause(clause: &str) -> ExecResult<RangeClause> {
    let mut parsed = RangeClause { from: 0, to: None, advance: 1 };
    let mut tokens = clause.split_whitespace();
    while let Some(keyword) = tokens.next() {
        let value = tokens
            .next()
            .ok_or_else(|| RuntimeError::ExecutorBadArg(format!("{keyword} needs a value")))?;
        let number: i64 = value
            .parse()
            .map_err(|_| RuntimeError::ExecutorBadArg(format!("{keyword} {value}: not a number")))?;
        match keyword.to_ascii_uppercase().as_str() {
            "FROM" => parsed.from = number,
            "TO" => parsed.to = Some(number),
            "ADVANCE" | "BY" => parsed.advance = number,
            other => {
                return Err(RuntimeError::ExecutorBadArg(format!("unknown keyword '{other}'")));
            }
        }
    }
    if parsed.advance == 0 {
        return Err(RuntimeError::ExecutorBadArg("ADVANCE 0 never terminates".into()));
    }
    Ok(parsed)
}

// =============================================================================
// RANGE
// =============================================================================

struct RangeExecutor {
    items: Vec<Variant>,
    idx: i64,
    clause: RangeClause,
}

fn range_create(on: Variant) -> ExecResult<Box<dyn Executor>> {
    Ok(Box::new(RangeExecutor {
        items: on.members_or_self(),
        idx: 0,
        clause: RangeClause { from: 0, to: None, advance: 1 },
    }))
}

impl RangeExecutor {
    fn in_range(&self, idx: i64) -> bool {
        if idx < 0 || idx >= self.items.len() as i64 {
            return false;
        }
        match self.clause.to {
            Some(to) if self.clause.advance > 0 => idx <= to,
            Some(to) => idx >= to,
            None => true,
        }
    }
}

impl Executor for RangeExecutor {
    fn it_begin(&mut self, rule: &str) -> ExecResult<bool> {
        let (_, clause) = ExecutorRegistry::parse_rule(rule);
        self.clause = parse_range_clause(clause)?;
        self.idx = self.clause.from;
        Ok(self.in_range(self.idx))
    }

    fn it_next(&mut self, rule: Option<&str>) -> ExecResult<bool> {
        if let Some(rule) = rule {
            let (_, clause) = ExecutorRegistry::parse_rule(rule);
            self.clause = parse_range_clause(clause)?;
        }
        self.idx += self.clause.advance;
        Ok(self.in_range(self.idx))
    }

    fn it_value(&self) -> ExecResult<Variant> {
        self.items
            .get(self.idx as usize)
            .cloned()
            .ok_or_else(|| RuntimeError::not_exists(format!("range position {}", self.idx)))
    }
}

// =============================================================================
// MUL
// =============================================================================

struct MulExecutor {
    base: f64,
    factor: i64,
    clause: RangeClause,
}

fn mul_create(on: Variant) -> ExecResult<Box<dyn Executor>> {
    if !matches!(
        on,
        Variant::Number(_) | Variant::LongInt(_) | Variant::ULongInt(_) | Variant::LongDouble(_)
    ) {
        return Err(RuntimeError::ExecutorBadArg(format!(
            "MUL input must be numeric, got {}",
            on.kind_name()
        )));
    }
    Ok(Box::new(MulExecutor {
        base: on.numberify(),
        factor: 0,
        clause: RangeClause { from: 1, to: None, advance: 1 },
    }))
}

impl MulExecutor {
    fn in_range(&self, factor: i64) -> bool {
        match self.clause.to {
            Some(to) if self.clause.advance > 0 => factor <= to,
            Some(to) => factor >= to,
            // MUL has no natural end; an unbounded clause is a caller bug.
            None => false,
        }
    }
}

impl Executor for MulExecutor {
    fn it_begin(&mut self, rule: &str) -> ExecResult<bool> {
        let (_, clause) = ExecutorRegistry::parse_rule(rule);
        let mut parsed = parse_range_clause(clause)?;
        if parsed.to.is_none() {
            return Err(RuntimeError::ExecutorBadArg("MUL requires a TO bound".into()));
        }
        if parsed.from == 0 {
            parsed.from = 1;
        }
        self.clause = parsed;
        self.factor = self.clause.from;
        Ok(self.in_range(self.factor))
    }

    fn it_next(&mut self, _rule: Option<&str>) -> ExecResult<bool> {
        self.factor += self.clause.advance;
        Ok(self.in_range(self.factor))
    }

    fn it_value(&self) -> ExecResult<Variant> {
        Ok(Variant::Number(self.base * self.factor as f64))
    }
}

// =============================================================================
// SQL
// =============================================================================

struct SqlExecutor;

fn sql_create(on: Variant) -> ExecResult<Box<dyn Executor>> {
    if on.as_object().is_none() {
        return Err(RuntimeError::ExecutorBadArg("SQL input must be an object".into()));
    }
    Ok(Box::new(SqlExecutor))
}

impl Executor for SqlExecutor {
    fn it_begin(&mut self, _rule: &str) -> ExecResult<bool> {
        // Rule parsing (selected-keys extraction) is an unfinished path.
        Err(RuntimeError::ExecutorNotImplemented("SQL rule parsing".into()))
    }

    fn it_next(&mut self, _rule: Option<&str>) -> ExecResult<bool> {
        Err(RuntimeError::ExecutorNotImplemented("SQL rule parsing".into()))
    }

    fn it_value(&self) -> ExecResult<Variant> {
        Err(RuntimeError::ExecutorNotImplemented("SQL rule parsing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(rule: &str, on: Variant) -> Vec<Variant> {
        let registry = ExecutorRegistry::with_builtins();
        let mut exec = registry.instantiate(rule, on).unwrap();
        let mut out = Vec::new();
        let mut more = exec.it_begin(rule).unwrap();
        while more {
            out.push(exec.it_value().unwrap());
            more = exec.it_next(None).unwrap();
        }
        out
    }

    #[test]
    fn test_range_from_zero() {
        let on = Variant::array_from(vec![
            Variant::LongInt(10),
            Variant::LongInt(20),
            Variant::LongInt(30),
        ]);
        let values = drive("RANGE: FROM 0", on);
        assert_eq!(
            values,
            vec![Variant::LongInt(10), Variant::LongInt(20), Variant::LongInt(30)]
        );
    }

    #[test]
    fn test_range_bounds_and_advance() {
        let on = Variant::array_from((0..10).map(Variant::LongInt).collect());
        let values = drive("RANGE: FROM 1 TO 7 ADVANCE 3", on);
        assert_eq!(values, vec![Variant::LongInt(1), Variant::LongInt(4), Variant::LongInt(7)]);
    }

    #[test]
    fn test_mul_multiples() {
        let values = drive("MUL: FROM 1 TO 3", Variant::LongInt(7));
        assert_eq!(
            values,
            vec![Variant::Number(7.0), Variant::Number(14.0), Variant::Number(21.0)]
        );
    }

    #[test]
    fn test_mul_rejects_non_numeric() {
        let registry = ExecutorRegistry::with_builtins();
        let err = registry.instantiate("MUL: TO 3", Variant::string("x")).unwrap_err();
        assert_eq!(err.kind(), "executor-bad-arg");
    }

    #[test]
    fn test_sql_surfaces_not_implemented() {
        let registry = ExecutorRegistry::with_builtins();
        let mut exec = registry
            .instantiate("SQL: SELECT *", Variant::object())
            .unwrap();
        let err = exec.it_begin("SQL: SELECT *").unwrap_err();
        assert_eq!(err.kind(), "executor-not-implemented");
    }

    #[test]
    fn test_unknown_executor() {
        let registry = ExecutorRegistry::with_builtins();
        let err = registry.instantiate("NOPE: x", Variant::Null).unwrap_err();
        assert_eq!(err.kind(), "not-exists");
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ExecutorRegistry::with_builtins();
        let err = registry.register("MUL", range_create).unwrap_err();
        assert_eq!(err.kind(), "duplicated");
    }

    #[test]
    fn test_bad_clause() {
        let on = Variant::array_from(vec![Variant::Null]);
        let registry = ExecutorRegistry::with_builtins();
        let mut exec = registry.instantiate("RANGE: FROM", on).unwrap();
        assert_eq!(exec.it_begin("RANGE: FROM").unwrap_err().kind(), "executor-bad-arg");
    }
}
