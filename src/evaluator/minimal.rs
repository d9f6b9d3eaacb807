//! The `minimal` datamodel: a small JSON-valued expression language.
//!
//! Values are `serde_json::Value`s. Arithmetic keeps integers when both
//! operands are integers and the result fits, otherwise falls back to `f64`.
//! `+` concatenates when either side is a string. `&&` / `||` short-circuit
//! and yield the deciding operand.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::trace;

use super::parser::{self, BinaryOp, Expr, Location, Statement, UnaryOp};
use super::{EvalError, EvalResult, Evaluator};
use crate::context::Context;

pub const DATAMODEL_NAME: &str = "minimal";

/// Parsed expressions are cached by source text.
#[derive(Debug, Default)]
pub struct MinimalEvaluator {
    expressions: DashMap<String, Arc<Expr>>,
    scripts: DashMap<String, Arc<Vec<Statement>>>,
}

impl MinimalEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed(&self, source: &str) -> EvalResult<Arc<Expr>> {
        if let Some(expr) = self.expressions.get(source) {
            return Ok(expr.clone());
        }
        let expr = Arc::new(parser::parse_expression(source)?);
        self.expressions.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    fn parsed_script(&self, source: &str) -> EvalResult<Arc<Vec<Statement>>> {
        if let Some(script) = self.scripts.get(source) {
            return Ok(script.clone());
        }
        let script = Arc::new(parser::parse_script(source)?);
        self.scripts.insert(source.to_string(), script.clone());
        Ok(script)
    }
}

impl Evaluator for MinimalEvaluator {
    fn datamodel_name(&self) -> &str {
        DATAMODEL_NAME
    }

    fn eval(&self, ctx: &Context<'_>, expr: &str) -> EvalResult<Value> {
        let parsed = self.parsed(expr)?;
        let value = evaluate(ctx, &parsed)?;
        trace!(expr, %value, "evaluated");
        Ok(value)
    }

    fn eval_cond(&self, ctx: &Context<'_>, expr: &str) -> EvalResult<Option<bool>> {
        Ok(match self.eval(ctx, expr)? {
            Value::Null => None,
            Value::Bool(b) => Some(b),
            other => Some(truthy(&other)),
        })
    }

    fn eval_assign(&self, ctx: &mut Context<'_>, location: &str, value: Value) -> EvalResult<()> {
        let location = parser::parse_location(location)?;
        assign(ctx, &location, value)
    }

    fn eval_script(&self, ctx: &mut Context<'_>, script: &str) -> EvalResult<()> {
        let statements = self.parsed_script(script)?;
        for statement in statements.iter() {
            match statement {
                Statement::Assign(location, expr) => {
                    let value = evaluate(ctx, expr)?;
                    assign(ctx, location, value)?;
                }
                Statement::Expr(expr) => {
                    evaluate(ctx, expr)?;
                }
            }
        }
        Ok(())
    }
}

fn assign(ctx: &mut Context<'_>, location: &Location, value: Value) -> EvalResult<()> {
    if location.path.is_empty() {
        return Ok(ctx.set(&location.root, value)?);
    }
    let mut root = ctx
        .get(&location.root)
        .cloned()
        .ok_or_else(|| EvalError::UndefinedVariable(location.root.clone()))?;
    set_path(&mut root, &location.path, value, location)?;
    Ok(ctx.set(&location.root, root)?)
}

fn set_path(target: &mut Value, path: &[String], value: Value, location: &Location) -> EvalResult<()> {
    let invalid = || {
        let mut full = location.root.clone();
        for seg in &location.path {
            full.push('.');
            full.push_str(seg);
        }
        EvalError::InvalidLocation(full)
    };
    let Value::Object(map) = target else {
        return Err(invalid());
    };
    match path {
        [] => Err(invalid()),
        [last] => {
            map.insert(last.clone(), value);
            Ok(())
        }
        [head, rest @ ..] => {
            let next = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(next, rest, value, location)
        }
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn evaluate(ctx: &Context<'_>, expr: &Expr) -> EvalResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Member(base, field) => member(evaluate(ctx, base)?, field),
        Expr::Index(base, index) => {
            let base = evaluate(ctx, base)?;
            let index = evaluate(ctx, index)?;
            element(base, &index)
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(ctx, item))
            .collect::<EvalResult<Vec<_>>>()
            .map(Value::Array),
        Expr::Call(name, args) => call(ctx, name, args),
        Expr::Unary(op, operand) => {
            let value = evaluate(ctx, operand)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_i64() {
                    Some(i) if i != i64::MIN => Ok(Value::from(-i)),
                    _ => Ok(float(-number(&value)?)),
                },
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let lhs = evaluate(ctx, lhs)?;
            if truthy(&lhs) {
                evaluate(ctx, rhs)
            } else {
                Ok(lhs)
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let lhs = evaluate(ctx, lhs)?;
            if truthy(&lhs) {
                Ok(lhs)
            } else {
                evaluate(ctx, rhs)
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, evaluate(ctx, lhs)?, evaluate(ctx, rhs)?),
    }
}

fn member(base: Value, field: &str) -> EvalResult<Value> {
    match (base, field) {
        (Value::Null, _) => Err(EvalError::Type(format!(
            "cannot read property `{}` of null",
            field
        ))),
        (Value::Object(mut map), _) => Ok(map.remove(field).unwrap_or(Value::Null)),
        (Value::Array(items), "length") => Ok(Value::from(items.len())),
        (Value::String(s), "length") => Ok(Value::from(s.chars().count())),
        _ => Ok(Value::Null),
    }
}

fn element(base: Value, index: &Value) -> EvalResult<Value> {
    match (base, index) {
        (Value::Array(mut items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| EvalError::Type(format!("invalid array index {}", n)))?
                as usize;
            Ok(if i < items.len() {
                items.swap_remove(i)
            } else {
                Value::Null
            })
        }
        (Value::Object(mut map), Value::String(key)) => Ok(map.remove(key).unwrap_or(Value::Null)),
        (base, index) => Err(EvalError::Type(format!("cannot index {} with {}", base, index))),
    }
}

fn call(ctx: &Context<'_>, name: &str, args: &[Expr]) -> EvalResult<Value> {
    match (name, args) {
        ("In", [state]) => match evaluate(ctx, state)? {
            Value::String(id) => Ok(Value::Bool(ctx.is_in_state(&id))),
            other => Err(EvalError::Type(format!("In() expects a state id, got {}", other))),
        },
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn number(value: &Value) -> EvalResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::Type(format!("{} is not a number", value)))
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    use std::cmp::Ordering;

    let integers = match (lhs.as_i64(), rhs.as_i64()) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    };
    match op {
        BinaryOp::Add if lhs.is_string() || rhs.is_string() => {
            Ok(Value::String(display(&lhs) + &display(&rhs)))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            let checked = integers.and_then(|(a, b)| match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                _ => a.checked_mul(b),
            });
            if let Some(i) = checked {
                return Ok(Value::from(i));
            }
            let (a, b) = (number(&lhs)?, number(&rhs)?);
            Ok(float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                _ => a * b,
            }))
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = (number(&lhs)?, number(&rhs)?);
            if b == 0.0 {
                return Err(EvalError::Type("division by zero".to_string()));
            }
            if let Some((x, y)) = integers {
                let overflow = || EvalError::Type(format!("integer overflow in {} by {}", x, y));
                let rem = x.checked_rem(y).ok_or_else(overflow)?;
                if op == BinaryOp::Rem {
                    return Ok(Value::from(rem));
                }
                if rem == 0 {
                    return Ok(Value::from(x.checked_div(y).ok_or_else(overflow)?));
                }
            }
            Ok(float(if op == BinaryOp::Div { a / b } else { a % b }))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => number(&lhs)?.partial_cmp(&number(&rhs)?),
            };
            Ok(Value::Bool(match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            }))
        }
        BinaryOp::And => Ok(if truthy(&lhs) { rhs } else { lhs }),
        BinaryOp::Or => Ok(if truthy(&lhs) { lhs } else { rhs }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::StateConfiguration;
    use crate::context::{DataModel, ScopeId};
    use crate::model::{ChartBuilder, StateChart, StateDef};
    use serde_json::json;

    fn chart() -> StateChart {
        ChartBuilder::new()
            .state(StateDef::state("s1"))
            .state(StateDef::state("s2"))
            .build()
            .unwrap()
    }

    fn eval_with(data: &mut DataModel, expr: &str) -> EvalResult<Value> {
        let chart = chart();
        let mut config = StateConfiguration::new();
        config.enter_state(chart.node(chart.find("s1").unwrap())).unwrap();
        let ctx = Context::new(data, ScopeId::Global, &chart, &config);
        MinimalEvaluator::new().eval(&ctx, expr)
    }

    #[test]
    fn test_arithmetic() {
        let mut data = DataModel::new();
        data.set(ScopeId::Global, "x", json!(4)).unwrap();
        assert_eq!(eval_with(&mut data, "x + 1").unwrap(), json!(5));
        assert_eq!(eval_with(&mut data, "x / 8").unwrap(), json!(0.5));
        assert_eq!(eval_with(&mut data, "x / 2").unwrap(), json!(2));
        assert_eq!(eval_with(&mut data, "7 % 4").unwrap(), json!(3));
        assert_eq!(eval_with(&mut data, "-x * 2").unwrap(), json!(-8));
        assert_eq!(eval_with(&mut data, "'n=' + x").unwrap(), json!("n=4"));
        assert!(matches!(eval_with(&mut data, "x / 0"), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let mut data = DataModel::new();
        data.set(ScopeId::Global, "min", json!(i64::MIN)).unwrap();
        assert!(matches!(eval_with(&mut data, "min / -1"), Err(EvalError::Type(_))));
        assert!(matches!(eval_with(&mut data, "min % -1"), Err(EvalError::Type(_))));
        assert!(matches!(
            eval_with(&mut data, "(-9223372036854775807 - 1) / -1"),
            Err(EvalError::Type(_))
        ));
        assert_eq!(eval_with(&mut data, "min / 1").unwrap(), json!(i64::MIN));
        assert_eq!(eval_with(&mut data, "min % 2").unwrap(), json!(0));
    }

    #[test]
    fn test_logic_and_comparison() {
        let mut data = DataModel::new();
        data.set(ScopeId::Global, "s", json!("abc")).unwrap();
        assert_eq!(eval_with(&mut data, "1 < 2 && 'a' < 'b'").unwrap(), json!(true));
        assert_eq!(eval_with(&mut data, "null || s").unwrap(), json!("abc"));
        assert_eq!(eval_with(&mut data, "1 == 1.0").unwrap(), json!(true));
        assert_eq!(eval_with(&mut data, "s.length >= 3").unwrap(), json!(true));
        assert_eq!(eval_with(&mut data, "!(s != 'abc')").unwrap(), json!(true));
    }

    #[test]
    fn test_in_predicate() {
        let mut data = DataModel::new();
        assert_eq!(eval_with(&mut data, "In('s1')").unwrap(), json!(true));
        assert_eq!(eval_with(&mut data, "In('s2')").unwrap(), json!(false));
        assert!(matches!(
            eval_with(&mut data, "Out('s1')"),
            Err(EvalError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_undefined_variable() {
        let mut data = DataModel::new();
        assert_eq!(
            eval_with(&mut data, "missing + 1"),
            Err(EvalError::UndefinedVariable("missing".to_string()))
        );
        data.set(ScopeId::Global, "n", Value::Null).unwrap();
        assert!(matches!(eval_with(&mut data, "n.field"), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_assign_and_script() {
        let chart = chart();
        let config = StateConfiguration::new();
        let mut data = DataModel::new();
        data.set(ScopeId::Global, "obj", json!({})).unwrap();
        let evaluator = MinimalEvaluator::new();
        {
            let mut ctx = Context::new(&mut data, ScopeId::Global, &chart, &config);
            evaluator.eval_assign(&mut ctx, "obj.a.b", json!(1)).unwrap();
            evaluator.eval_script(&mut ctx, "x = 2; y = x * obj.a.b + 1;").unwrap();
            assert_eq!(evaluator.eval_cond(&ctx, "y == 3").unwrap(), Some(true));
            assert_eq!(evaluator.eval_cond(&ctx, "null").unwrap(), None);
            assert!(evaluator.eval_assign(&mut ctx, "y.z", json!(1)).is_err());
            assert!(evaluator.eval_assign(&mut ctx, "_event", json!(1)).is_err());
        }
        assert_eq!(data.get(ScopeId::Global, "obj"), Some(&json!({"a": {"b": 1}})));
        assert_eq!(evaluator.expressions.len(), 2);
        assert_eq!(evaluator.scripts.len(), 1);
    }
}
