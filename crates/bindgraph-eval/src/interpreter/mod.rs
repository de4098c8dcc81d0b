//! Sandboxed tree-walking interpreter for binding expressions.
//!
//! Executes parsed [`Template`]s against an [`EvalContext`] that exposes
//! entity property values. Nothing here can reach the host: no ambient
//! globals, no I/O, no unbounded loops. Side-effecting helpers are only
//! recorded, and only in [`Mode::Trigger`].
//!
//! - [`value`] implements JavaScript-flavoured coercions over JSON values.
//! - [`builtins`] holds the pure global functions and value methods.
//! - [`effect`] defines the side effects trigger code may request.
//! - [`error`] defines [`InterpreterError`].

pub mod builtins;
pub mod effect;
pub mod error;
pub mod value;

use serde_json::{Map, Value};

use bindgraph_core::expr::reserved::is_trigger_helper;
use bindgraph_core::expr::{parse_template, Expr, ExprKind, LogicalOp, Part, Template, UnaryOp};
use bindgraph_core::{EntityKind, PropertyPath, Segment, Span};

use crate::reference::static_chain;

pub use effect::TriggerEffect;
pub use error::InterpreterError;

/// Read access to property values during evaluation.
pub trait EvalContext {
    fn entity_kind(&self, name: &str) -> Option<EntityKind>;

    /// The value at `path` with its known descendants merged in, or `None`
    /// when neither the path nor anything below it exists.
    fn lookup(&self, path: &PropertyPath) -> Option<Value>;
}

/// Resource limits for a single expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InterpreterConfig {
    /// Maximum nesting of sub-expression evaluation.
    pub max_depth: usize,
    /// Maximum callback invocations across one evaluation.
    pub max_iterations: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_depth: 256,
            max_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Data bindings: side-effecting helpers are errors.
    Data,
    /// Trigger code: side-effecting helpers are recorded.
    Trigger,
}

/// Result of running trigger code.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub value: Value,
    pub effects: Vec<TriggerEffect>,
}

pub struct Interpreter<'c> {
    ctx: &'c dyn EvalContext,
    config: InterpreterConfig,
    mode: Mode,
    /// Arrow parameters in scope, innermost last.
    locals: Vec<(String, Value)>,
    depth: usize,
    iterations: usize,
    effects: Vec<TriggerEffect>,
}

impl<'c> Interpreter<'c> {
    pub fn new(ctx: &'c dyn EvalContext, config: InterpreterConfig, mode: Mode) -> Self {
        Interpreter {
            ctx,
            config,
            mode,
            locals: Vec::new(),
            depth: 0,
            iterations: 0,
            effects: Vec::new(),
        }
    }

    /// Evaluates every part of `template`.
    ///
    /// A lone `{{ }}` yields its raw value; anything else is concatenated
    /// into a string.
    pub fn evaluate_template(&mut self, template: &Template) -> Result<Value, InterpreterError> {
        if let Some(expr) = template.single_expression() {
            return self.eval(expr);
        }
        let mut out = String::new();
        for part in &template.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&value::template_text(&value));
                }
            }
        }
        Ok(Value::String(out))
    }

    pub fn into_effects(self) -> Vec<TriggerEffect> {
        self.effects
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, InterpreterError> {
        if self.depth >= self.config.max_depth {
            return Err(InterpreterError::LimitExceeded {
                what: "expression depth".to_string(),
                limit: self.config.max_depth,
                span: expr.span,
            });
        }
        self.depth += 1;
        let result = self.eval_inner(expr);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, InterpreterError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Ident(name) => self.resolve_ident(name, span),
            ExprKind::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            ExprKind::Object(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    let v = self.eval(field)?;
                    map.insert(key.clone(), v);
                }
                Ok(Value::Object(map))
            }
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                if let Some(v) = self.entity_chain(expr)? {
                    return Ok(v);
                }
                if let ExprKind::Ident(ns) = &object.kind {
                    if !self.is_bound(ns) && builtins::is_namespace(ns) {
                        return builtins::namespace_constant(ns, property).ok_or_else(|| {
                            InterpreterError::type_mismatch(
                                format!("{ns}.{property} is not a value"),
                                span,
                            )
                        });
                    }
                }
                let receiver = self.eval(object)?;
                self.read(&receiver, &Segment::Key(property.clone()), *optional, span)
            }
            ExprKind::Index {
                object,
                index,
                optional,
            } => {
                if let Some(v) = self.entity_chain(expr)? {
                    return Ok(v);
                }
                let receiver = self.eval(object)?;
                if receiver.is_null() && *optional {
                    return Ok(Value::Null);
                }
                let key = self.eval(index)?;
                let segment = match &key {
                    Value::Number(n) => match n.as_u64() {
                        Some(i) => Segment::Index(i as usize),
                        None => Segment::Key(value::to_js_string(&key)),
                    },
                    Value::String(s) => Segment::Key(s.clone()),
                    other => Segment::Key(value::to_js_string(other)),
                };
                self.read(&receiver, &segment, *optional, span)
            }
            ExprKind::Call { callee, args } => self.call(callee, args, span),
            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::Typeof {
                    if let ExprKind::Ident(name) = &operand.kind {
                        if !self.is_bound(name) && self.ctx.entity_kind(name).is_none() {
                            return Ok(Value::String("undefined".to_string()));
                        }
                    }
                }
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value::truthy(&v))),
                    UnaryOp::Typeof => Ok(Value::String(value::type_of(&v).to_string())),
                    UnaryOp::Neg | UnaryOp::Plus => {
                        let n = value::to_number(&v).ok_or_else(|| {
                            InterpreterError::type_mismatch(
                                format!("non-numeric operand {}", value::describe(&v)),
                                span,
                            )
                        })?;
                        let n = if *op == UnaryOp::Neg { -n } else { n };
                        Ok(bindgraph_core::expr::parser::number_value(n))
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                value::binary(*op, &l, &r, span)
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !value::truthy(&l),
                    LogicalOp::Or => value::truthy(&l),
                    LogicalOp::Coalesce => !l.is_null(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(rhs)
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if value::truthy(&self.eval(test)?) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            ExprKind::Arrow { .. } => Err(InterpreterError::type_mismatch(
                "arrow functions can only be passed as callbacks",
                span,
            )),
            ExprKind::Sequence(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.eval(item)?;
                }
                Ok(last)
            }
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.locals.iter().any(|(local, _)| local == name)
    }

    fn resolve_ident(&self, name: &str, span: Span) -> Result<Value, InterpreterError> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            return Ok(v.clone());
        }
        if self.ctx.entity_kind(name).is_some() {
            return Ok(PropertyPath::entity_root(name)
                .ok()
                .and_then(|root| self.ctx.lookup(&root))
                .unwrap_or_else(|| Value::Object(Map::new())));
        }
        if builtins::is_namespace(name)
            || builtins::FUNCTIONS.contains(&name)
            || is_trigger_helper(name)
        {
            return Err(InterpreterError::type_mismatch(
                format!("{name} cannot be used as a value"),
                span,
            ));
        }
        Err(InterpreterError::UndefinedReference {
            name: name.to_string(),
            span,
        })
    }

    /// Resolves a static chain rooted at an entity through the context,
    /// starting from the deepest path that exists.
    fn entity_chain(&self, expr: &Expr) -> Result<Option<Value>, InterpreterError> {
        let Some(chain) = static_chain(expr) else {
            return Ok(None);
        };
        if self.is_bound(chain.root) || self.ctx.entity_kind(chain.root).is_none() {
            return Ok(None);
        }
        let lenient = has_optional(expr);
        for depth in (0..=chain.segments.len()).rev() {
            let path = PropertyPath::from_segments(chain.root, &chain.segments[..depth]);
            if let Some(found) = self.ctx.lookup(&path) {
                return self.navigate(found, &chain.segments[depth..], lenient, expr.span);
            }
        }
        self.navigate(Value::Object(Map::new()), &chain.segments, lenient, expr.span)
    }

    fn navigate(
        &self,
        mut current: Value,
        segments: &[Segment],
        lenient: bool,
        span: Span,
    ) -> Result<Option<Value>, InterpreterError> {
        for segment in segments {
            current = self.read(&current, segment, lenient, span)?;
        }
        Ok(Some(current))
    }

    /// One property read with JavaScript's null-receiver rule.
    fn read(
        &self,
        receiver: &Value,
        segment: &Segment,
        optional: bool,
        span: Span,
    ) -> Result<Value, InterpreterError> {
        if receiver.is_null() {
            if optional {
                return Ok(Value::Null);
            }
            return Err(InterpreterError::type_mismatch(
                format!("cannot read property '{}' of undefined", segment_name(segment)),
                span,
            ));
        }
        Ok(match segment {
            Segment::Key(key) => builtins::property(receiver, key),
            Segment::Index(i) => builtins::element(receiver, *i),
        })
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<Value, InterpreterError> {
        match &callee.kind {
            ExprKind::Ident(name) if !self.is_bound(name) => {
                if is_trigger_helper(name) {
                    return self.trigger_helper(name, args, span);
                }
                if builtins::FUNCTIONS.contains(&name.as_str()) {
                    let values = self.eval_args(args)?;
                    return builtins::call_function(name, &values, span);
                }
                if self.ctx.entity_kind(name).is_some() {
                    return Err(InterpreterError::NotCallable {
                        name: name.clone(),
                        span,
                    });
                }
                Err(InterpreterError::UndefinedReference {
                    name: name.clone(),
                    span,
                })
            }
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                if let ExprKind::Ident(ns) = &object.kind {
                    if !self.is_bound(ns) {
                        match self.ctx.entity_kind(ns) {
                            Some(EntityKind::Action) if property == "run" => {
                                return self.run_action(ns, span);
                            }
                            None if builtins::is_namespace(ns) => {
                                let values = self.eval_args(args)?;
                                return builtins::call_namespace(ns, property, &values, span);
                            }
                            _ => {}
                        }
                    }
                }
                let receiver = self.eval(object)?;
                if receiver.is_null() && *optional {
                    return Ok(Value::Null);
                }
                self.call_method(receiver, property, args, span)
            }
            _ => Err(InterpreterError::NotCallable {
                name: "expression".to_string(),
                span,
            }),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, InterpreterError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Value, InterpreterError> {
        let Value::Array(items) = &receiver else {
            if receiver.is_null() {
                return Err(InterpreterError::type_mismatch(
                    format!("cannot read property '{name}' of undefined"),
                    span,
                ));
            }
            let values = self.eval_args(args)?;
            return builtins::call_method(&receiver, name, &values, span);
        };
        match name {
            "map" => {
                let (params, body) = callback(name, args, span)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.apply(params, body, &[item.clone(), Value::from(i)])?);
                }
                Ok(Value::Array(out))
            }
            "filter" => {
                let (params, body) = callback(name, args, span)?;
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if value::truthy(&self.apply(params, body, &[item.clone(), Value::from(i)])?) {
                        out.push(item.clone());
                    }
                }
                Ok(Value::Array(out))
            }
            "find" | "findIndex" | "some" | "every" => {
                let (params, body) = callback(name, args, span)?;
                for (i, item) in items.iter().enumerate() {
                    let hit = value::truthy(&self.apply(params, body, &[item.clone(), Value::from(i)])?);
                    match (name, hit) {
                        ("find", true) => return Ok(item.clone()),
                        ("findIndex", true) => return Ok(Value::from(i)),
                        ("some", true) => return Ok(Value::Bool(true)),
                        ("every", false) => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name {
                    "find" => Value::Null,
                    "findIndex" => Value::from(-1),
                    "some" => Value::Bool(false),
                    _ => Value::Bool(true),
                })
            }
            "reduce" => {
                let (params, body) = callback(name, args, span)?;
                let mut iter = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(init) => self.eval(init)?,
                    None => match iter.next() {
                        Some((_, first)) => first.clone(),
                        None => {
                            return Err(InterpreterError::invalid_args(
                                "reduce",
                                "empty array with no initial value",
                                span,
                            ))
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.apply(params, body, &[acc, item.clone(), Value::from(i)])?;
                }
                Ok(acc)
            }
            _ => {
                let values = self.eval_args(args)?;
                builtins::call_method(&receiver, name, &values, span)
            }
        }
    }

    /// Runs an arrow body with `values` bound to its parameters.
    fn apply(&mut self, params: &[String], body: &Expr, values: &[Value]) -> Result<Value, InterpreterError> {
        self.iterations += 1;
        if self.iterations > self.config.max_iterations {
            return Err(InterpreterError::LimitExceeded {
                what: "iteration".to_string(),
                limit: self.config.max_iterations,
                span: body.span,
            });
        }
        let depth = self.locals.len();
        for (i, param) in params.iter().enumerate() {
            let v = values.get(i).cloned().unwrap_or(Value::Null);
            self.locals.push((param.clone(), v));
        }
        let result = self.eval(body);
        self.locals.truncate(depth);
        result
    }

    fn side_effects_allowed(&self, helper: &str, span: Span) -> Result<(), InterpreterError> {
        match self.mode {
            Mode::Trigger => Ok(()),
            Mode::Data => Err(InterpreterError::SideEffectInData {
                helper: helper.to_string(),
                span,
            }),
        }
    }

    fn run_action(&mut self, action: &str, span: Span) -> Result<Value, InterpreterError> {
        self.side_effects_allowed(&format!("{action}.run"), span)?;
        self.effects.push(TriggerEffect::RunAction {
            action: action.to_string(),
        });
        Ok(Value::Null)
    }

    fn trigger_helper(&mut self, helper: &str, args: &[Expr], span: Span) -> Result<Value, InterpreterError> {
        self.side_effects_allowed(helper, span)?;
        let values = self.eval_args(args)?;
        let text = |i: usize| -> Result<String, InterpreterError> {
            match values.get(i) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) if !other.is_null() => Ok(value::to_js_string(other)),
                _ => Err(InterpreterError::invalid_args(
                    helper,
                    format!("argument {} must be a string", i + 1),
                    span,
                )),
            }
        };
        let arg = |i: usize| values.get(i).cloned().unwrap_or(Value::Null);
        let effect = match helper {
            "storeValue" => TriggerEffect::StoreValue {
                key: text(0)?,
                value: arg(1),
                persist: values.get(2).map_or(true, value::truthy),
            },
            "clearStore" => TriggerEffect::ClearStore,
            "navigateTo" => TriggerEffect::NavigateTo {
                page: text(0)?,
                params: match arg(1) {
                    Value::Null => Value::Object(Map::new()),
                    params => params,
                },
            },
            "showAlert" => TriggerEffect::ShowAlert {
                message: value::to_js_string(&arg(0)),
                style: values.get(1).and_then(Value::as_str).map(str::to_string),
            },
            "resetWidget" => TriggerEffect::ResetWidget { widget: text(0)? },
            "showModal" => TriggerEffect::ShowModal { name: text(0)? },
            "closeModal" => TriggerEffect::CloseModal { name: text(0)? },
            "copyToClipboard" => TriggerEffect::CopyToClipboard { text: text(0)? },
            "download" => TriggerEffect::Download {
                data: arg(0),
                name: text(1)?,
            },
            _ => {
                return Err(InterpreterError::NotCallable {
                    name: helper.to_string(),
                    span,
                })
            }
        };
        self.effects.push(effect);
        Ok(Value::Null)
    }
}

fn callback<'e>(
    method: &str,
    args: &'e [Expr],
    span: Span,
) -> Result<(&'e [String], &'e Expr), InterpreterError> {
    match args.first().map(|a| &a.kind) {
        Some(ExprKind::Arrow { params, body }) => Ok((params, body)),
        _ => Err(InterpreterError::invalid_args(
            method,
            "expects an arrow function callback",
            span,
        )),
    }
}

fn has_optional(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Member {
            object, optional, ..
        }
        | ExprKind::Index {
            object, optional, ..
        } => *optional || has_optional(object),
        _ => false,
    }
}

fn segment_name(segment: &Segment) -> String {
    match segment {
        Segment::Key(key) => key.clone(),
        Segment::Index(i) => i.to_string(),
    }
}

/// Parses and evaluates one data template against `ctx`.
pub fn evaluate(text: &str, ctx: &dyn EvalContext) -> Result<Value, InterpreterError> {
    let template = parse_template(text)?;
    Interpreter::new(ctx, InterpreterConfig::default(), Mode::Data).evaluate_template(&template)
}

/// Runs parsed trigger code, collecting its effects.
pub fn run_trigger(
    template: &Template,
    ctx: &dyn EvalContext,
    config: InterpreterConfig,
) -> Result<TriggerOutcome, InterpreterError> {
    let mut interpreter = Interpreter::new(ctx, config, Mode::Trigger);
    let value = interpreter.evaluate_template(template)?;
    Ok(TriggerOutcome {
        value,
        effects: interpreter.into_effects(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::expr::parse_trigger;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Flat path table; descendants are merged the same way the evaluator does.
    struct Table {
        kinds: BTreeMap<String, EntityKind>,
        values: BTreeMap<PropertyPath, Value>,
    }

    impl Table {
        fn new(entries: &[(&str, Value)]) -> Self {
            let mut kinds = BTreeMap::new();
            let mut values = BTreeMap::new();
            for (raw, v) in entries {
                let path = PropertyPath::parse(raw).unwrap();
                kinds.insert(path.entity().to_string(), EntityKind::Widget);
                values.insert(path, v.clone());
            }
            kinds.insert("Api1".to_string(), EntityKind::Action);
            Table { kinds, values }
        }
    }

    impl EvalContext for Table {
        fn entity_kind(&self, name: &str) -> Option<EntityKind> {
            self.kinds.get(name).copied()
        }

        fn lookup(&self, path: &PropertyPath) -> Option<Value> {
            if let Some(v) = self.values.get(path) {
                return Some(v.clone());
            }
            let mut map = Map::new();
            for (p, v) in &self.values {
                if p.is_descendant_of(path) && p.parent().as_ref() == Some(path) {
                    if let Some(Segment::Key(k)) = p.segments().last() {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            (!map.is_empty()).then_some(Value::Object(map))
        }
    }

    fn table() -> Table {
        Table::new(&[
            ("A.x", json!(5)),
            ("Input1.text", json!("  Ada ")),
            ("Table1.data", json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}])),
            ("Table1.selectedRow", json!(null)),
        ])
    }

    fn eval(text: &str) -> Result<Value, InterpreterError> {
        evaluate(text, &table())
    }

    #[test]
    fn evaluates_single_expression_to_raw_value() {
        assert_eq!(eval("{{A.x + 1}}").unwrap(), json!(6));
        assert_eq!(eval("{{Table1.data[1].name}}").unwrap(), json!("b"));
        assert_eq!(eval("{{Table1.data.length}}").unwrap(), json!(2));
    }

    #[test]
    fn mixed_templates_concatenate() {
        assert_eq!(eval("x = {{A.x}}!").unwrap(), json!("x = 5!"));
        assert_eq!(eval("plain").unwrap(), json!("plain"));
        assert_eq!(eval("{{ {a: A.x} }} ok").unwrap(), json!("{\"a\":5} ok"));
    }

    #[test]
    fn callbacks_and_methods() {
        assert_eq!(
            eval("{{Table1.data.map(r => r.id * 10)}}").unwrap(),
            json!([10, 20])
        );
        assert_eq!(
            eval("{{Table1.data.filter(r => r.id > A.x - 4).map(r => r.name).join()}}").unwrap(),
            json!("b")
        );
        assert_eq!(eval("{{Input1.text.trim().toUpperCase()}}").unwrap(), json!("ADA"));
        assert_eq!(
            eval("{{Table1.data.reduce((sum, r) => sum + r.id, 0)}}").unwrap(),
            json!(3)
        );
    }

    #[test]
    fn null_receivers() {
        assert!(matches!(
            eval("{{Table1.selectedRow.name}}"),
            Err(InterpreterError::TypeMismatch { .. })
        ));
        assert_eq!(eval("{{Table1.selectedRow?.name}}").unwrap(), Value::Null);
        assert_eq!(eval("{{Table1.selectedRow?.name ?? 'none'}}").unwrap(), json!("none"));
        assert_eq!(eval("{{A.missing}}").unwrap(), Value::Null);
    }

    #[test]
    fn whole_entity_reference() {
        assert_eq!(eval("{{A}}").unwrap(), json!({"x": 5}));
        assert_eq!(eval("{{Object.keys(A)}}").unwrap(), json!(["x"]));
    }

    #[test]
    fn unknown_identifiers_and_typeof() {
        assert!(matches!(
            eval("{{Nope.x}}"),
            Err(InterpreterError::UndefinedReference { .. })
        ));
        assert_eq!(eval("{{typeof Nope}}").unwrap(), json!("undefined"));
        assert_eq!(eval("{{typeof A.x}}").unwrap(), json!("number"));
    }

    #[test]
    fn errors_carry_spans() {
        let err = eval("{{A.x / 0}}").unwrap_err();
        assert!(matches!(err, InterpreterError::DivideByZero { .. }));
        assert_eq!(err.span(), Some(Span::new(2, 9)));
    }

    #[test]
    fn side_effects_rejected_in_data_mode() {
        assert!(matches!(
            eval("{{storeValue('k', 1)}}"),
            Err(InterpreterError::SideEffectInData { .. })
        ));
        assert!(matches!(
            eval("{{Api1.run()}}"),
            Err(InterpreterError::SideEffectInData { .. })
        ));
    }

    #[test]
    fn trigger_mode_collects_effects_in_order() {
        let template = parse_trigger("Api1.run(); storeValue('last', A.x); showAlert('saved', 'success')").unwrap();
        let outcome = run_trigger(&template, &table(), InterpreterConfig::default()).unwrap();
        assert_eq!(
            outcome.effects,
            vec![
                TriggerEffect::RunAction { action: "Api1".into() },
                TriggerEffect::StoreValue {
                    key: "last".into(),
                    value: json!(5),
                    persist: true
                },
                TriggerEffect::ShowAlert {
                    message: "saved".into(),
                    style: Some("success".into())
                },
            ]
        );
    }

    #[test]
    fn iteration_limit() {
        let config = InterpreterConfig {
            max_depth: 256,
            max_iterations: 1,
        };
        let template = parse_template("{{Table1.data.map(r => r.id)}}").unwrap();
        let ctx = table();
        let mut interpreter = Interpreter::new(&ctx, config, Mode::Data);
        assert!(matches!(
            interpreter.evaluate_template(&template),
            Err(InterpreterError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn depth_limit() {
        let config = InterpreterConfig {
            max_depth: 4,
            max_iterations: 10,
        };
        let template = parse_template("{{((((1 + 1) + 1) + 1) + 1)}}").unwrap();
        let ctx = table();
        let mut interpreter = Interpreter::new(&ctx, config, Mode::Data);
        assert!(matches!(
            interpreter.evaluate_template(&template),
            Err(InterpreterError::LimitExceeded { .. })
        ));
    }
}
