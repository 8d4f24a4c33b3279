//! Runtime values
//!
//! YX is dynamically typed: every slot holds a [`Value`]. Strings are
//! immutable and shared; lists and objects are shared and mutable, so
//! assigning a list to another variable aliases it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::vm::errors::{VMError, VMResult};

/// Nesting depth after which display and equality stop descending
///
/// Lists may contain themselves; this keeps both operations finite.
const MAX_NESTING: usize = 64;

/// Element pairs one equality test may visit
///
/// Shared sublists (`a = [a, a]`) make the expanded tree exponential in
/// the nesting depth, so depth alone does not bound the work.
const MAX_COMPARED: usize = 1 << 20;

/// Longest text [`fmt::Display`] produces before cutting off with `...`
const MAX_DISPLAY_BYTES: usize = 1 << 20;

/// Field layout of a declared type, shared by all of its instances
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Index of the type in the loaded image
    pub type_idx: usize,
    pub name: String,
    /// Field names in declaration order
    pub fields: Vec<String>,
}

impl Shape {
    pub fn field_index(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// Instance of a declared type
#[derive(Debug)]
pub struct Object {
    pub shape: Rc<Shape>,
    pub fields: RefCell<Vec<Value>>,
}

impl Drop for Object {
    fn drop(&mut self) {
        release(self.fields.get_mut());
    }
}

/// Backing store of a list value
#[derive(Debug, Default)]
pub struct ListCell(RefCell<Vec<Value>>);

impl ListCell {
    pub fn new(items: Vec<Value>) -> Self {
        Self(RefCell::new(items))
    }
}

impl Deref for ListCell {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ListCell {
    fn drop(&mut self) {
        release(self.0.get_mut());
    }
}

/// Drop `items`, unlinking singly owned containers one at a time
///
/// The default drop glue recurses once per nesting level, and a program can
/// nest lists far deeper than the host stack allows.
fn release(items: &mut Vec<Value>) {
    let mut pending = std::mem::take(items);
    while let Some(value) = pending.pop() {
        match value {
            Value::List(list) => {
                if let Ok(mut cell) = Rc::try_unwrap(list) {
                    pending.append(cell.0.get_mut());
                }
            }
            Value::Object(object) => {
                if let Ok(mut object) = Rc::try_unwrap(object) {
                    pending.append(object.fields.get_mut());
                }
            }
            _ => {}
        }
    }
}

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListCell>),
    /// Half-open integer range `start..end`
    Range(i64, i64),
    Object(Rc<Object>),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(ListCell::new(items)))
    }

    /// Name of the value's runtime type
    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "Unit",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Range(..) => "Range",
            Value::Object(obj) => &obj.shape.name,
        }
    }

    pub fn as_bool(&self) -> VMResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(expected("Bool", other)),
        }
    }

    pub fn as_int(&self) -> VMResult<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(expected("Int", other)),
        }
    }

    /// Numeric value as a float; integers widen
    pub fn as_float(&self) -> VMResult<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            other => Err(expected("Float", other)),
        }
    }

    pub fn as_str(&self) -> VMResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(expected("String", other)),
        }
    }

    pub fn as_list(&self) -> VMResult<&Rc<ListCell>> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(expected("List", other)),
        }
    }

    /// Append the display form to `out`
    ///
    /// Fails as soon as `out` would grow past `limit` bytes, so the work done
    /// is bounded by `limit` whatever the shape of the value.
    pub fn write_bounded(
        &self,
        out: &mut String,
        limit: usize,
    ) -> fmt::Result {
        write_value(&mut Bounded { out, limit }, self, false, 0)
    }

    /// Approximate heap footprint charged against the allocation budget
    pub fn heap_size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) => items.borrow().len() * std::mem::size_of::<Value>(),
            Value::Object(obj) => obj.shape.fields.len() * std::mem::size_of::<Value>(),
            _ => 0,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`
    pub fn compare(
        &self,
        other: &Value,
    ) -> VMResult<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
                let (x, y) = (a.as_float()?, b.as_float()?);
                x.partial_cmp(&y)
                    .ok_or_else(|| VMError::type_mismatch("cannot order NaN"))
            }
            (a, b) => Err(VMError::type_mismatch(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Structural equality with a bounded amount of work
    pub fn equals(
        &self,
        other: &Value,
    ) -> VMResult<bool> {
        let mut budget = MAX_COMPARED;
        let equal = self.eq_at(other, 0, &mut budget);
        if budget == 0 {
            return Err(VMError::RuntimeError(
                "values too large to compare".to_string(),
            ));
        }
        Ok(equal)
    }

    fn eq_at(
        &self,
        other: &Value,
        depth: usize,
        budget: &mut usize,
    ) -> bool {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range(a, b), Value::Range(c, d)) => a == c && b == d,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                if depth >= MAX_NESTING {
                    return false;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.eq_at(y, depth + 1, budget))
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(
        &self,
        other: &Value,
    ) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

fn expected(
    ty: &str,
    found: &Value,
) -> VMError {
    VMError::type_mismatch(format!("expected {}, found {}", ty, found.type_name()))
}

/// Float text that always reads as a float (`2.0`, not `2`)
pub fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// String writer that refuses to grow past `limit` bytes
struct Bounded<'a> {
    out: &'a mut String,
    limit: usize,
}

impl fmt::Write for Bounded<'_> {
    fn write_str(
        &mut self,
        s: &str,
    ) -> fmt::Result {
        if self.out.len() + s.len() > self.limit {
            return Err(fmt::Error);
        }
        self.out.push_str(s);
        Ok(())
    }
}

fn write_value(
    out: &mut impl fmt::Write,
    value: &Value,
    quoted: bool,
    depth: usize,
) -> fmt::Result {
    match value {
        Value::Unit => out.write_str("()"),
        Value::Bool(b) => write!(out, "{}", b),
        Value::Int(n) => write!(out, "{}", n),
        Value::Float(x) => out.write_str(&format_float(*x)),
        Value::Str(s) if quoted => write!(out, "{:?}", &**s),
        Value::Str(s) => out.write_str(s),
        Value::Range(a, b) => write!(out, "{}..{}", a, b),
        Value::List(_) | Value::Object(_) if depth >= MAX_NESTING => out.write_str("..."),
        Value::List(items) => {
            out.write_char('[')?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write_value(out, item, true, depth + 1)?;
            }
            out.write_char(']')
        }
        Value::Object(obj) => {
            write!(out, "{} {{", obj.shape.name)?;
            for (i, (name, field)) in obj
                .shape
                .fields
                .iter()
                .zip(obj.fields.borrow().iter())
                .enumerate()
            {
                out.write_str(if i == 0 { " " } else { ", " })?;
                write!(out, "{}: ", name)?;
                write_value(out, field, true, depth + 1)?;
            }
            if obj.shape.fields.is_empty() {
                out.write_char('}')
            } else {
                out.write_str(" }")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut text = String::new();
        let cut = self.write_bounded(&mut text, MAX_DISPLAY_BYTES).is_err();
        f.write_str(&text)?;
        if cut {
            f.write_str("...")?;
        }
        Ok(())
    }
}
