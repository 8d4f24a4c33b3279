//! Standard List library

use crate::std::{Arity, NativeContext, NativeExport, StdModule};
use crate::vm::{VMError, VMResult, Value};

/// List module implementation.
#[derive(Debug, Default)]
pub struct ListModule;

impl StdModule for ListModule {
    fn module_path(&self) -> &'static str {
        "std.list"
    }

    fn exports(&self) -> Vec<NativeExport> {
        use Arity::Exact;
        vec![
            NativeExport::new("len", "std.list.len", "(xs) -> Int", Exact(1), native_len),
            NativeExport::new("push", "std.list.push", "(xs: List, x) -> ()", Exact(2), native_push),
            NativeExport::new("pop", "std.list.pop", "(xs: List) -> Any", Exact(1), native_pop),
            NativeExport::new(
                "contains",
                "std.list.contains",
                "(xs, x) -> Bool",
                Exact(2),
                native_contains,
            ),
            NativeExport::new(
                "range",
                "std.list.range",
                "(start: Int, end: Int) -> List[Int]",
                Exact(2),
                native_range,
            ),
            NativeExport::new(
                "reverse",
                "std.list.reverse",
                "(xs: List) -> List",
                Exact(1),
                native_reverse,
            ),
            NativeExport::new("sum", "std.list.sum", "(xs: List) -> Number", Exact(1), native_sum),
        ]
    }
}

/// Number of elements of a list or range, or chars of a string
fn native_len(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let len = match &args[0] {
        Value::List(items) => items.borrow().len(),
        Value::Str(s) => s.chars().count(),
        Value::Range(a, b) => return Ok(Value::Int(b.saturating_sub(*a).max(0))),
        other => {
            return Err(VMError::type_mismatch(format!(
                "len() of {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn native_push(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let list = args[0].as_list()?;
    ctx.heap.charge(std::mem::size_of::<Value>())?;
    list.borrow_mut().push(args[1].clone());
    Ok(Value::Unit)
}

fn native_pop(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    args[0]
        .as_list()?
        .borrow_mut()
        .pop()
        .ok_or_else(|| VMError::RuntimeError("pop from empty list".to_string()))
}

fn native_contains(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let found = match (&args[0], &args[1]) {
        (Value::Range(a, b), Value::Int(n)) => a <= n && n < b,
        (Value::Range(..), _) => false,
        (list, needle) => {
            let items = list.as_list()?.borrow();
            let mut found = false;
            for item in items.iter() {
                if item.equals(needle)? {
                    found = true;
                    break;
                }
            }
            found
        }
    };
    Ok(Value::Bool(found))
}

fn native_range(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let (start, end) = (args[0].as_int()?, args[1].as_int()?);
    let len = usize::try_from(end.saturating_sub(start).max(0)).unwrap_or(usize::MAX);
    ctx.heap
        .charge(len.saturating_mul(std::mem::size_of::<Value>()))?;
    Ok(Value::list((start..end).map(Value::Int).collect()))
}

fn native_reverse(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let items: Vec<Value> = args[0].as_list()?.borrow().iter().rev().cloned().collect();
    ctx.alloc_list(items)
}

fn native_sum(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let items = args[0].as_list()?.borrow();
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for item in items.iter() {
        if let Some(total) = float_total {
            float_total = Some(total + item.as_float()?);
        } else if let Value::Int(n) = item {
            int_total = int_total.checked_add(*n).ok_or(VMError::IntegerOverflow)?;
        } else {
            float_total = Some(int_total as f64 + item.as_float()?);
        }
    }
    Ok(match float_total {
        Some(x) => Value::Float(x),
        None => Value::Int(int_total),
    })
}
