//! Standard String library

use crate::std::{Arity, NativeContext, NativeExport, StdModule};
use crate::vm::{VMError, VMResult, Value};

/// String module implementation.
#[derive(Debug, Default)]
pub struct StringModule;

impl StdModule for StringModule {
    fn module_path(&self) -> &'static str {
        "std.string"
    }

    fn exports(&self) -> Vec<NativeExport> {
        use Arity::Exact;
        vec![
            NativeExport::new("str", "std.string.str", "(value) -> String", Exact(1), native_str),
            NativeExport::new(
                "upper",
                "std.string.upper",
                "(s: String) -> String",
                Exact(1),
                native_upper,
            ),
            NativeExport::new(
                "lower",
                "std.string.lower",
                "(s: String) -> String",
                Exact(1),
                native_lower,
            ),
            NativeExport::new(
                "trim",
                "std.string.trim",
                "(s: String) -> String",
                Exact(1),
                native_trim,
            ),
            NativeExport::new(
                "contains",
                "std.string.contains",
                "(s: String, needle: String) -> Bool",
                Exact(2),
                native_contains,
            ),
            NativeExport::new(
                "split",
                "std.string.split",
                "(s: String, sep: String) -> List[String]",
                Exact(2),
                native_split,
            ),
            NativeExport::new(
                "join",
                "std.string.join",
                "(items: List, sep: String) -> String",
                Exact(2),
                native_join,
            ),
            NativeExport::new(
                "replace",
                "std.string.replace",
                "(s: String, from: String, to: String) -> String",
                Exact(3),
                native_replace,
            ),
            NativeExport::new(
                "repeat",
                "std.string.repeat",
                "(s: String, n: Int) -> String",
                Exact(2),
                native_repeat,
            ),
            NativeExport::new(
                "parse_int",
                "std.string.parse_int",
                "(s: String) -> Int",
                Exact(1),
                native_parse_int,
            ),
        ]
    }
}

fn native_str(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    match &args[0] {
        s @ Value::Str(_) => Ok(s.clone()),
        other => {
            let mut text = String::new();
            ctx.render_into(&mut text, other)?;
            ctx.alloc_str(text)
        }
    }
}

fn native_upper(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let s = args[0].as_str()?.to_uppercase();
    ctx.alloc_str(s)
}

fn native_lower(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let s = args[0].as_str()?.to_lowercase();
    ctx.alloc_str(s)
}

fn native_trim(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let s = args[0].as_str()?.trim().to_string();
    ctx.alloc_str(s)
}

fn native_contains(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    Ok(Value::Bool(args[0].as_str()?.contains(args[1].as_str()?)))
}

fn native_split(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let (s, sep) = (args[0].as_str()?, args[1].as_str()?);
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::string(c.to_string())).collect()
    } else {
        s.split(sep).map(Value::string).collect()
    };
    ctx.heap.charge(s.len())?;
    ctx.alloc_list(parts)
}

fn native_join(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let sep = args[1].as_str()?;
    let mut joined = String::new();
    for (i, item) in args[0].as_list()?.borrow().iter().enumerate() {
        if i > 0 {
            joined.push_str(sep);
        }
        ctx.render_into(&mut joined, item)?;
    }
    ctx.alloc_str(joined)
}

fn native_replace(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let (s, from, to) = (args[0].as_str()?, args[1].as_str()?, args[2].as_str()?);
    if from.is_empty() {
        return Err(VMError::RuntimeError(
            "replace pattern must not be empty".to_string(),
        ));
    }
    ctx.alloc_str(s.replace(from, to))
}

fn native_repeat(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let s = args[0].as_str()?;
    let n = args[1].as_int()?;
    let n = usize::try_from(n).map_err(|_| {
        VMError::RuntimeError(format!("repeat count must not be negative, got {}", n))
    })?;
    // Charge before building so huge counts fail without allocating
    ctx.heap.charge(s.len().saturating_mul(n))?;
    Ok(Value::string(s.repeat(n)))
}

fn native_parse_int(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let s = args[0].as_str()?;
    s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| VMError::RuntimeError(format!("invalid integer: {:?}", s)))
}
