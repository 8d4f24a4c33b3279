//! Standard Math library

use crate::std::{Arity, NativeContext, NativeExport, StdModule};
use crate::vm::{VMError, VMResult, Value};

/// Math module implementation.
#[derive(Debug, Default)]
pub struct MathModule;

impl StdModule for MathModule {
    fn module_path(&self) -> &'static str {
        "std.math"
    }

    fn exports(&self) -> Vec<NativeExport> {
        use Arity::Exact;
        vec![
            NativeExport::new("abs", "std.math.abs", "(n) -> Number", Exact(1), native_abs),
            NativeExport::new("min", "std.math.min", "(a, b) -> Number", Exact(2), native_min),
            NativeExport::new("max", "std.math.max", "(a, b) -> Number", Exact(2), native_max),
            NativeExport::new(
                "clamp",
                "std.math.clamp",
                "(value, lo, hi) -> Number",
                Exact(3),
                native_clamp,
            ),
            NativeExport::new(
                "pow",
                "std.math.pow",
                "(base, exp) -> Number",
                Exact(2),
                native_pow,
            ),
            NativeExport::new("sqrt", "std.math.sqrt", "(n) -> Float", Exact(1), native_sqrt),
            NativeExport::new("floor", "std.math.floor", "(n) -> Int", Exact(1), native_floor),
            NativeExport::new("ceil", "std.math.ceil", "(n) -> Int", Exact(1), native_ceil),
            NativeExport::new("round", "std.math.round", "(n) -> Int", Exact(1), native_round),
            NativeExport::new("pi", "std.math.pi", "() -> Float", Exact(0), native_pi),
        ]
    }
}

fn native_abs(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    match &args[0] {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or(VMError::IntegerOverflow),
        other => Ok(Value::Float(other.as_float()?.abs())),
    }
}

/// Pick one of two numbers, keeping integers as integers
fn pick(
    args: &[Value],
    want_less: bool,
) -> VMResult<Value> {
    let ordering = args[0].compare(&args[1])?;
    let first = if want_less {
        ordering.is_le()
    } else {
        ordering.is_ge()
    };
    Ok(if first { args[0].clone() } else { args[1].clone() })
}

fn native_min(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    pick(args, true)
}

fn native_max(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    pick(args, false)
}

fn native_clamp(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let (value, lo, hi) = (&args[0], &args[1], &args[2]);
    if lo.compare(hi)?.is_gt() {
        return Err(VMError::RuntimeError(format!(
            "clamp bounds out of order: {} > {}",
            lo, hi
        )));
    }
    Ok(if value.compare(lo)?.is_lt() {
        lo.clone()
    } else if value.compare(hi)?.is_gt() {
        hi.clone()
    } else {
        value.clone()
    })
}

fn native_pow(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
            let exp = u32::try_from(*exp).map_err(|_| VMError::IntegerOverflow)?;
            base.checked_pow(exp)
                .map(Value::Int)
                .ok_or(VMError::IntegerOverflow)
        }
        (base, exp) => Ok(Value::Float(base.as_float()?.powf(exp.as_float()?))),
    }
}

fn native_sqrt(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let n = args[0].as_float()?;
    if n < 0.0 {
        return Err(VMError::RuntimeError(format!(
            "square root of negative number {}",
            args[0]
        )));
    }
    Ok(Value::Float(n.sqrt()))
}

/// Float to Int after a rounding step
fn to_int(
    value: &Value,
    round: fn(f64) -> f64,
) -> VMResult<Value> {
    match value {
        Value::Int(n) => Ok(Value::Int(*n)),
        other => {
            let x = round(other.as_float()?);
            if x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64 {
                Ok(Value::Int(x as i64))
            } else {
                Err(VMError::IntegerOverflow)
            }
        }
    }
}

fn native_floor(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    to_int(&args[0], f64::floor)
}

fn native_ceil(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    to_int(&args[0], f64::ceil)
}

fn native_round(
    args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    to_int(&args[0], f64::round)
}

fn native_pi(
    _args: &[Value],
    _ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    Ok(Value::Float(std::f64::consts::PI))
}
