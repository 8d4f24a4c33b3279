//! Standard IO library
//!
//! Printing only. Output goes to the execution's capture buffer; there is no
//! reading and no file access.

use crate::runner::capture::OutputBuffer;
use crate::std::{Arity, NativeContext, NativeExport, StdModule};
use crate::vm::{VMError, VMResult, Value};

/// IO module implementation.
#[derive(Debug, Default)]
pub struct IoModule;

impl StdModule for IoModule {
    fn module_path(&self) -> &'static str {
        "std.io"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new(
                "print",
                "std.io.print",
                "(...args) -> ()",
                Arity::Variadic,
                native_print,
            ),
            NativeExport::new(
                "println",
                "std.io.println",
                "(...args) -> ()",
                Arity::Variadic,
                native_println,
            ),
        ]
    }
}

/// Arguments rendered and separated by single spaces
///
/// Rendering stops at the output cap, so printing a value whose text is
/// huge fails fast instead of building the whole string first.
fn join_args(
    args: &[Value],
    output: &OutputBuffer,
) -> VMResult<String> {
    let limit = output.remaining();
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        arg.write_bounded(&mut line, limit)
            .map_err(|_| VMError::OutputLimit(output.limit()))?;
    }
    Ok(line)
}

/// Native implementation: print (without newline)
fn native_print(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let line = join_args(args, ctx.output)?;
    ctx.output.write_str(&line)?;
    Ok(Value::Unit)
}

/// Native implementation: println (with newline)
fn native_println(
    args: &[Value],
    ctx: &mut NativeContext<'_>,
) -> VMResult<Value> {
    let mut line = join_args(args, ctx.output)?;
    line.push('\n');
    ctx.output.write_str(&line)?;
    Ok(Value::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::heap::AllocMeter;

    #[test]
    fn test_print_and_println() {
        let mut output = OutputBuffer::new(64);
        let mut heap = AllocMeter::new(64);
        let mut ctx = NativeContext {
            output: &mut output,
            heap: &mut heap,
        };
        native_print(&[Value::string("a"), Value::Int(1)], &mut ctx).unwrap();
        native_println(&[Value::Bool(true)], &mut ctx).unwrap();
        native_println(&[], &mut ctx).unwrap();
        assert_eq!(output.as_str(), "a 1true\n\n");
    }

    #[test]
    fn test_output_limit_surfaces() {
        let mut output = OutputBuffer::new(3);
        let mut heap = AllocMeter::new(64);
        let mut ctx = NativeContext {
            output: &mut output,
            heap: &mut heap,
        };
        let err = native_println(&[Value::string("long")], &mut ctx).unwrap_err();
        assert_eq!(err, VMError::OutputLimit(3));
    }

    #[test]
    fn test_self_referencing_list_hits_output_limit() {
        let list = Value::list(vec![Value::Int(1)]);
        let items = list.as_list().unwrap();
        items.borrow_mut().push(list.clone());
        items.borrow_mut().push(list.clone());

        let mut output = OutputBuffer::new(1024);
        let mut heap = AllocMeter::new(1 << 20);
        let mut ctx = NativeContext {
            output: &mut output,
            heap: &mut heap,
        };
        let err = native_println(&[list.clone()], &mut ctx).unwrap_err();
        assert_eq!(err, VMError::OutputLimit(1024));
        assert!(output.is_empty());
    }
}
