//! Standard library
//!
//! The reference set every compilation resolves against. It is fixed at
//! startup and never supplied by callers: `std.io`, `std.string`, `std.math`
//! and `std.list`, each a [`StdModule`] exporting native functions.
//!
//! Natives are the only way YX code reaches outside the VM, and none of them
//! touch files, the network, the environment or the process streams.

pub mod io;
pub mod list;
pub mod math;
pub mod string;

use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::runner::capture::OutputBuffer;
use crate::vm::heap::AllocMeter;
use crate::vm::{VMError, VMResult, Value};

/// Host services available to a native call
pub struct NativeContext<'a> {
    /// Output sink of the current execution
    pub output: &'a mut OutputBuffer,
    /// Allocation budget of the current execution
    pub heap: &'a mut AllocMeter,
}

impl NativeContext<'_> {
    /// Charge and wrap a freshly built string
    pub fn alloc_str(
        &mut self,
        text: String,
    ) -> VMResult<Value> {
        self.heap.charge(text.len())?;
        Ok(Value::string(text))
    }

    /// Append the display text of `value` to `out`, charged as it grows
    pub fn render_into(
        &self,
        out: &mut String,
        value: &Value,
    ) -> VMResult<()> {
        let limit = out.len().saturating_add(self.heap.remaining());
        value
            .write_bounded(out, limit)
            .map_err(|_| VMError::AllocationBudget(self.heap.limit()))
    }

    /// Charge and wrap a freshly built list
    pub fn alloc_list(
        &mut self,
        items: Vec<Value>,
    ) -> VMResult<Value> {
        self.heap
            .charge(items.len() * std::mem::size_of::<Value>())?;
        Ok(Value::list(items))
    }
}

/// Native function implementation
pub type NativeFn = fn(&[Value], &mut NativeContext<'_>) -> VMResult<Value>;

/// Accepted argument count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(
        &self,
        argc: usize,
    ) -> bool {
        match self {
            Arity::Exact(n) => *n == argc,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Variadic => write!(f, "any number of"),
        }
    }
}

/// A function exported from a std module
#[derive(Clone)]
pub struct NativeExport {
    /// Short name (e.g. "print")
    pub name: &'static str,
    /// Fully qualified name (e.g. "std.io.print")
    pub qualified_name: &'static str,
    /// Human readable signature
    pub signature: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

impl NativeExport {
    pub fn new(
        name: &'static str,
        qualified_name: &'static str,
        signature: &'static str,
        arity: Arity,
        func: NativeFn,
    ) -> Self {
        Self {
            name,
            qualified_name,
            signature,
            arity,
            func,
        }
    }

    /// Check the argument count, then run the native
    pub fn call(
        &self,
        args: &[Value],
        ctx: &mut NativeContext<'_>,
    ) -> VMResult<Value> {
        if let Arity::Exact(expected) = self.arity {
            if args.len() != expected {
                return Err(VMError::ArityMismatch {
                    callee: self.qualified_name.to_string(),
                    expected,
                    found: args.len(),
                });
            }
        }
        (self.func)(args, ctx)
    }
}

impl fmt::Debug for NativeExport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NativeExport")
            .field("qualified_name", &self.qualified_name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// A std module
pub trait StdModule: Send + Sync {
    /// Dotted module path (e.g. "std.io")
    fn module_path(&self) -> &'static str;

    /// Exported natives
    fn exports(&self) -> Vec<NativeExport>;

    /// Name the module is referred to by after `use` (last path segment)
    fn short_name(&self) -> &'static str {
        let path = self.module_path();
        path.rsplit('.').next().unwrap_or(path)
    }
}

/// Natives callable without a `use` and without qualification
const PRELUDE: &[&str] = &[
    "std.io.print",
    "std.io.println",
    "std.string.str",
    "std.list.len",
];

/// Static description of one module in the reference set
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub path: &'static str,
    pub short_name: &'static str,
    pub exports: IndexMap<&'static str, NativeExport>,
}

/// The fixed set of modules and natives available to YX code
#[derive(Debug)]
pub struct ReferenceSet {
    modules: IndexMap<&'static str, ModuleInfo>,
    natives: IndexMap<&'static str, NativeExport>,
    prelude: IndexMap<&'static str, &'static str>,
}

static STANDARD: Lazy<ReferenceSet> = Lazy::new(|| {
    ReferenceSet::from_modules(&[
        &io::IoModule,
        &string::StringModule,
        &math::MathModule,
        &list::ListModule,
    ])
});

impl ReferenceSet {
    /// The process-wide standard reference set
    pub fn standard() -> &'static ReferenceSet {
        &STANDARD
    }

    /// Build a reference set from module implementations
    pub fn from_modules(modules: &[&dyn StdModule]) -> Self {
        let mut set = ReferenceSet {
            modules: IndexMap::new(),
            natives: IndexMap::new(),
            prelude: IndexMap::new(),
        };

        for module in modules {
            let mut exports = IndexMap::new();
            for export in module.exports() {
                set.natives.insert(export.qualified_name, export.clone());
                exports.insert(export.name, export);
            }
            set.modules.insert(
                module.module_path(),
                ModuleInfo {
                    path: module.module_path(),
                    short_name: module.short_name(),
                    exports,
                },
            );
        }

        for qualified in PRELUDE {
            if let Some(export) = set.natives.get(qualified) {
                set.prelude.insert(export.name, export.qualified_name);
            }
        }

        set
    }

    /// Module by dotted path
    pub fn module(
        &self,
        path: &str,
    ) -> Option<&ModuleInfo> {
        self.modules.get(path)
    }

    /// Module by its short name (`math` for `std.math`)
    pub fn module_by_short_name(
        &self,
        short: &str,
    ) -> Option<&ModuleInfo> {
        self.modules.values().find(|m| m.short_name == short)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    /// Native by fully qualified name
    pub fn lookup(
        &self,
        qualified_name: &str,
    ) -> Option<&NativeExport> {
        self.natives.get(qualified_name)
    }

    /// Prelude native by short name
    pub fn prelude(
        &self,
        name: &str,
    ) -> Option<&NativeExport> {
        self.prelude
            .get(name)
            .and_then(|qualified| self.natives.get(qualified))
    }

    /// Built-in method for a receiver that has no declared method of that name
    ///
    /// The receiver is passed to the native as its first argument.
    pub fn builtin_method(
        &self,
        receiver: &Value,
        method: &str,
    ) -> Option<&NativeExport> {
        let qualified = match (receiver, method) {
            (Value::Str(_) | Value::List(_) | Value::Range(..), "len") => "std.list.len",
            (Value::List(_), "push") => "std.list.push",
            (Value::List(_), "pop") => "std.list.pop",
            (Value::List(_) | Value::Range(..), "contains") => "std.list.contains",
            (Value::Str(_), "contains") => "std.string.contains",
            (Value::Str(_), "upper") => "std.string.upper",
            (Value::Str(_), "lower") => "std.string.lower",
            (Value::Str(_), "trim") => "std.string.trim",
            _ => return None,
        };
        self.lookup(qualified)
    }
}
