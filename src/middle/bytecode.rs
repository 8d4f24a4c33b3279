//! Bytecode definitions
//!
//! A stack machine. Every method owns a frame of `locals` slots (parameters
//! first, `self` in slot 0 for instance methods) and an operand stack.
//!
//! Opcode space:
//! - 0x00-0x0F: constants, locals, stack
//! - 0x10-0x1F: arithmetic, comparison, logic
//! - 0x20-0x2F: control flow
//! - 0x30-0x3F: calls
//! - 0x40-0x4F: objects and lists
//! - 0x50-0x5F: iteration
//! - 0x60-0x6F: exits

use std::fmt;

/// Name of the implicit type holding top-level functions
pub const MODULE_TYPE: &str = "<module>";

/// Operation code, the first byte of every encoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// 操作数：const_idx (u32)
    Const = 0x00,
    Unit = 0x01,
    True = 0x02,
    False = 0x03,
    /// 操作数：slot (u16)
    Load = 0x04,
    /// 操作数：slot (u16)
    Store = 0x05,
    Pop = 0x06,
    Dup = 0x07,

    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Rem = 0x14,
    Eq = 0x15,
    Ne = 0x16,
    Lt = 0x17,
    Le = 0x18,
    Gt = 0x19,
    Ge = 0x1A,
    MakeRange = 0x1B,
    Neg = 0x1C,
    Not = 0x1D,

    /// 操作数：target (u32，绝对指令下标)
    Jump = 0x20,
    JumpIfFalse = 0x21,
    JumpIfTrue = 0x22,

    /// 操作数：type_idx (u16), method_idx (u16), argc (u8)
    CallStatic = 0x30,
    /// 操作数：import_idx (u16), argc (u8)
    CallNative = 0x31,
    /// 操作数：name const_idx (u32), argc (u8)
    CallMethod = 0x32,

    /// 操作数：type_idx (u16)
    NewStruct = 0x40,
    /// 操作数：name const_idx (u32)
    GetField = 0x41,
    /// 操作数：name const_idx (u32)
    SetField = 0x42,
    /// 操作数：count (u32)
    NewList = 0x43,
    Index = 0x44,
    SetIndex = 0x45,

    /// 操作数：slot (u16)
    IterStart = 0x50,
    /// 操作数：slot (u16), exit (u32)
    IterNext = 0x51,

    Return = 0x60,
    Throw = 0x61,
}

impl Opcode {
    /// Mnemonic used by the disassembler
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Const => "CONST",
            Opcode::Unit => "UNIT",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Rem => "REM",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::MakeRange => "RANGE",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::Jump => "JMP",
            Opcode::JumpIfFalse => "JMP_IF_NOT",
            Opcode::JumpIfTrue => "JMP_IF",
            Opcode::CallStatic => "CALL_STATIC",
            Opcode::CallNative => "CALL_NATIVE",
            Opcode::CallMethod => "CALL_METHOD",
            Opcode::NewStruct => "NEW_STRUCT",
            Opcode::GetField => "GET_FIELD",
            Opcode::SetField => "SET_FIELD",
            Opcode::NewList => "NEW_LIST",
            Opcode::Index => "INDEX",
            Opcode::SetIndex => "SET_INDEX",
            Opcode::IterStart => "ITER_START",
            Opcode::IterNext => "ITER_NEXT",
            Opcode::Return => "RET",
            Opcode::Throw => "THROW",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let op = match byte {
            0x00 => Opcode::Const,
            0x01 => Opcode::Unit,
            0x02 => Opcode::True,
            0x03 => Opcode::False,
            0x04 => Opcode::Load,
            0x05 => Opcode::Store,
            0x06 => Opcode::Pop,
            0x07 => Opcode::Dup,
            0x10 => Opcode::Add,
            0x11 => Opcode::Sub,
            0x12 => Opcode::Mul,
            0x13 => Opcode::Div,
            0x14 => Opcode::Rem,
            0x15 => Opcode::Eq,
            0x16 => Opcode::Ne,
            0x17 => Opcode::Lt,
            0x18 => Opcode::Le,
            0x19 => Opcode::Gt,
            0x1A => Opcode::Ge,
            0x1B => Opcode::MakeRange,
            0x1C => Opcode::Neg,
            0x1D => Opcode::Not,
            0x20 => Opcode::Jump,
            0x21 => Opcode::JumpIfFalse,
            0x22 => Opcode::JumpIfTrue,
            0x30 => Opcode::CallStatic,
            0x31 => Opcode::CallNative,
            0x32 => Opcode::CallMethod,
            0x40 => Opcode::NewStruct,
            0x41 => Opcode::GetField,
            0x42 => Opcode::SetField,
            0x43 => Opcode::NewList,
            0x44 => Opcode::Index,
            0x45 => Opcode::SetIndex,
            0x50 => Opcode::IterStart,
            0x51 => Opcode::IterNext,
            0x60 => Opcode::Return,
            0x61 => Opcode::Throw,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Const(u32),
    Unit,
    True,
    False,
    Load(u16),
    Store(u16),
    Pop,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    MakeRange,
    Neg,
    Not,
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    CallStatic {
        type_idx: u16,
        method_idx: u16,
        argc: u8,
    },
    CallNative {
        import: u16,
        argc: u8,
    },
    CallMethod {
        name: u32,
        argc: u8,
    },
    NewStruct(u16),
    GetField(u32),
    SetField(u32),
    NewList(u32),
    Index,
    SetIndex,
    /// Pop an iterable; cursor state lives in `slot` and `slot + 1`
    IterStart(u16),
    /// Push the next element, or jump to `exit` when exhausted
    IterNext {
        slot: u16,
        exit: u32,
    },
    Return,
    Throw,
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Const(_) => Opcode::Const,
            Instr::Unit => Opcode::Unit,
            Instr::True => Opcode::True,
            Instr::False => Opcode::False,
            Instr::Load(_) => Opcode::Load,
            Instr::Store(_) => Opcode::Store,
            Instr::Pop => Opcode::Pop,
            Instr::Dup => Opcode::Dup,
            Instr::Add => Opcode::Add,
            Instr::Sub => Opcode::Sub,
            Instr::Mul => Opcode::Mul,
            Instr::Div => Opcode::Div,
            Instr::Rem => Opcode::Rem,
            Instr::Eq => Opcode::Eq,
            Instr::Ne => Opcode::Ne,
            Instr::Lt => Opcode::Lt,
            Instr::Le => Opcode::Le,
            Instr::Gt => Opcode::Gt,
            Instr::Ge => Opcode::Ge,
            Instr::MakeRange => Opcode::MakeRange,
            Instr::Neg => Opcode::Neg,
            Instr::Not => Opcode::Not,
            Instr::Jump(_) => Opcode::Jump,
            Instr::JumpIfFalse(_) => Opcode::JumpIfFalse,
            Instr::JumpIfTrue(_) => Opcode::JumpIfTrue,
            Instr::CallStatic { .. } => Opcode::CallStatic,
            Instr::CallNative { .. } => Opcode::CallNative,
            Instr::CallMethod { .. } => Opcode::CallMethod,
            Instr::NewStruct(_) => Opcode::NewStruct,
            Instr::GetField(_) => Opcode::GetField,
            Instr::SetField(_) => Opcode::SetField,
            Instr::NewList(_) => Opcode::NewList,
            Instr::Index => Opcode::Index,
            Instr::SetIndex => Opcode::SetIndex,
            Instr::IterStart(_) => Opcode::IterStart,
            Instr::IterNext { .. } => Opcode::IterNext,
            Instr::Return => Opcode::Return,
            Instr::Throw => Opcode::Throw,
        }
    }

    /// Append the encoding (opcode byte, then little-endian operands)
    pub fn encode(
        &self,
        out: &mut Vec<u8>,
    ) {
        out.push(self.opcode() as u8);
        match *self {
            Instr::Const(idx)
            | Instr::Jump(idx)
            | Instr::JumpIfFalse(idx)
            | Instr::JumpIfTrue(idx)
            | Instr::GetField(idx)
            | Instr::SetField(idx)
            | Instr::NewList(idx) => out.extend_from_slice(&idx.to_le_bytes()),
            Instr::Load(slot) | Instr::Store(slot) | Instr::IterStart(slot) | Instr::NewStruct(slot) => {
                out.extend_from_slice(&slot.to_le_bytes())
            }
            Instr::CallStatic {
                type_idx,
                method_idx,
                argc,
            } => {
                out.extend_from_slice(&type_idx.to_le_bytes());
                out.extend_from_slice(&method_idx.to_le_bytes());
                out.push(argc);
            }
            Instr::CallNative { import, argc } => {
                out.extend_from_slice(&import.to_le_bytes());
                out.push(argc);
            }
            Instr::CallMethod { name, argc } => {
                out.extend_from_slice(&name.to_le_bytes());
                out.push(argc);
            }
            Instr::IterNext { slot, exit } => {
                out.extend_from_slice(&slot.to_le_bytes());
                out.extend_from_slice(&exit.to_le_bytes());
            }
            _ => {}
        }
    }

    /// Jump target, for instructions that have one
    pub fn jump_target(&self) -> Option<u32> {
        match *self {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => Some(t),
            Instr::IterNext { exit, .. } => Some(exit),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = self.opcode().name();
        match *self {
            Instr::Const(idx) => write!(f, "{} #{}", name, idx),
            Instr::Load(slot) | Instr::Store(slot) | Instr::IterStart(slot) => {
                write!(f, "{} ${}", name, slot)
            }
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => {
                write!(f, "{} @{}", name, t)
            }
            Instr::CallStatic {
                type_idx,
                method_idx,
                argc,
            } => write!(f, "{} type={} method={} argc={}", name, type_idx, method_idx, argc),
            Instr::CallNative { import, argc } => {
                write!(f, "{} import={} argc={}", name, import, argc)
            }
            Instr::CallMethod { name: n, argc } => write!(f, "{} #{} argc={}", name, n, argc),
            Instr::NewStruct(ty) => write!(f, "{} type={}", name, ty),
            Instr::GetField(n) | Instr::SetField(n) => write!(f, "{} #{}", name, n),
            Instr::NewList(count) => write!(f, "{} {}", name, count),
            Instr::IterNext { slot, exit } => write!(f, "{} ${} @{}", name, slot, exit),
            _ => f.write_str(name),
        }
    }
}

/// Constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "int {}", n),
            Constant::Float(x) => write!(f, "float {}", x),
            Constant::Str(s) => write!(f, "str {:?}", s),
        }
    }
}

/// Method code and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub is_pub: bool,
    pub is_static: bool,
    /// Declared parameters, not counting `self`
    pub arity: u8,
    /// Frame size: `self`, parameters, then locals and hidden temporaries
    pub locals: u16,
    pub code: Vec<Instr>,
}

impl MethodDef {
    /// `pub`, static, no parameters, named `Main`
    pub fn is_entry_point(&self) -> bool {
        self.name == "Main" && self.is_pub && self.is_static && self.arity == 0
    }

    /// Slots occupied by incoming arguments (including `self`)
    pub fn param_slots(&self) -> usize {
        self.arity as usize + usize::from(!self.is_static)
    }
}

/// A declared type (or the implicit module type at index 0)
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<String>,
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    pub fn method_index(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

/// Everything an image holds, in decoded form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub constants: Vec<Constant>,
    /// Qualified names of the natives this module calls
    pub imports: Vec<String>,
    pub types: Vec<TypeDef>,
}

impl Module {
    /// Entry points as (type index, method index), in image order
    pub fn entry_points(&self) -> Vec<(usize, usize)> {
        self.types
            .iter()
            .enumerate()
            .flat_map(|(ti, ty)| {
                ty.methods
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.is_entry_point())
                    .map(move |(mi, _)| (ti, mi))
            })
            .collect()
    }

    /// Constant as a string, if it is one
    pub fn const_str(
        &self,
        idx: u32,
    ) -> Option<&str> {
        match self.constants.get(idx as usize) {
            Some(Constant::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// Disassembly, as printed by `yxplay dump`
impl fmt::Display for Module {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "constants ({}):", self.constants.len())?;
        for (i, c) in self.constants.iter().enumerate() {
            writeln!(f, "  #{:<4} {}", i, c)?;
        }
        writeln!(f, "imports ({}):", self.imports.len())?;
        for (i, name) in self.imports.iter().enumerate() {
            writeln!(f, "  {:<5} {}", i, name)?;
        }
        writeln!(f, "types ({}):", self.types.len())?;
        for (ti, ty) in self.types.iter().enumerate() {
            writeln!(f, "  [{}] {} {{ {} }}", ti, ty.name, ty.fields.join(", "))?;
            for (mi, m) in ty.methods.iter().enumerate() {
                writeln!(
                    f,
                    "    [{}] {}{}{}/{} locals={}{}",
                    mi,
                    if m.is_pub { "pub " } else { "" },
                    if m.is_static { "" } else { "self." },
                    m.name,
                    m.arity,
                    m.locals,
                    if m.is_entry_point() { " (entry)" } else { "" },
                )?;
                for (pc, instr) in m.code.iter().enumerate() {
                    writeln!(f, "      {:04} {}", pc, instr)?;
                }
            }
        }
        Ok(())
    }
}
