//! Binary image format
//!
//! Layout (magic big-endian for easy identification in hex dumps, everything
//! else little-endian):
//!
//! ```text
//! u32  magic   0x59584243 ("YXBC")
//! u16  version
//! u16  flags   (reserved, 0)
//! u32  constant count, then per constant: u8 tag, payload
//! u32  import count, then per import: str
//! u32  type count, then per type:
//!        str name, u16 field count, str*, u16 method count, then per method:
//!        str name, u8 flags (1 = pub, 2 = static), u8 arity, u16 locals,
//!        u32 instruction count, encoded instructions
//! str  = u32 byte length + UTF-8 bytes
//! ```

use std::io::{self, Write};

use thiserror::Error;

use crate::middle::bytecode::{Constant, Instr, MethodDef, Module, Opcode, TypeDef, MODULE_TYPE};
use crate::util::diagnostic::Diagnostics;

/// Image magic (YaoXiang ByteCode: YXBC)
pub const MAGIC: u32 = 0x59584243;
/// Image format version
pub const VERSION: u16 = 1;

const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;

const FLAG_PUB: u8 = 1;
const FLAG_STATIC: u8 = 2;

/// Compiler output: image bytes plus the warnings of a successful compile
#[derive(Debug, Clone)]
pub struct CompiledImage {
    bytes: Vec<u8>,
    warnings: Diagnostics,
}

impl CompiledImage {
    pub fn new(
        bytes: Vec<u8>,
        warnings: Diagnostics,
    ) -> Self {
        Self { bytes, warnings }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn warnings(&self) -> &Diagnostics {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode and verify the image
    pub fn decode(&self) -> Result<Module, ImageError> {
        let module = Module::read_from(&self.bytes)?;
        module.verify()?;
        Ok(module)
    }
}

/// Image decoding and verification failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImageError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported image version {0}")]
    UnsupportedVersion(u16),

    #[error("image truncated at byte {0}")]
    Truncated(usize),

    #[error("{0} trailing bytes after image")]
    TrailingBytes(usize),

    #[error("invalid opcode {byte:#04x} at byte {offset}")]
    InvalidOpcode { byte: u8, offset: usize },

    #[error("invalid constant tag {0}")]
    InvalidConstantTag(u8),

    #[error("invalid UTF-8 string at byte {0}")]
    InvalidUtf8(usize),

    #[error("first type must be `{}`", MODULE_TYPE)]
    MissingModuleType,

    #[error("{location}: {message}")]
    Invalid { location: String, message: String },

    #[error("unknown native `{0}`")]
    UnknownNative(String),
}

// ============================================================================
// Encoding
// ============================================================================

fn write_str<W: Write>(
    writer: &mut W,
    s: &str,
) -> io::Result<()> {
    writer.write_all(&(s.len() as u32).to_le_bytes())?;
    writer.write_all(s.as_bytes())
}

impl Module {
    /// Serialize to a writer
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
    ) -> io::Result<()> {
        // 文件头：魔数大端序，其他小端序
        writer.write_all(&MAGIC.to_be_bytes())?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u16.to_le_bytes())?;

        writer.write_all(&(self.constants.len() as u32).to_le_bytes())?;
        for constant in &self.constants {
            match constant {
                Constant::Int(n) => {
                    writer.write_all(&[TAG_INT])?;
                    writer.write_all(&n.to_le_bytes())?;
                }
                Constant::Float(x) => {
                    writer.write_all(&[TAG_FLOAT])?;
                    writer.write_all(&x.to_le_bytes())?;
                }
                Constant::Str(s) => {
                    writer.write_all(&[TAG_STR])?;
                    write_str(writer, s)?;
                }
            }
        }

        writer.write_all(&(self.imports.len() as u32).to_le_bytes())?;
        for import in &self.imports {
            write_str(writer, import)?;
        }

        writer.write_all(&(self.types.len() as u32).to_le_bytes())?;
        let mut code = Vec::new();
        for ty in &self.types {
            write_str(writer, &ty.name)?;
            writer.write_all(&(ty.fields.len() as u16).to_le_bytes())?;
            for field in &ty.fields {
                write_str(writer, field)?;
            }
            writer.write_all(&(ty.methods.len() as u16).to_le_bytes())?;
            for method in &ty.methods {
                write_str(writer, &method.name)?;
                let mut flags = 0u8;
                if method.is_pub {
                    flags |= FLAG_PUB;
                }
                if method.is_static {
                    flags |= FLAG_STATIC;
                }
                writer.write_all(&[flags, method.arity])?;
                writer.write_all(&method.locals.to_le_bytes())?;
                writer.write_all(&(method.code.len() as u32).to_le_bytes())?;
                code.clear();
                for instr in &method.code {
                    instr.encode(&mut code);
                }
                writer.write_all(&code)?;
            }
        }

        Ok(())
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut bytes);
        bytes
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Bounds-checked little-endian cursor
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(
        &mut self,
        n: usize,
    ) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ImageError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ImageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, ImageError> {
        let len = self.u32()? as usize;
        let at = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ImageError::InvalidUtf8(at))
    }

    /// Element count, capped by the bytes left so corrupt counts fail fast
    fn count(
        &mut self,
        min_item_size: usize,
    ) -> Result<usize, ImageError> {
        let n = self.u32()? as usize;
        let remaining = self.bytes.len() - self.pos;
        if n.saturating_mul(min_item_size) > remaining {
            return Err(ImageError::Truncated(self.pos));
        }
        Ok(n)
    }

    fn instr(&mut self) -> Result<Instr, ImageError> {
        let offset = self.pos;
        let byte = self.u8()?;
        let op = Opcode::try_from(byte).map_err(|byte| ImageError::InvalidOpcode { byte, offset })?;
        let instr = match op {
            Opcode::Const => Instr::Const(self.u32()?),
            Opcode::Unit => Instr::Unit,
            Opcode::True => Instr::True,
            Opcode::False => Instr::False,
            Opcode::Load => Instr::Load(self.u16()?),
            Opcode::Store => Instr::Store(self.u16()?),
            Opcode::Pop => Instr::Pop,
            Opcode::Dup => Instr::Dup,
            Opcode::Add => Instr::Add,
            Opcode::Sub => Instr::Sub,
            Opcode::Mul => Instr::Mul,
            Opcode::Div => Instr::Div,
            Opcode::Rem => Instr::Rem,
            Opcode::Eq => Instr::Eq,
            Opcode::Ne => Instr::Ne,
            Opcode::Lt => Instr::Lt,
            Opcode::Le => Instr::Le,
            Opcode::Gt => Instr::Gt,
            Opcode::Ge => Instr::Ge,
            Opcode::MakeRange => Instr::MakeRange,
            Opcode::Neg => Instr::Neg,
            Opcode::Not => Instr::Not,
            Opcode::Jump => Instr::Jump(self.u32()?),
            Opcode::JumpIfFalse => Instr::JumpIfFalse(self.u32()?),
            Opcode::JumpIfTrue => Instr::JumpIfTrue(self.u32()?),
            Opcode::CallStatic => Instr::CallStatic {
                type_idx: self.u16()?,
                method_idx: self.u16()?,
                argc: self.u8()?,
            },
            Opcode::CallNative => Instr::CallNative {
                import: self.u16()?,
                argc: self.u8()?,
            },
            Opcode::CallMethod => Instr::CallMethod {
                name: self.u32()?,
                argc: self.u8()?,
            },
            Opcode::NewStruct => Instr::NewStruct(self.u16()?),
            Opcode::GetField => Instr::GetField(self.u32()?),
            Opcode::SetField => Instr::SetField(self.u32()?),
            Opcode::NewList => Instr::NewList(self.u32()?),
            Opcode::Index => Instr::Index,
            Opcode::SetIndex => Instr::SetIndex,
            Opcode::IterStart => Instr::IterStart(self.u16()?),
            Opcode::IterNext => Instr::IterNext {
                slot: self.u16()?,
                exit: self.u32()?,
            },
            Opcode::Return => Instr::Return,
            Opcode::Throw => Instr::Throw,
        };
        Ok(instr)
    }
}

impl Module {
    /// Decode image bytes (structure only; see [`Module::verify`])
    pub fn read_from(bytes: &[u8]) -> Result<Module, ImageError> {
        let mut r = Reader::new(bytes);

        let magic = u32::from_be_bytes(r.array()?);
        if magic != MAGIC {
            return Err(ImageError::BadMagic(magic));
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let _flags = r.u16()?;

        let n = r.count(2)?;
        let mut constants = Vec::with_capacity(n);
        for _ in 0..n {
            let constant = match r.u8()? {
                TAG_INT => Constant::Int(i64::from_le_bytes(r.array()?)),
                TAG_FLOAT => Constant::Float(f64::from_le_bytes(r.array()?)),
                TAG_STR => Constant::Str(r.string()?),
                tag => return Err(ImageError::InvalidConstantTag(tag)),
            };
            constants.push(constant);
        }

        let n = r.count(4)?;
        let mut imports = Vec::with_capacity(n);
        for _ in 0..n {
            imports.push(r.string()?);
        }

        let n = r.count(8)?;
        let mut types = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r.string()?;
            let field_count = r.u16()?;
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                fields.push(r.string()?);
            }
            let method_count = r.u16()?;
            let mut methods = Vec::with_capacity(method_count as usize);
            for _ in 0..method_count {
                let name = r.string()?;
                let flags = r.u8()?;
                let arity = r.u8()?;
                let locals = r.u16()?;
                let code_len = r.count(1)?;
                let mut code = Vec::with_capacity(code_len);
                for _ in 0..code_len {
                    code.push(r.instr()?);
                }
                methods.push(MethodDef {
                    name,
                    is_pub: flags & FLAG_PUB != 0,
                    is_static: flags & FLAG_STATIC != 0,
                    arity,
                    locals,
                    code,
                });
            }
            types.push(TypeDef {
                name,
                fields,
                methods,
            });
        }

        if r.pos != bytes.len() {
            return Err(ImageError::TrailingBytes(bytes.len() - r.pos));
        }

        Ok(Module {
            constants,
            imports,
            types,
        })
    }

    /// Check every index an instruction carries
    ///
    /// A verified module never makes the VM index out of its tables.
    pub fn verify(&self) -> Result<(), ImageError> {
        match self.types.first() {
            Some(ty) if ty.name == MODULE_TYPE => {}
            _ => return Err(ImageError::MissingModuleType),
        }

        for ty in &self.types {
            for method in &ty.methods {
                let location = format!("{}.{}", ty.name, method.name);
                let invalid = |message: String| ImageError::Invalid {
                    location: location.clone(),
                    message,
                };

                if (method.locals as usize) < method.param_slots() {
                    return Err(invalid(format!(
                        "{} locals cannot hold {} parameters",
                        method.locals,
                        method.param_slots()
                    )));
                }

                for (pc, instr) in method.code.iter().enumerate() {
                    self.verify_instr(method, instr)
                        .map_err(|message| invalid(format!("instruction {}: {}", pc, message)))?;
                }
            }
        }
        Ok(())
    }

    fn verify_instr(
        &self,
        method: &MethodDef,
        instr: &Instr,
    ) -> Result<(), String> {
        let locals = method.locals as usize;
        let check_slot = |slot: usize| {
            if slot < locals {
                Ok(())
            } else {
                Err(format!("slot {} out of {} locals", slot, locals))
            }
        };
        let check_name = |idx: u32| {
            self.const_str(idx)
                .map(|_| ())
                .ok_or_else(|| format!("constant #{} is not a name", idx))
        };

        if let Some(target) = instr.jump_target() {
            if target as usize > method.code.len() {
                return Err(format!("jump target {} out of range", target));
            }
        }

        match *instr {
            Instr::Const(idx) if idx as usize >= self.constants.len() => {
                Err(format!("constant #{} out of range", idx))
            }
            Instr::Load(slot) | Instr::Store(slot) => check_slot(slot as usize),
            Instr::IterStart(slot) | Instr::IterNext { slot, .. } => {
                check_slot(slot as usize + 1)
            }
            Instr::GetField(idx) | Instr::SetField(idx) | Instr::CallMethod { name: idx, .. } => {
                check_name(idx)
            }
            Instr::CallNative { import, .. } if import as usize >= self.imports.len() => {
                Err(format!("import {} out of range", import))
            }
            Instr::NewStruct(ty) if ty == 0 || ty as usize >= self.types.len() => {
                Err(format!("type {} cannot be instantiated", ty))
            }
            Instr::CallStatic {
                type_idx,
                method_idx,
                argc,
            } => {
                let target = self
                    .types
                    .get(type_idx as usize)
                    .and_then(|t| t.methods.get(method_idx as usize))
                    .ok_or_else(|| format!("method {}:{} out of range", type_idx, method_idx))?;
                if !target.is_static || target.arity != argc {
                    return Err(format!(
                        "static call to `{}` with {} arguments",
                        target.name, argc
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        Module {
            constants: vec![
                Constant::Int(-7),
                Constant::Float(1.5),
                Constant::Str("héllo".to_string()),
            ],
            imports: vec!["std.io.println".to_string()],
            types: vec![
                TypeDef {
                    name: MODULE_TYPE.to_string(),
                    fields: vec![],
                    methods: vec![MethodDef {
                        name: "Main".to_string(),
                        is_pub: true,
                        is_static: true,
                        arity: 0,
                        locals: 2,
                        code: vec![
                            Instr::Const(2),
                            Instr::CallNative { import: 0, argc: 1 },
                            Instr::Pop,
                            Instr::IterNext { slot: 0, exit: 4 },
                            Instr::Unit,
                            Instr::Return,
                        ],
                    }],
                },
                TypeDef {
                    name: "Point".to_string(),
                    fields: vec!["x".to_string(), "y".to_string()],
                    methods: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let module = sample();
        let bytes = module.to_bytes();
        assert_eq!(&bytes[..4], b"YXBC");
        let decoded = Module::read_from(&bytes).unwrap();
        assert_eq!(decoded, module);
        decoded.verify().unwrap();
    }

    #[test]
    fn test_bad_header() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'Z';
        assert!(matches!(
            Module::read_from(&bytes),
            Err(ImageError::BadMagic(_))
        ));

        let mut bytes = sample().to_bytes();
        bytes[4] = 9;
        assert_eq!(
            Module::read_from(&bytes),
            Err(ImageError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_every_truncation_is_an_error() {
        let bytes = sample().to_bytes();
        for len in 0..bytes.len() {
            assert!(Module::read_from(&bytes[..len]).is_err(), "prefix {}", len);
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(
            Module::read_from(&longer),
            Err(ImageError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_verify_rejects_bad_indices() {
        let mut module = sample();
        module.types[0].methods[0].code[0] = Instr::Const(99);
        assert!(matches!(module.verify(), Err(ImageError::Invalid { .. })));

        let mut module = sample();
        module.types[0].methods[0].code[1] = Instr::CallNative { import: 3, argc: 1 };
        assert!(module.verify().is_err());

        let mut module = sample();
        module.types[0].methods[0].code[0] = Instr::GetField(0);
        assert!(module.verify().is_err(), "int constant used as a name");

        let mut module = sample();
        module.types.swap(0, 1);
        assert_eq!(module.verify(), Err(ImageError::MissingModuleType));
    }

    #[test]
    fn test_huge_counts_fail_without_allocating() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Module::read_from(&bytes),
            Err(ImageError::Truncated(_))
        ));
    }
}
