//! Emisión de bytecode.
//!
//! Serializa un [`Program`] en el contenedor descrito por
//! [`crate::bytecode`]. Las etiquetas del IR se traducen a
//! desplazamientos absolutos dentro del código de cada función.

use std::{
    collections::HashMap,
    io::{self, Write},
};

use thiserror::Error;
use tracing::debug;

use crate::{
    bytecode::{self, opcode, operand},
    error::{Classify, ErrorKind},
    ir::{
        Callee, Constant, Function, Instruction, Label, Operand, ParameterType, Program, Signature,
    },
};

/// Límites de tamaño por tabla.
///
/// Los valores por omisión corresponden al ancho de los índices
/// de 16 bits que usan las instrucciones.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub constants: usize,
    pub imports: usize,
    pub intrinsics: usize,
    pub functions: usize,
}

impl Default for Limits {
    fn default() -> Self {
        let entries = 1 << 16;
        Limits {
            constants: entries,
            imports: entries,
            intrinsics: entries,
            functions: entries,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Too many {table}: {count} entries exceed the limit of {limit}")]
    ConstantPoolOverflow {
        table: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("Open array pack has {0} elements, the limit is {}", u16::MAX)]
    PackTooLarge(usize),

    #[error("`{name}` has {count} parameters, the limit is {}", u8::MAX)]
    TooManyParameters { name: String, count: usize },

    #[error("Function `{function}` jumps to unbound label {label}")]
    UnboundLabel { function: String, label: u32 },
}

impl Classify for EmitError {
    fn kind(&self) -> ErrorKind {
        match self {
            EmitError::ConstantPoolOverflow { .. } => ErrorKind::ConstantPoolOverflow,
            _ => ErrorKind::Semantic,
        }
    }
}

pub fn emit<W: Write>(program: &Program, output: &mut W) -> Result<(), EmitError> {
    emit_with(program, &Limits::default(), output)
}

/// Emite el contenedor completo.
///
/// El contenedor se construye en memoria y se escribe de una sola
/// vez, por lo cual un error nunca deja salida parcial en `output`.
pub fn emit_with<W: Write>(
    program: &Program,
    limits: &Limits,
    output: &mut W,
) -> Result<(), EmitError> {
    let tables = [
        ("constants", program.constants.len(), limits.constants),
        ("imports", program.imports.len(), limits.imports),
        ("intrinsics", program.intrinsics.len(), limits.intrinsics),
        ("functions", program.functions.len(), limits.functions),
    ];

    for (table, count, limit) in tables {
        if count > limit {
            return Err(EmitError::ConstantPoolOverflow { table, count, limit });
        }
    }

    debug!(
        constants = program.constants.len(),
        imports = program.imports.len(),
        intrinsics = program.intrinsics.len(),
        functions = program.functions.len(),
        "emitting container"
    );

    let mut out = Vec::new();
    out.extend_from_slice(bytecode::MAGIC);
    put_u32(&mut out, bytecode::VERSION);

    for (_, count, _) in tables {
        put_u32(&mut out, count as u32);
    }

    let entry = program.entry.map(|entry| entry as i32).unwrap_or(-1);
    out.extend_from_slice(&entry.to_le_bytes());

    for constant in &program.constants {
        match constant {
            Constant::Narrow(string) => {
                out.push(bytecode::NARROW_CONSTANT);
                put_str(&mut out, string);
            }

            Constant::Wide(string) => {
                let units: Vec<u16> = string.encode_utf16().collect();

                out.push(bytecode::WIDE_CONSTANT);
                put_u32(&mut out, units.len() as u32);
                for unit in units {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
        }
    }

    for import in &program.imports {
        put_str(&mut out, import.name.as_ref());
        put_str(&mut out, &import.library);
        put_str(&mut out, &import.export);
        out.push(bytecode::convention_code(import.convention));
        out.push(import.flags.bits());
        put_signature(&mut out, import.name.as_ref(), &import.signature)?;
    }

    for intrinsic in &program.intrinsics {
        out.extend_from_slice(&intrinsic.id.to_le_bytes());
        put_str(&mut out, intrinsic.name);
    }

    for function in &program.functions {
        let code = assemble(function)?;

        put_str(&mut out, function.name.as_ref());
        put_signature(&mut out, function.name.as_ref(), &function.signature)?;
        put_u32(&mut out, code.len() as u32);
        out.extend_from_slice(&code);
    }

    output.write_all(&out)?;
    output.flush()?;

    Ok(())
}

/// Codifica el cuerpo de una función y resuelve sus saltos.
fn assemble(function: &Function) -> Result<Vec<u8>, EmitError> {
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    let mut fixups = Vec::new();

    for instruction in &function.body {
        match instruction {
            Instruction::PushType(ty) => {
                code.push(opcode::PUSH_TYPE);
                code.push(bytecode::type_code(*ty));
            }

            Instruction::Push(value) => {
                code.push(opcode::PUSH);
                put_operand(&mut code, value);
            }

            Instruction::PushVar(value) => {
                code.push(opcode::PUSH_VAR);
                put_operand(&mut code, value);
            }

            Instruction::PushPack(elements) => {
                let count = u16::try_from(elements.len())
                    .map_err(|_| EmitError::PackTooLarge(elements.len()))?;

                code.push(opcode::PUSH_PACK);
                code.extend_from_slice(&count.to_le_bytes());

                for element in elements {
                    code.push(bytecode::type_code(element.tag));
                    put_operand(&mut code, &element.value);
                }
            }

            Instruction::Pop => code.push(opcode::POP),

            Instruction::Assign(into, value) => {
                code.push(opcode::ASSIGN);
                put_operand(&mut code, into);
                put_operand(&mut code, value);
            }

            Instruction::Compare { op, into, lhs, rhs } => {
                code.push(opcode::COMPARE);
                code.push(bytecode::comparison_code(*op));
                put_operand(&mut code, into);
                put_operand(&mut code, lhs);
                put_operand(&mut code, rhs);
            }

            Instruction::Calculate { op, into, value } => {
                code.push(opcode::CALCULATE);
                code.push(bytecode::arithmetic_code(*op));
                put_operand(&mut code, into);
                put_operand(&mut code, value);
            }

            Instruction::Neg(target) => {
                code.push(opcode::NEG);
                put_operand(&mut code, target);
            }

            Instruction::Not(target) => {
                code.push(opcode::NOT);
                put_operand(&mut code, target);
            }

            Instruction::Call(callee) => {
                let (kind, index) = match *callee {
                    Callee::Intrinsic(index) => (bytecode::callee::INTRINSIC, index),
                    Callee::Import(index) => (bytecode::callee::IMPORT, index),
                    Callee::Local(index) => (bytecode::callee::LOCAL, index),
                };

                code.push(opcode::CALL);
                code.push(kind);
                code.extend_from_slice(&(index as u16).to_le_bytes());
            }

            Instruction::SetLabel(Label(label)) => {
                labels.insert(*label, code.len() as u32);
            }

            Instruction::Jump(label) => {
                code.push(opcode::JUMP);
                fixups.push((code.len(), *label));
                put_u32(&mut code, 0);
            }

            Instruction::JumpIfZero(condition, label)
            | Instruction::JumpIfNonZero(condition, label) => {
                let opcode = match instruction {
                    Instruction::JumpIfZero(..) => opcode::JUMP_ZERO,
                    _ => opcode::JUMP_NONZERO,
                };

                code.push(opcode);
                put_operand(&mut code, condition);
                fixups.push((code.len(), *label));
                put_u32(&mut code, 0);
            }

            Instruction::Ret => code.push(opcode::RET),
        }
    }

    for (position, Label(label)) in fixups {
        let target = labels.get(&label).ok_or_else(|| EmitError::UnboundLabel {
            function: function.name.to_string(),
            label,
        })?;

        code[position..position + 4].copy_from_slice(&target.to_le_bytes());
    }

    Ok(code)
}

fn put_operand(out: &mut Vec<u8>, value: &Operand) {
    match value {
        Operand::Local(slot) => {
            out.push(operand::LOCAL);
            put_u32(out, *slot);
        }

        Operand::Argument(index) => {
            out.push(operand::ARGUMENT);
            put_u32(out, *index);
        }

        Operand::Result => out.push(operand::RESULT),

        Operand::Int { ty, value } => {
            out.push(operand::INT);
            out.push(bytecode::type_code(*ty));
            out.extend_from_slice(&value.to_le_bytes()[..ty.width()]);
        }

        Operand::Constant(index) => {
            out.push(operand::CONSTANT);
            out.extend_from_slice(&(*index as u16).to_le_bytes());
        }
    }
}

fn put_signature(out: &mut Vec<u8>, name: &str, signature: &Signature) -> Result<(), EmitError> {
    let count = signature.parameters.len();
    let count = u8::try_from(count).map_err(|_| EmitError::TooManyParameters {
        name: name.to_owned(),
        count,
    })?;

    out.push(signature.returns.map(bytecode::type_code).unwrap_or(bytecode::VOID));
    out.push(count);

    for parameter in &signature.parameters {
        out.push(match parameter {
            ParameterType::Value(ty) => bytecode::type_code(*ty),
            ParameterType::Open => bytecode::OPEN,
        });
    }

    Ok(())
}

fn put_str(out: &mut Vec<u8>, string: &str) {
    put_u32(out, string.len() as u32);
    out.extend_from_slice(string.as_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{Container, Op},
        ir::{
            Arithmetic, Comparison, Convention, Import, ImportFlags, Intrinsic, PackElement,
            PrimitiveType,
        },
        lex::Identifier,
    };

    fn function(name: &str, body: Vec<Instruction>) -> Function {
        Function {
            name: Identifier::new(name),
            signature: Signature {
                returns: Some(PrimitiveType::U8),
                parameters: vec![],
            },
            body,
        }
    }

    fn empty_program() -> Program {
        Program {
            constants: vec![],
            imports: vec![],
            intrinsics: vec![],
            functions: vec![],
            entry: None,
        }
    }

    fn emit_and_read(program: &Program) -> Container {
        let mut bytes = Vec::new();
        emit(program, &mut bytes).expect("emission failed");
        Container::read(&bytes).expect("read failed")
    }

    #[test]
    fn header_layout() {
        let mut bytes = Vec::new();
        emit(&empty_program(), &mut bytes).expect("emission failed");

        assert_eq!(&bytes[..4], b"IFCB");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..24], &[0; 16]);
        assert_eq!(&bytes[24..28], &(-1i32).to_le_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn tables_survive_emission() {
        let program = Program {
            constants: vec![Constant::Wide("héllo".into()), Constant::Narrow("plain".into())],
            imports: vec![Import {
                name: Identifier::new("ExitProcess"),
                library: "kernelbase.dll".into(),
                export: "ExitProcess".into(),
                convention: Convention::Stdcall,
                flags: ImportFlags::DELAY_LOAD,
                signature: Signature {
                    returns: None,
                    parameters: vec![ParameterType::Value(PrimitiveType::U32)],
                },
            }],
            intrinsics: vec![Intrinsic { id: 1, name: "Format" }],
            functions: vec![function("main", vec![Instruction::Ret])],
            entry: Some(0),
        };

        let container = emit_and_read(&program);
        assert_eq!(container.constants, program.constants);
        assert_eq!(container.imports[0].library.as_ref(), "kernelbase.dll");
        assert_eq!(container.imports[0].convention, Convention::Stdcall);
        assert_eq!(container.imports[0].flags, ImportFlags::DELAY_LOAD);
        assert_eq!(container.imports[0].signature, program.imports[0].signature);
        assert_eq!(container.intrinsics[0].name, "Format");
        assert_eq!(container.entry, Some(0));
        assert_eq!(container.functions[0].code, vec![(0, Op::Ret)]);
    }

    #[test]
    fn jumps_resolve_to_offsets() {
        let body = vec![
            Instruction::SetLabel(Label(0)),
            Instruction::PushType(PrimitiveType::Boolean),
            Instruction::Compare {
                op: Comparison::Eq,
                into: Operand::Local(0),
                lhs: Operand::Argument(0),
                rhs: Operand::Int {
                    ty: PrimitiveType::S32,
                    value: -1,
                },
            },
            Instruction::JumpIfZero(Operand::Local(0), Label(1)),
            Instruction::Pop,
            Instruction::Jump(Label(0)),
            Instruction::SetLabel(Label(1)),
            Instruction::Pop,
            Instruction::Ret,
        ];

        let mut program = empty_program();
        program.functions.push(function("loop", body));

        let code = &emit_and_read(&program).functions[0].code;

        // pushtype: 2, compare: 2 + 5 + 5 + 6, jz: 1 + 5 + 4, pop: 1, jump: 5
        assert_eq!(code[0], (0, Op::PushType(PrimitiveType::Boolean)));
        assert_eq!(code[2], (20, Op::JumpIfZero(Operand::Local(0), 36)));
        assert_eq!(code[4], (31, Op::Jump(0)));
        assert_eq!(code[5], (36, Op::Pop));
    }

    #[test]
    fn pack_elements_are_tagged() {
        let pack = vec![
            PackElement {
                tag: PrimitiveType::WideString,
                value: Operand::Constant(1),
            },
            PackElement {
                tag: PrimitiveType::S32,
                value: Operand::Int {
                    ty: PrimitiveType::S32,
                    value: 1337,
                },
            },
        ];

        let mut program = empty_program();
        program.functions.push(function(
            "f",
            vec![Instruction::PushPack(pack.clone()), Instruction::Pop, Instruction::Ret],
        ));

        let code = &emit_and_read(&program).functions[0].code;
        assert_eq!(code[0], (0, Op::PushPack(pack)));
    }

    #[test]
    fn table_limits() {
        let mut program = empty_program();
        program.constants = vec![Constant::Narrow("a".into()), Constant::Narrow("b".into())];

        let limits = Limits {
            constants: 1,
            ..Limits::default()
        };

        let mut bytes = Vec::new();
        let error = emit_with(&program, &limits, &mut bytes).expect_err("limit exceeded");

        assert!(matches!(
            error,
            EmitError::ConstantPoolOverflow {
                table: "constants",
                count: 2,
                limit: 1
            }
        ));

        assert_eq!(error.kind(), ErrorKind::ConstantPoolOverflow);
        assert!(bytes.is_empty());
    }

    #[test]
    fn arithmetic_and_conditional_jumps() {
        let slot = Operand::Local(0);
        let body = vec![
            Instruction::PushType(PrimitiveType::S32),
            Instruction::Calculate {
                op: Arithmetic::Shl,
                into: slot.clone(),
                value: Operand::Argument(0),
            },
            Instruction::Neg(slot.clone()),
            Instruction::Not(slot.clone()),
            Instruction::JumpIfNonZero(slot.clone(), Label(0)),
            Instruction::SetLabel(Label(0)),
            Instruction::Pop,
            Instruction::Ret,
        ];

        let mut program = empty_program();
        program.functions.push(function("f", body));

        let code = &emit_and_read(&program).functions[0].code;

        // pushtype: 2, calculate: 2 + 5 + 5, neg: 1 + 5, not: 1 + 5, jnz: 1 + 5 + 4
        assert_eq!(
            code[1],
            (
                2,
                Op::Calculate {
                    op: Arithmetic::Shl,
                    into: slot.clone(),
                    value: Operand::Argument(0),
                }
            )
        );

        assert_eq!(code[2], (14, Op::Neg(slot.clone())));
        assert_eq!(code[3], (20, Op::Not(slot.clone())));
        assert_eq!(code[4], (26, Op::JumpIfNonZero(slot, 36)));
        assert_eq!(code[5], (36, Op::Pop));
    }

    #[test]
    fn parameter_count_fits_in_a_byte() {
        let parameters = vec![ParameterType::Value(PrimitiveType::S32); 256];

        let mut program = empty_program();
        program.functions.push(Function {
            name: Identifier::new("wide"),
            signature: Signature {
                returns: None,
                parameters,
            },
            body: vec![Instruction::Ret],
        });

        let mut bytes = Vec::new();
        let error = emit(&program, &mut bytes).expect_err("256 parameters do not fit");

        assert!(matches!(
            &error,
            EmitError::TooManyParameters { name, count: 256 } if name == "wide"
        ));

        assert!(bytes.is_empty());

        // 255 todavía cabe y se lee de vuelta
        program.functions[0].signature.parameters.pop();
        let container = emit_and_read(&program);
        assert_eq!(container.functions[0].signature.parameters.len(), 255);
    }

    #[test]
    fn unbound_label() {
        let mut program = empty_program();
        program
            .functions
            .push(function("f", vec![Instruction::Jump(Label(9)), Instruction::Ret]));

        let error = emit(&program, &mut Vec::new()).expect_err("label 9 is never set");
        assert!(matches!(error, EmitError::UnboundLabel { label: 9, .. }));
    }
}
