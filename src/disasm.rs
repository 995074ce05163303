//! Desensamblado de contenedores.
//!
//! Produce un listado textual de un [`Container`]: encabezado,
//! tablas y el código de cada función con sus desplazamientos.

use std::{
    fmt::{self, Display},
    io::{self, Write},
};

use crate::{
    bytecode::{Container, FunctionEntry, Op},
    ir::{
        Arithmetic, Callee, Comparison, Constant, ImportFlags, Operand, ParameterType, Signature,
    },
};

pub fn disassemble<W: Write>(container: &Container, output: &mut W) -> io::Result<()> {
    writeln!(output, ".version {}", container.version)?;

    let entry = container
        .entry
        .and_then(|entry| container.functions.get(entry as usize));

    match entry {
        Some(function) => writeln!(output, ".entry {}", function.name)?,
        None => writeln!(output, ".entry none")?,
    }

    if !container.constants.is_empty() {
        writeln!(output, "\n.constants")?;
        for (index, constant) in container.constants.iter().enumerate() {
            match constant {
                Constant::Narrow(string) => writeln!(output, "\t#{}\t{:?}", index, string)?,
                Constant::Wide(string) => writeln!(output, "\t#{}\tL{:?}", index, string)?,
            }
        }
    }

    if !container.imports.is_empty() {
        writeln!(output, "\n.imports")?;
        for (index, import) in container.imports.iter().enumerate() {
            write!(
                output,
                "\t#{}\t{} = {}!{} {}",
                index, import.name, import.library, import.export, import.convention
            )?;

            if import.flags.contains(ImportFlags::DELAY_LOAD) {
                write!(output, " delayload")?;
            }

            if import.flags.contains(ImportFlags::ALTERED_SEARCH_PATH) {
                write!(output, " alteredsearchpath")?;
            }

            writeln!(output, " {}", Prototype(&import.signature))?;
        }
    }

    if !container.intrinsics.is_empty() {
        writeln!(output, "\n.intrinsics")?;
        for (index, intrinsic) in container.intrinsics.iter().enumerate() {
            writeln!(output, "\t#{}\t{} (id {})", index, intrinsic.name, intrinsic.id)?;
        }
    }

    for function in &container.functions {
        writeln!(output)?;
        listing(container, function, output)?;
    }

    Ok(())
}

fn listing<W: Write>(
    container: &Container,
    function: &FunctionEntry,
    output: &mut W,
) -> io::Result<()> {
    writeln!(output, ".function {}{}", function.name, Prototype(&function.signature))?;

    for (offset, op) in &function.code {
        let offset = *offset;

        match op {
            Op::PushType(ty) => emit!(output, offset, "pushtype", "{}", ty)?,
            Op::Push(value) => emit!(output, offset, "push", "{}", Show(container, value))?,
            Op::PushVar(value) => emit!(output, offset, "pushvar", "{}", Show(container, value))?,

            Op::PushPack(elements) => {
                write!(output, "{:>6x}:\t{:10}{{", offset, "pushpack")?;
                for (index, element) in elements.iter().enumerate() {
                    let separator = if index == 0 { " " } else { ", " };
                    let value = Show(container, &element.value);
                    write!(output, "{}{}: {}", separator, element.tag, value)?;
                }

                writeln!(output, " }}")?;
            }

            Op::Pop => emit!(output, offset, "pop")?,

            Op::Assign(into, value) => emit!(
                output,
                offset,
                "assign",
                "{}, {}",
                Show(container, into),
                Show(container, value)
            )?,

            Op::Compare { op, into, lhs, rhs } => {
                let mnemonic = match op {
                    Comparison::Ge => "cmp.ge",
                    Comparison::Le => "cmp.le",
                    Comparison::Gt => "cmp.gt",
                    Comparison::Lt => "cmp.lt",
                    Comparison::Ne => "cmp.ne",
                    Comparison::Eq => "cmp.eq",
                };

                emit!(
                    output,
                    offset,
                    mnemonic,
                    "{}, {}, {}",
                    Show(container, into),
                    Show(container, lhs),
                    Show(container, rhs)
                )?
            }

            Op::Calculate { op, into, value } => {
                let mnemonic = match op {
                    Arithmetic::Add => "add",
                    Arithmetic::Sub => "sub",
                    Arithmetic::Mul => "mul",
                    Arithmetic::Div => "div",
                    Arithmetic::Mod => "mod",
                    Arithmetic::Shl => "shl",
                    Arithmetic::Shr => "shr",
                    Arithmetic::And => "and",
                    Arithmetic::Or => "or",
                    Arithmetic::Xor => "xor",
                };

                emit!(
                    output,
                    offset,
                    mnemonic,
                    "{}, {}",
                    Show(container, into),
                    Show(container, value)
                )?
            }

            Op::Neg(target) => emit!(output, offset, "neg", "{}", Show(container, target))?,
            Op::Not(target) => emit!(output, offset, "not", "{}", Show(container, target))?,

            Op::Call(callee) => {
                let (kind, index, name) = match *callee {
                    Callee::Intrinsic(index) => (
                        "intrinsic",
                        index,
                        container.intrinsics.get(index as usize).map(|entry| entry.name.clone()),
                    ),

                    Callee::Import(index) => (
                        "import",
                        index,
                        container.imports.get(index as usize).map(|entry| entry.name.to_string()),
                    ),

                    Callee::Local(index) => (
                        "local",
                        index,
                        container.functions.get(index as usize).map(|entry| entry.name.clone()),
                    ),
                };

                let name = name.unwrap_or_else(|| String::from("?"));
                emit!(output, offset, "call", "{}[{}] ; {}", kind, index, name)?
            }

            Op::Jump(target) => emit!(output, offset, "jump", "{:#x}", target)?,

            Op::JumpIfZero(condition, target) => {
                emit!(output, offset, "jz", "{}, {:#x}", Show(container, condition), target)?
            }

            Op::JumpIfNonZero(condition, target) => {
                emit!(output, offset, "jnz", "{}, {:#x}", Show(container, condition), target)?
            }

            Op::Ret => emit!(output, offset, "ret")?,
        }
    }

    Ok(())
}

/// Firma con la sintaxis `(params) -> retorno`.
struct Prototype<'a>(&'a Signature);

impl Display for Prototype<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Prototype(signature) = self;

        fmt.write_str("(")?;
        for (index, parameter) in signature.parameters.iter().enumerate() {
            if index > 0 {
                fmt.write_str(", ")?;
            }

            match parameter {
                ParameterType::Value(ty) => write!(fmt, "{}", ty)?,
                ParameterType::Open => fmt.write_str("open")?,
            }
        }

        match signature.returns {
            Some(ty) => write!(fmt, ") -> {}", ty),
            None => fmt.write_str(") -> void"),
        }
    }
}

/// Operando junto al contenedor, para mostrar constantes en línea.
struct Show<'a>(&'a Container, &'a Operand);

impl Display for Show<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Show(container, operand) = self;

        match operand {
            Operand::Local(slot) => write!(fmt, "local[{}]", slot),
            Operand::Argument(index) => write!(fmt, "arg[{}]", index),
            Operand::Result => fmt.write_str("result"),
            Operand::Int { ty, value } => write!(fmt, "{} {}", ty, value),

            Operand::Constant(index) => match container.constants.get(*index as usize) {
                Some(Constant::Narrow(string)) => write!(fmt, "const[{}] {:?}", index, string),
                Some(Constant::Wide(string)) => write!(fmt, "const[{}] L{:?}", index, string),
                None => write!(fmt, "const[{}]", index),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen,
        ir::{Function, Instruction, Intrinsic, Label, PrimitiveType, Program},
        lex::Identifier,
    };

    fn render(program: &Program) -> String {
        let mut bytes = Vec::new();
        codegen::emit(program, &mut bytes).expect("emission failed");

        let container = Container::read(&bytes).expect("read failed");
        let mut text = Vec::new();
        disassemble(&container, &mut text).expect("disassembly failed");

        String::from_utf8(text).expect("listing is UTF-8")
    }

    #[test]
    fn listing_of_a_call() {
        let program = Program {
            constants: vec![Constant::Wide("Hi".into())],
            imports: vec![],
            intrinsics: vec![Intrinsic { id: 0, name: "MsgBox" }],
            functions: vec![Function {
                name: Identifier::new("InitializeUninstall"),
                signature: Signature {
                    returns: Some(PrimitiveType::U8),
                    parameters: vec![],
                },
                body: vec![
                    Instruction::PushType(PrimitiveType::S32),
                    Instruction::Push(Operand::Constant(0)),
                    Instruction::PushVar(Operand::Local(0)),
                    Instruction::Call(Callee::Intrinsic(0)),
                    Instruction::Ret,
                ],
            }],
            entry: Some(0),
        };

        let listing = render(&program);

        assert!(listing.starts_with(".version 1\n.entry InitializeUninstall\n"));
        assert!(listing.contains("\t#0\tL\"Hi\"\n"));
        assert!(listing.contains("\t#0\tMsgBox (id 0)\n"));
        assert!(listing.contains(".function InitializeUninstall() -> u8\n"));
        assert!(listing.contains("     0:\tpushtype  s32\n"));
        assert!(listing.contains("push      const[0] L\"Hi\"\n"));
        assert!(listing.contains("call      intrinsic[0] ; MsgBox\n"));
        assert!(listing.trim_end().ends_with("ret"));
    }

    #[test]
    fn listing_of_arithmetic() {
        let slot = Operand::Local(0);
        let program = Program {
            constants: vec![],
            imports: vec![],
            intrinsics: vec![],
            functions: vec![Function {
                name: Identifier::new("f"),
                signature: Signature {
                    returns: None,
                    parameters: vec![ParameterType::Value(PrimitiveType::S32)],
                },
                body: vec![
                    Instruction::PushType(PrimitiveType::S32),
                    Instruction::Calculate {
                        op: Arithmetic::Mod,
                        into: slot.clone(),
                        value: Operand::Argument(0),
                    },
                    Instruction::Neg(slot.clone()),
                    Instruction::JumpIfNonZero(slot, Label(0)),
                    Instruction::SetLabel(Label(0)),
                    Instruction::Pop,
                    Instruction::Ret,
                ],
            }],
            entry: None,
        };

        let listing = render(&program);

        assert!(listing.contains(".function f(s32) -> void\n"));
        assert!(listing.contains("mod       local[0], arg[0]\n"));
        assert!(listing.contains("neg       local[0]\n"));
        assert!(listing.contains("jnz       local[0], 0x1e\n"));
    }

    #[test]
    fn empty_container_listing() {
        let program = Program {
            constants: vec![],
            imports: vec![],
            intrinsics: vec![],
            functions: vec![],
            entry: None,
        };

        assert_eq!(render(&program), ".version 1\n.entry none\n");
    }
}
