#![allow(dead_code, unused_imports)]

use std::path::PathBuf;

pub use ifpscc::{
    bytecode::{Container, Op},
    codegen,
    error::ErrorKind,
    ir::{Callee, Constant, Convention, Instruction, Operand, PackElement, PrimitiveType, Program},
    unit::{self, Options, OutputFormat, UnitError},
};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_source(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).expect("missing fixture")
}

/// Compila código fuente hasta IR, fallando el test con los diagnósticos.
pub fn compile(source: &str) -> Program {
    unit::compile_source(source, "test.c", &Options::default())
        .unwrap_or_else(|diagnostics| panic!("compilation failed:\n{}", diagnostics))
}

pub fn compile_fixture(name: &str) -> Program {
    compile(&fixture_source(name))
}

/// Emite y vuelve a leer el contenedor de un programa.
pub fn round_trip(program: &Program) -> Container {
    let mut bytes = Vec::new();
    codegen::emit(program, &mut bytes).expect("emission failed");
    Container::read(&bytes).expect("emitted container is unreadable")
}

/// Cuerpo de la función marcada como punto de entrada.
pub fn entry_body(program: &Program) -> &[Instruction] {
    let entry = program.entry.expect("program has no entry point");
    &program.functions[entry as usize].body
}

pub fn wide(string: &str) -> Constant {
    Constant::Wide(string.into())
}
