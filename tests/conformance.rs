mod common;

use common::*;

#[test]
fn hello_world_uses_one_intrinsic_and_one_constant() {
    let program = compile_fixture("HelloWorld.c");

    let names: Vec<_> = program.intrinsics.iter().map(|intrinsic| intrinsic.name).collect();
    assert_eq!(names, vec!["MsgBox"]);
    assert_eq!(program.constants, vec![wide("Hello IFPS world!")]);
    assert!(program.imports.is_empty());

    let body = entry_body(&program);
    assert!(body.contains(&Instruction::Call(Callee::Intrinsic(0))));
    assert_eq!(body.last(), Some(&Instruction::Ret));
}

fn format_pack(program: &Program) -> Vec<PackElement> {
    let packs: Vec<_> = entry_body(program)
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::PushPack(elements) => Some(elements.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(packs.len(), 1, "expected exactly one pack");
    packs.into_iter().next().unwrap_or_default()
}

fn assert_world_1337(program: &Program) {
    let pack = format_pack(program);
    assert_eq!(pack.len(), 2);

    assert_eq!(pack[0].tag, PrimitiveType::WideString);
    match pack[0].value {
        Operand::Constant(index) => assert_eq!(program.constants[index as usize], wide("world")),
        ref other => panic!("expected a constant, found {:?}", other),
    }

    assert_eq!(pack[1].tag, PrimitiveType::S32);
    assert_eq!(
        pack[1].value,
        Operand::Int {
            ty: PrimitiveType::S32,
            value: 1337
        }
    );
}

#[test]
fn format_packs_a_variant_array() {
    let program = compile_fixture("Format.c");
    assert_world_1337(&program);

    let mut names: Vec<_> = program.intrinsics.iter().map(|intrinsic| intrinsic.name).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Format", "MsgBox"]);
}

#[test]
fn format_pack_does_not_depend_on_declaration_order() {
    let source = fixture_source("Format.c");

    let format = source
        .lines()
        .find(|line| line.contains("Format(PWSTR Format"))
        .expect("Format prototype")
        .to_owned();

    let msgbox = source
        .lines()
        .find(|line| line.contains("MsgBox(PWSTR Text"))
        .expect("MsgBox prototype")
        .to_owned();

    let swapped = source
        .replace(&format, "@FORMAT@")
        .replace(&msgbox, &format)
        .replace("@FORMAT@", &msgbox);

    assert_ne!(swapped, source);
    assert_world_1337(&compile(&swapped));
}

#[test]
fn dll_import_example_declares_exit_process() {
    let program = compile_fixture("DllImportExample.c");

    assert_eq!(program.imports.len(), 1);
    let import = &program.imports[0];
    assert_eq!(&*import.library, "kernelbase.dll");
    assert_eq!(&*import.export, "ExitProcess");
    assert_eq!(import.convention, Convention::Stdcall);

    let body = entry_body(&program);
    let call = body
        .iter()
        .position(|instruction| *instruction == Instruction::Call(Callee::Import(0)))
        .expect("no call to ExitProcess");

    let status = Instruction::Push(Operand::Int {
        ty: PrimitiveType::U32,
        value: 0xC000_0001,
    });

    assert_eq!(body[..call].iter().filter(|instruction| **instruction == status).count(), 1);
}

#[test]
fn fixtures_survive_emission() {
    for name in ["HelloWorld.c", "Format.c", "DllImportExample.c"] {
        let program = compile_fixture(name);
        let container = round_trip(&program);

        assert_eq!(container.constants, program.constants, "{}", name);
        assert_eq!(container.imports, program.imports, "{}", name);
        assert_eq!(container.functions.len(), program.functions.len(), "{}", name);

        let entry = container.entry.expect("entry point") as usize;
        assert_eq!(container.functions[entry].name, "InitializeUninstall");
        assert_eq!(container.functions[entry].code.last().map(|(_, op)| op), Some(&Op::Ret));
    }
}
