mod common;

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use common::*;

const UNDECLARED: &str = r#"
typedef unsigned char u8;

u8 InitializeUninstall() {
    Undeclared(1);
    return 0;
}
"#;

fn ifpscc(directory: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ifpscc"))
        .args(args)
        .current_dir(directory)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ifpscc")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Directorio temporal con una entrada válida y una inválida.
fn workspace() -> tempfile::TempDir {
    let directory = tempfile::tempdir().unwrap();
    fs::copy(fixture("HelloWorld.c"), directory.path().join("good.c")).unwrap();
    fs::write(directory.path().join("bad.c"), UNDECLARED).unwrap();

    directory
}

#[test]
fn default_output_sits_next_to_the_input() {
    let directory = workspace();
    let output = ifpscc(directory.path(), &["good.c"]);

    assert!(output.status.success(), "{}", stderr(&output));

    let bytes = fs::read(directory.path().join("good.bin")).unwrap();
    assert_eq!(&bytes[..4], b"IFCB");
}

#[test]
fn failed_unit_does_not_stop_the_batch() {
    let directory = workspace();
    let output = ifpscc(directory.path(), &["good.c", "bad.c"]);

    assert!(!output.status.success());
    assert!(directory.path().join("good.bin").exists());
    assert!(!directory.path().join("bad.bin").exists());

    let stderr = stderr(&output);
    assert!(stderr.contains("semantic[UnresolvedCall]"), "{}", stderr);
    assert!(stderr.contains("1 of 2 units failed"), "{}", stderr);
}

#[test]
fn explicit_output_takes_a_single_input() {
    let directory = workspace();
    let output = ifpscc(directory.path(), &["-o", "out.bin", "good.c", "bad.c"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("-o cannot be used with several input files"));
    assert!(!directory.path().join("out.bin").exists());

    let output = ifpscc(directory.path(), &["-o", "out.bin", "good.c"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(directory.path().join("out.bin").exists());
}

#[test]
fn stdout_only_takes_listings() {
    let directory = workspace();

    let output = ifpscc(directory.path(), &["-o", "-", "good.c"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("Refusing to write bytecode to stdout"));

    let output = ifpscc(directory.path(), &["-A", "-o", "-", "good.c"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.starts_with(".version 1\n"));
    assert!(listing.contains("MsgBox"));
}
