/// Escribe una línea de listado: desplazamiento, mnemónico y operandos.
macro_rules! emit {
    ($output:expr, $offset:expr, $mnemonic:expr) => {
        writeln!($output, "{:>6x}:\t{}", $offset, $mnemonic)
    };

    ($output:expr, $offset:expr, $mnemonic:expr, $($format:tt)*) => {{
        write!($output, "{:>6x}:\t{:10}", $offset, $mnemonic)?;
        writeln!($output, $($format)*)
    }};
}
