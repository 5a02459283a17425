//! Assembly text accumulator.

/// Collects emitted assembly, one line at a time.
///
/// With `debug` set, every line is echoed to stderr as it is emitted, which
/// makes it possible to see how far code generation got before a fatal
/// error threw the buffer away.
#[derive(Debug, Default)]
pub struct AsmOutput {
    pub buf: String,
    debug: bool,
}

impl AsmOutput {
    pub fn new(debug: bool) -> Self {
        Self { buf: String::new(), debug }
    }

    pub fn emit(&mut self, line: &str) {
        if self.debug {
            eprintln!("{}", line);
        }
        self.buf.push_str(line);
        self.buf.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_lines() {
        let mut out = AsmOutput::new(false);
        out.emit("    .text");
        out.emit("f:");
        assert_eq!(out.buf, "    .text\nf:\n");
    }
}
