/// Indentation-aware text sink for one emitted file.
///
/// Each file gets its own writer, so indentation state never leaks between files.
pub struct SourceWriter {
    indent: String,
    output: String,
    indent_level: usize,
}

impl SourceWriter {
    pub fn new(indent: &str) -> Self {
        Self {
            indent: indent.into(),
            output: String::new(),
            indent_level: 0,
        }
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    pub fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.output.push_str(&self.indent);
        }
    }

    pub fn writeln(&mut self, text: &str) {
        self.write_indent();
        self.output.push_str(text);
        self.output.push('\n');
    }

    pub fn newline(&mut self) {
        self.output.push('\n');
    }

    pub fn raw(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn finish(self) -> String {
        self.output
    }
}

/// Escape text for a C++ narrow string literal.
pub fn escape_cpp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() || !c.is_ascii() => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\x{:02x}\"\"", byte));
                }
            }
            c => out.push(c),
        }
    }
    out
}
