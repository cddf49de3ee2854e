use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Maps an instruction offset to the source line it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub start: u32,
    pub line: u32,
}

/// Static description of a compiled function body.
pub struct CodeObject {
    name: Arc<str>,
    qualname: Option<Arc<str>>,
    module: Arc<str>,
    arg_count: u16,
    first_line: u32,
    lines: Vec<LineEntry>,
    full_name: OnceCell<Arc<str>>,
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code {} at {}:{}>", self.name, self.module, self.first_line)
    }
}

impl CodeObject {
    pub fn new(module: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            qualname: None,
            module: module.into(),
            arg_count: 0,
            first_line: 0,
            lines: Vec::new(),
            full_name: OnceCell::new(),
        }
    }

    pub fn with_qualname(mut self, qualname: impl Into<Arc<str>>) -> Self {
        self.qualname = Some(qualname.into());
        self
    }

    pub fn with_arg_count(mut self, arg_count: u16) -> Self {
        self.arg_count = arg_count;
        self
    }

    pub fn with_first_line(mut self, line: u32) -> Self {
        self.first_line = line;
        self
    }

    /// Line table as `(start_offset, line)` pairs; sorted on insertion.
    pub fn with_lines(mut self, lines: &[(u32, u32)]) -> Self {
        self.lines = lines.iter().map(|&(start, line)| LineEntry { start, line }).collect();
        self.lines.sort_by_key(|entry| entry.start);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn qualname(&self) -> &Arc<str> {
        self.qualname.as_ref().unwrap_or(&self.name)
    }

    pub fn module(&self) -> &Arc<str> {
        &self.module
    }

    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// `module:qualname`, or `module:!name` when no qualified name was
    /// recorded. Computed once and shared afterwards.
    pub fn qualified_name(&self) -> &Arc<str> {
        self.full_name.get_or_init(|| match &self.qualname {
            Some(qualname) => format!("{}:{}", self.module, qualname).into(),
            None => format!("{}:!{}", self.module, self.name).into(),
        })
    }

    /// Source line for the last executed instruction.
    ///
    /// A negative offset means execution has not started; the definition line
    /// is reported then. `None` when the code carries no line information.
    pub fn line_for(&self, last_instr: isize) -> Option<u32> {
        if last_instr < 0 || self.lines.is_empty() {
            return (self.first_line > 0).then_some(self.first_line);
        }
        let offset = u32::try_from(last_instr).unwrap_or(u32::MAX);
        let idx = self.lines.partition_point(|entry| entry.start <= offset);
        match idx {
            0 => (self.first_line > 0).then_some(self.first_line),
            n => Some(self.lines[n - 1].line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_falls_back_to_bare_name() {
        let code = CodeObject::new("pkg.mod", "inner").with_qualname("Outer.inner");
        assert_eq!(&**code.qualified_name(), "pkg.mod:Outer.inner");

        let bare = CodeObject::new("pkg.mod", "lambda");
        assert_eq!(&**bare.qualified_name(), "pkg.mod:!lambda");
        assert_eq!(&**bare.qualname(), "lambda");
    }

    #[test]
    fn line_lookup_uses_last_entry_at_or_before_offset() {
        let code = CodeObject::new("m", "f")
            .with_first_line(10)
            .with_lines(&[(8, 12), (0, 11), (20, 15)]);
        assert_eq!(code.line_for(-1), Some(10));
        assert_eq!(code.line_for(0), Some(11));
        assert_eq!(code.line_for(7), Some(11));
        assert_eq!(code.line_for(8), Some(12));
        assert_eq!(code.line_for(100), Some(15));
    }

    #[test]
    fn missing_line_information_is_none() {
        let code = CodeObject::new("m", "f");
        assert_eq!(code.line_for(4), None);
        assert_eq!(code.line_for(-1), None);
    }
}
