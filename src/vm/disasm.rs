// 디스어셈블러 - 바이트코드 트리를 들여쓰기된 텍스트로 출력한다.

use std::fmt::{self, Write};

use super::bytecode::{AllocForm, BytecodeReader, Chunk, Opcode};
use super::strings::{StrId, StringPool};
use crate::types::TypeKind;

pub fn disassemble(bytes: &[u8], strings: &StringPool) -> String {
    let mut output = String::new();
    let mut d = Disassembler {
        strings,
        depth: 0,
    };
    let mut r = BytecodeReader::new(Chunk::new(bytes.to_vec()));
    let _ = d.program(&mut r, &mut output);
    output
}

struct Disassembler<'a> {
    strings: &'a StringPool,
    depth: usize,
}

impl Disassembler<'_> {
    fn program(&mut self, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        let file = r.str();
        writeln!(w, "=== {} ===", self.name(file))?;
        self.commands(r, w)
    }

    fn name(&self, id: StrId) -> &str {
        self.strings.resolve(id)
    }

    fn line(&self, w: &mut impl Write, pos: usize, text: &str) -> fmt::Result {
        writeln!(w, "{:06} {}{}", pos, "  ".repeat(self.depth), text)
    }

    /// `End`까지의 명령들
    fn commands(&mut self, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        while !r.at_end() {
            let pos = r.pos();
            let op = r.opcode();
            if op == Opcode::End {
                return Ok(());
            }
            let (row, col) = (r.i32(), r.i32());
            self.line(w, pos, &format!("{} ({}:{})", op, row, col))?;
            self.depth += 1;
            self.command_body(op, r, w)?;
            self.depth -= 1;
        }
        Ok(())
    }

    fn command_body(&mut self, op: Opcode, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        match op {
            Opcode::If => {
                self.expr(r, w)?;
                self.block(r, w, "then")?;
                if r.bool() {
                    self.block(r, w, "else")?;
                }
            }
            Opcode::While => {
                self.expr(r, w)?;
                self.block(r, w, "body")?;
            }
            Opcode::For => {
                self.expr(r, w)?;
                let name = r.str();
                self.line(w, r.pos(), &format!("var {}", self.name(name)))?;
                self.expr(r, w)?;
                self.flag(r, w, "excl")?;
                self.expr(r, w)?;
                self.flag(r, w, "excl")?;
                if r.bool() {
                    self.expr(r, w)?;
                }
                self.block(r, w, "body")?;
            }
            Opcode::Return => {
                if r.bool() {
                    self.expr(r, w)?;
                }
            }
            Opcode::Try => {
                self.block(r, w, "try")?;
                if r.bool() {
                    let silently = r.bool();
                    let bind = if r.bool() { Some(r.str()) } else { None };
                    let label = match bind {
                        Some(name) => format!("catch as {}", self.name(name)),
                        None if silently => "catch silently".to_string(),
                        None => "catch".to_string(),
                    };
                    self.block(r, w, &label)?;
                }
            }
            Opcode::Throw => {
                self.expr(r, w)?;
                if r.bool() {
                    let message = r.str();
                    self.line(w, r.pos(), &format!("as \"{}\"", self.name(message)))?;
                }
            }
            Opcode::Codeblock => self.block(r, w, "block")?,
            Opcode::Expr => self.expr(r, w)?,
            _ => {}
        }
        Ok(())
    }

    fn flag(&mut self, r: &mut BytecodeReader, w: &mut impl Write, label: &str) -> fmt::Result {
        let pos = r.pos();
        if r.bool() {
            self.line(w, pos, label)?;
        }
        Ok(())
    }

    /// 길이 접두 블록 (명령들)
    fn block(&mut self, r: &mut BytecodeReader, w: &mut impl Write, label: &str) -> fmt::Result {
        self.line(w, r.pos(), &format!("{}:", label))?;
        let mut inner = r.enter();
        self.depth += 1;
        self.commands(&mut inner, w)?;
        self.depth -= 1;
        Ok(())
    }

    /// 길이 접두 블록 (식 하나)
    fn pushed_expr(&mut self, r: &mut BytecodeReader, w: &mut impl Write, label: &str) -> fmt::Result {
        self.line(w, r.pos(), &format!("{}:", label))?;
        let mut inner = r.enter();
        self.depth += 1;
        self.expr(&mut inner, w)?;
        self.depth -= 1;
        Ok(())
    }

    /// `End`까지의 후위 표기 노드들
    fn expr(&mut self, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        loop {
            let pos = r.pos();
            let op = r.opcode();
            if op == Opcode::End || r.at_end() {
                return Ok(());
            }
            let (row, col) = (r.i32(), r.i32());
            let text = self.node_head(op, r);
            self.line(w, pos, &format!("{} ({}:{})", text, row, col))?;
            self.depth += 1;
            self.node_body(op, &text, r, w)?;
            self.depth -= 1;
        }
    }

    /// 노드 이름과 한 줄로 보일 수 있는 피연산자
    fn node_head(&mut self, op: Opcode, r: &mut BytecodeReader) -> String {
        match op {
            Opcode::Integer => format!("Integer {}", r.u64()),
            Opcode::Float => format!("Float {}", r.f64()),
            Opcode::String => {
                let id = r.str();
                format!("String \"{}\"", self.name(id).escape_default())
            }
            Opcode::Variable | Opcode::Defer | Opcode::Include => {
                let id = r.str();
                format!("{} {}", op, self.name(id))
            }
            Opcode::Truthy => format!("Truthy {}", r.bool()),
            Opcode::WalkStruct => {
                let id = r.str();
                format!("WalkStruct .{}", self.name(id))
            }
            Opcode::Type => {
                let is_const = r.bool();
                let prefix = if is_const { "const " } else { "" };
                match TypeKind::from_repr(r.u8()) {
                    Some(TypeKind::Struct) => format!("Type {}struct", prefix),
                    Some(kind) => {
                        let sign = if r.bool() { "unsigned " } else { "" };
                        format!("Type {}{}{}", prefix, sign, kind)
                    }
                    None => format!("Type {}?", prefix),
                }
            }
            Opcode::Decl => {
                let is_extern = r.bool();
                let name = r.str();
                let prefix = if is_extern { "extern " } else { "" };
                format!("Decl {}{}", prefix, self.name(name))
            }
            Opcode::New => {
                let scoped = r.bool();
                format!("New{}", if scoped { " scoped" } else { "" })
            }
            _ => op.to_string(),
        }
    }

    fn node_body(&mut self, op: Opcode, text: &str, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        match op {
            Opcode::Type if text.ends_with("struct") => self.struct_body(r, w)?,
            Opcode::Paren | Opcode::Varargs | Opcode::Typeof | Opcode::Delete | Opcode::Array => {
                self.expr(r, w)?
            }
            Opcode::Sizeof => {
                if r.bool() {
                    self.line(w, r.pos(), "...")?;
                } else {
                    self.expr(r, w)?;
                }
            }
            Opcode::Scopeof => {
                if r.bool() {
                    let name = r.str();
                    self.line(w, r.pos(), self.name(name))?;
                }
            }
            Opcode::Move => {
                self.expr(r, w)?;
                self.expr(r, w)?;
            }
            Opcode::Ternary => {
                self.expr(r, w)?;
                self.pushed_expr(r, w, "then")?;
                self.pushed_expr(r, w, "else")?;
            }
            Opcode::Call => {
                let mut index = 0;
                while !r.at_end() && self.has_more(r) {
                    self.line(w, r.pos(), &format!("arg {}:", index))?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                    index += 1;
                }
                r.u8();
            }
            Opcode::Function => {
                if r.bool() {
                    self.line(w, r.pos(), "assignable")?;
                }
                while !r.at_end() && self.has_more(r) {
                    self.line(w, r.pos(), "param:")?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                    if r.bool() {
                        let name = r.str();
                        self.line(w, r.pos(), self.name(name))?;
                    }
                }
                r.u8();
            }
            Opcode::Decl => {
                while r.bool() {
                    let name = r.str();
                    self.line(w, r.pos(), &format!("generic {}:", self.name(name)))?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                }
                if r.bool() {
                    let capture = r.capture_mode();
                    self.block(r, w, &format!("body [{}]", capture))?;
                }
            }
            Opcode::New => self.new_body(r, w)?,
            _ => {}
        }
        Ok(())
    }

    /// 다음 노드가 `End`가 아니면 true
    fn has_more(&self, r: &BytecodeReader) -> bool {
        let mut ahead = r.clone();
        ahead.opcode() != Opcode::End
    }

    /// `struct [: Base] { ... }` 본문
    fn struct_body(&mut self, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        if r.bool() {
            self.line(w, r.pos(), "base:")?;
            self.depth += 1;
            self.expr(r, w)?;
            self.depth -= 1;
        }
        while r.bool() {
            let (row, col) = (r.i32(), r.i32());
            let pos = r.pos();
            let inline = if r.bool() {
                if r.bool() {
                    self.line(w, pos, &format!("inline field ({}:{}) count:", row, col))?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                } else {
                    self.line(w, pos, &format!("inline field ({}:{})", row, col))?;
                }
                true
            } else {
                false
            };
            if !inline {
                self.line(w, pos, &format!("field ({}:{})", row, col))?;
            }
            self.depth += 1;
            self.expr(r, w)?;
            if r.bool() {
                let name = r.str();
                self.line(w, r.pos(), &format!("name {}", self.name(name)))?;
            }
            if r.bool() {
                if r.bool() {
                    let capture = r.capture_mode();
                    self.block(r, w, &format!("body [{}]", capture))?;
                } else {
                    self.line(w, r.pos(), "default:")?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                }
            }
            if r.bool() {
                let label = if r.bool() { "offset +@" } else { "offset @" };
                self.line(w, r.pos(), label)?;
                self.depth += 1;
                self.expr(r, w)?;
                self.depth -= 1;
            }
            self.depth -= 1;
        }
        Ok(())
    }

    fn new_body(&mut self, r: &mut BytecodeReader, w: &mut impl Write) -> fmt::Result {
        self.expr(r, w)?;
        let form = r.alloc_form();
        self.line(w, r.pos(), &format!("form {}", form))?;
        match form {
            AllocForm::None => {}
            AllocForm::Scalar => self.expr(r, w)?,
            AllocForm::Array => {
                self.expr(r, w)?;
                while !r.at_end() && self.has_more(r) {
                    self.line(w, r.pos(), "element:")?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                }
                r.u8();
            }
            AllocForm::Function => {
                let capture = r.capture_mode();
                self.block(r, w, &format!("body [{}]", capture))?;
            }
            AllocForm::Struct => {
                while r.bool() {
                    let name = r.str();
                    self.line(w, r.pos(), &format!(".{} =", self.name(name)))?;
                    self.depth += 1;
                    self.expr(r, w)?;
                    self.depth -= 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn test_disassemble_lists_nodes() {
        let mut strings = StringPool::new();
        let bytes = parser::compile("s32 x = 1 + 2;", "main.paw", &mut strings).unwrap();
        let text = disassemble(&bytes, &strings);
        assert!(text.starts_with("=== main.paw ==="));
        assert!(text.contains("Decl x"));
        assert!(text.contains("Integer 1"));
        assert!(text.contains("Addition"));
    }

    #[test]
    fn test_disassemble_struct_type() {
        let mut strings = StringPool::new();
        let source = "type P = struct { s32 x = 4; s32 y; };";
        let bytes = parser::compile(source, "main.paw", &mut strings).unwrap();
        let text = disassemble(&bytes, &strings);
        assert!(text.contains("Type struct"));
        assert!(text.contains("name x"));
        assert!(text.contains("default:"));
        assert!(text.contains("Integer 4"));
    }
}
