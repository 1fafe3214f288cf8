use super::{ParseResult, Parser};
use crate::lexer::{Lexeme, Token};
use crate::types::TypeKind;
use crate::vm::bytecode::{AllocForm, BytecodeWriter, CaptureMode, Opcode};
use crate::vm::strings::StrId;

fn prefix_operator(token: &Token) -> Option<Opcode> {
    let op = match token {
        Token::PlusPlus => Opcode::PrefixIncrement,
        Token::MinusMinus => Opcode::PrefixDecrement,
        Token::Dollar => Opcode::Address,
        Token::Hash => Opcode::Dereference,
        Token::Plus => Opcode::ArithPlus,
        Token::Minus => Opcode::ArithNegate,
        Token::Bang => Opcode::LogicNegate,
        Token::Tilde => Opcode::BinaryNegate,
        _ => return None,
    };
    Some(op)
}

/// Base type keyword -> (kind, unsigned).
fn base_type(token: &Token) -> Option<(TypeKind, bool)> {
    let base = match token {
        Token::S8 => (TypeKind::Int8, false),
        Token::S16 => (TypeKind::Int16, false),
        Token::S32 => (TypeKind::Int32, false),
        Token::S64 => (TypeKind::Int64, false),
        Token::U8 | Token::Bool => (TypeKind::Int8, true),
        Token::U16 => (TypeKind::Int16, true),
        Token::U32 => (TypeKind::Int32, true),
        Token::U64 => (TypeKind::Int64, true),
        Token::F32 => (TypeKind::Float32, false),
        Token::F64 => (TypeKind::Float64, false),
        Token::Void => (TypeKind::Void, false),
        Token::Type => (TypeKind::Type, false),
        _ => return None,
    };
    Some(base)
}

impl Parser<'_> {
    /// Prefix chain, primary operand, suffix chain. Prefix nodes are written
    /// after the operand, innermost first.
    pub(super) fn parse_operand(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        let mut prefixes = Vec::new();
        while let Some(op) = prefix_operator(&self.peek().token) {
            let tok = self.pop();
            let mut prefix = BytecodeWriter::new();
            prefix.op(op, tok.row, tok.col);
            prefixes.push(prefix);
        }
        self.parse_primary(buf)?;
        self.parse_suffixes(buf)?;
        while let Some(prefix) = prefixes.pop() {
            buf.merge(prefix);
        }
        Ok(())
    }

    fn parse_parenthesized(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        self.require(&Token::LParen, "Expected '('")?;
        self.parse_expression(buf, false)?;
        self.require(&Token::RParen, "Expected ')'")?;
        Ok(())
    }

    fn parse_primary(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        let tok = self.peek();
        match &tok.token {
            Token::Integer(value) => {
                self.pop();
                buf.op(Opcode::Integer, tok.row, tok.col).u64(*value);
            }
            Token::Float(value) => {
                self.pop();
                buf.op(Opcode::Float, tok.row, tok.col).f64(*value);
            }
            Token::String(text) => {
                let id = self.strings.intern(text);
                self.pop();
                buf.op(Opcode::String, tok.row, tok.col).str(id);
            }
            Token::Identifier(name) => {
                let id = self.strings.intern(name);
                self.pop();
                buf.op(Opcode::Variable, tok.row, tok.col).str(id);
            }
            Token::This => {
                self.pop();
                buf.op(Opcode::Variable, tok.row, tok.col).str(StrId::THIS);
            }
            Token::True | Token::False => {
                self.pop();
                buf.op(Opcode::Truthy, tok.row, tok.col)
                    .bool(tok.token == Token::True);
            }
            Token::Null => {
                self.pop();
                buf.op(Opcode::Null, tok.row, tok.col);
            }
            Token::LParen => {
                self.pop();
                buf.op(Opcode::Paren, tok.row, tok.col);
                self.parse_expression(buf, false)?;
                self.require(&Token::RParen, "Expected ')'")?;
            }
            Token::Defer => {
                self.pop();
                buf.op(Opcode::Defer, tok.row, tok.col);
                self.require(&Token::LParen, "Expected '('")?;
                let name = self.require_identifier()?;
                buf.str(name);
                self.require(&Token::RParen, "Expected ')'")?;
            }
            Token::Ellipsis => {
                self.pop();
                buf.op(Opcode::Varargs, tok.row, tok.col);
                self.require(&Token::LBracket, "Expected '['")?;
                self.parse_expression(buf, false)?;
                self.require(&Token::RBracket, "Expected ']'")?;
            }
            Token::Sizeof => {
                self.pop();
                buf.op(Opcode::Sizeof, tok.row, tok.col);
                self.require(&Token::LParen, "Expected '('")?;
                if self.expect(&Token::Ellipsis).is_some() {
                    buf.bool(true);
                } else {
                    buf.bool(false);
                    self.parse_expression(buf, false)?;
                }
                self.require(&Token::RParen, "Expected ')'")?;
            }
            Token::Typeof => {
                self.pop();
                buf.op(Opcode::Typeof, tok.row, tok.col);
                self.parse_parenthesized(buf)?;
            }
            Token::Delete => {
                self.pop();
                buf.op(Opcode::Delete, tok.row, tok.col);
                self.parse_parenthesized(buf)?;
            }
            Token::Scopeof => {
                self.pop();
                buf.op(Opcode::Scopeof, tok.row, tok.col);
                self.require(&Token::LParen, "Expected '('")?;
                if self.expect(&Token::This).is_some() {
                    buf.bool(false);
                } else {
                    let name = self.require_identifier()?;
                    buf.bool(true).str(name);
                }
                self.require(&Token::RParen, "Expected ')'")?;
            }
            Token::New => {
                self.pop();
                self.parse_new(buf, &tok)?;
            }
            Token::Move => {
                self.pop();
                buf.op(Opcode::Move, tok.row, tok.col);
                self.parse_parenthesized(buf)?;
                self.require(&Token::EqualsArrow, "Expected '=>'")?;
                self.require(&Token::LBracket, "Expected '['")?;
                self.parse_expression(buf, false)?;
                self.require(&Token::RBracket, "Expected ']'")?;
            }
            Token::If => {
                self.pop();
                buf.op(Opcode::Ternary, tok.row, tok.col);
                self.parse_expression(buf, false)?;
                self.require(&Token::EqualsArrow, "Expected '=>'")?;
                self.require(&Token::LBracket, "Expected '['")?;
                buf.push();
                self.parse_expression(buf, false)?;
                buf.pop();
                self.require(&Token::Semicolon, "Expected ';'")?;
                buf.push();
                self.parse_expression(buf, false)?;
                buf.pop();
                self.require(&Token::RBracket, "Expected ']'")?;
            }
            Token::Include => {
                self.pop();
                buf.op(Opcode::Include, tok.row, tok.col);
                let Some((path, _)) = self.expect_string() else {
                    return self.fail("Expected a string literal");
                };
                buf.str(path);
            }
            _ => self.parse_type_literal(buf, &tok)?,
        }
        Ok(())
    }

    /// `new [scoped] [T]` followed by one of the allocation forms.
    fn parse_new(&mut self, buf: &mut BytecodeWriter, tok: &Lexeme) -> ParseResult<()> {
        buf.op(Opcode::New, tok.row, tok.col);
        buf.bool(self.expect(&Token::Scoped).is_some());
        self.require(&Token::LBracket, "Expected '['")?;
        self.parse_expression(buf, false)?;
        self.require(&Token::RBracket, "Expected ']'")?;

        if self.expect(&Token::LParen).is_some() {
            buf.u8(AllocForm::Array as u8);
            self.parse_expression(buf, false)?;
            self.require(&Token::RParen, "Expected ')'")?;
            if self.expect(&Token::LBrace).is_some() {
                while self.expect(&Token::RBrace).is_none() {
                    self.parse_expression(buf, false)?;
                    if self.expect(&Token::RBrace).is_some() {
                        break;
                    }
                    if self.expect(&Token::Comma).is_some() {
                        continue;
                    }
                    return self.fail("Expected ',' or '}'");
                }
            }
            buf.end();
            return Ok(());
        }

        if self.expect(&Token::EqualsArrow).is_some() {
            buf.u8(AllocForm::Function as u8);
            let capture = self.parse_capture_mode()?;
            buf.u8(capture as u8);
            self.require(&Token::LBrace, "Expected '{'")?;
            buf.push();
            while self.expect(&Token::RBrace).is_none() {
                if self.at_eof() {
                    return self.fail("Expected '}'");
                }
                self.parse_command(buf)?;
            }
            buf.end();
            buf.pop();
            return Ok(());
        }

        if self.expect(&Token::LBrace).is_none() {
            buf.u8(AllocForm::None as u8);
            return Ok(());
        }
        if self.expect(&Token::RBrace).is_some() {
            buf.u8(AllocForm::None as u8);
            return Ok(());
        }
        if self.expect(&Token::Dot).is_none() {
            buf.u8(AllocForm::Scalar as u8);
            self.parse_expression(buf, false)?;
            self.require(&Token::RBrace, "Expected '}'")?;
            return Ok(());
        }

        buf.u8(AllocForm::Struct as u8);
        loop {
            buf.bool(true);
            let name = self.require_identifier()?;
            buf.str(name);
            self.require(&Token::Equal, "Expected '='")?;
            self.parse_expression(buf, false)?;
            if self.expect(&Token::Comma).is_some() {
                if self.expect(&Token::RBrace).is_some() {
                    break;
                }
                if self.expect(&Token::Dot).is_some() {
                    continue;
                }
                return self.fail("Expected '.'");
            }
            if self.expect(&Token::RBrace).is_some() {
                break;
            }
            return self.fail("Expected ',' or '}'");
        }
        buf.bool(false);
        Ok(())
    }

    /// `[const] base` where base is a primitive keyword or a struct literal.
    fn parse_type_literal(&mut self, buf: &mut BytecodeWriter, at: &Lexeme) -> ParseResult<()> {
        buf.op(Opcode::Type, at.row, at.col);
        let is_const = self.expect(&Token::Const).is_some();
        buf.bool(is_const);
        if let Some((kind, unsigned)) = base_type(&self.peek().token) {
            self.pop();
            buf.u8(kind as u8).bool(unsigned);
            return Ok(());
        }
        if self.expect(&Token::Struct).is_some() {
            buf.u8(TypeKind::Struct as u8);
            return self.parse_struct_body(buf);
        }
        self.fail(if is_const {
            "Expected base type"
        } else {
            "Expected expression"
        })
    }

    fn parse_struct_body(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        if self.expect(&Token::Colon).is_some() {
            buf.bool(true);
            self.parse_expression(buf, true)?;
        } else {
            buf.bool(false);
        }
        self.require(&Token::LBrace, "Expected '{'")?;
        while self.expect(&Token::RBrace).is_none() {
            if self.expect(&Token::Semicolon).is_some() {
                continue;
            }
            if self.at_eof() {
                return self.fail("Expected '}'");
            }
            self.parse_struct_field(buf)?;
        }
        buf.bool(false);
        Ok(())
    }

    fn parse_struct_field(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        let at = self.peek();
        buf.bool(true).i32(at.row).i32(at.col);

        let mut inlined = false;
        let mut mandatory_name = false;
        let mut mandatory_codeblock = false;
        if self.expect(&Token::Inline).is_some() {
            inlined = true;
            buf.bool(true);
            if self.expect(&Token::LParen).is_some() {
                mandatory_name = true;
                buf.bool(true);
                self.parse_expression(buf, false)?;
                self.require(&Token::RParen, "Expected ')'")?;
            } else {
                buf.bool(false);
            }
        } else {
            buf.bool(false);
        }

        self.parse_expression(buf, true)?;

        if let Some((name, _)) = self.expect_identifier() {
            buf.bool(true).str(name);
        } else if self.expect(&Token::New).is_some() {
            if inlined {
                return self.fail("Inline field cannot be named 'new'");
            }
            buf.bool(true).str(StrId::NEW);
            mandatory_codeblock = true;
        } else if self.expect(&Token::Delete).is_some() {
            if inlined {
                return self.fail("Inline field cannot be named 'delete'");
            }
            buf.bool(true).str(StrId::DELETE);
            mandatory_codeblock = true;
        } else {
            if !inlined {
                return self.fail("Expected 'new', 'delete' or identifier");
            }
            if mandatory_name {
                return self.fail("Expected identifier");
            }
            buf.bool(false);
        }

        let mut semicolon_required = true;
        if self.expect(&Token::Equal).is_some() {
            if mandatory_codeblock {
                return self.fail("Expected '{'");
            }
            if inlined {
                return self.fail("Cannot pre-assign to an inline field");
            }
            buf.bool(true).bool(false);
            self.parse_expression(buf, false)?;
        } else {
            let capture = self.parse_capture_mode()?;
            let opener = self
                .expect(&Token::LBrace)
                .or_else(|| self.expect(&Token::EqualsArrow));
            match opener {
                Some(tok) => {
                    if inlined {
                        return self.fail("Cannot pre-assign to an inline field");
                    }
                    buf.bool(true).bool(true).u8(capture as u8);
                    buf.push();
                    self.parse_codeblock(buf, Some(tok))?;
                    buf.pop();
                }
                None if capture != CaptureMode::None || mandatory_codeblock => {
                    return self.fail("Expected '{' or '=>'");
                }
                None => {
                    buf.bool(false);
                }
            }
            semicolon_required = false;
        }

        if self.expect(&Token::At).is_some() {
            buf.bool(true).bool(false);
            self.parse_expression(buf, false)?;
            semicolon_required = true;
        } else if self.expect(&Token::PlusAt).is_some() {
            buf.bool(true).bool(true);
            self.parse_expression(buf, false)?;
            semicolon_required = true;
        } else {
            buf.bool(false);
        }
        if semicolon_required {
            self.require(&Token::Semicolon, "Expected ';'")?;
        }
        Ok(())
    }

    fn parse_suffixes(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        loop {
            let tok = self.peek();
            match tok.token {
                Token::PlusPlus | Token::MinusMinus | Token::Hash | Token::Const => {
                    self.pop();
                    let op = match tok.token {
                        Token::PlusPlus => Opcode::SuffixIncrement,
                        Token::MinusMinus => Opcode::SuffixDecrement,
                        Token::Hash => Opcode::Pointer,
                        _ => Opcode::Const,
                    };
                    buf.op(op, tok.row, tok.col);
                }
                Token::LParen => {
                    self.pop();
                    buf.op(Opcode::Call, tok.row, tok.col);
                    if self.expect(&Token::RParen).is_none() {
                        loop {
                            self.parse_expression(buf, false)?;
                            if self.expect(&Token::Comma).is_some() {
                                continue;
                            }
                            if self.expect(&Token::RParen).is_some() {
                                break;
                            }
                            return self.fail("Expected ',' or ')'");
                        }
                    }
                    buf.end();
                }
                Token::LBracket => {
                    self.pop();
                    buf.op(Opcode::Array, tok.row, tok.col);
                    self.parse_expression(buf, false)?;
                    self.require(&Token::RBracket, "Expected ']'")?;
                }
                Token::ReverseArrow => {
                    self.pop();
                    self.parse_function_type(buf, &tok)?;
                }
                Token::ColonColon => {
                    self.pop();
                    let (name, name_tok) = match self.expect_identifier() {
                        Some(found) => found,
                        None => return self.fail("Expected identifier"),
                    };
                    let op = match self.strings.resolve(name) {
                        "size" => Opcode::GetSize,
                        "length" => Opcode::GetLength,
                        "scope" => Opcode::GetScope,
                        _ => {
                            return Err(self.error_at(
                                &name_tok,
                                "Expected 'size', 'length' or 'scope'",
                            ));
                        }
                    };
                    buf.op(op, tok.row, tok.col);
                }
                Token::Dot => {
                    self.pop();
                    buf.op(Opcode::WalkStruct, tok.row, tok.col);
                    let name = self.require_identifier()?;
                    buf.str(name);
                }
                _ => return Ok(()),
            }
        }
    }

    /// `R <- [$] (T name, U, ...)`.
    fn parse_function_type(&mut self, buf: &mut BytecodeWriter, tok: &Lexeme) -> ParseResult<()> {
        buf.op(Opcode::Function, tok.row, tok.col);
        buf.bool(self.expect(&Token::Dollar).is_some());
        self.require(&Token::LParen, "Expected '('")?;
        if self.expect(&Token::RParen).is_none() {
            loop {
                if let Some(dots) = self.expect(&Token::Ellipsis) {
                    buf.op(Opcode::Type, dots.row, dots.col)
                        .bool(false)
                        .u8(TypeKind::Varargs as u8)
                        .bool(false);
                    buf.end().bool(false);
                    self.require(&Token::RParen, "Expected ')'")?;
                    break;
                }
                self.parse_expression(buf, true)?;
                match self.expect_identifier() {
                    Some((name, _)) => buf.bool(true).str(name),
                    None => buf.bool(false),
                };
                if self.expect(&Token::Comma).is_some() {
                    continue;
                }
                if self.expect(&Token::RParen).is_some() {
                    break;
                }
                return self.fail("Expected ',' or ')'");
            }
        }
        buf.end();
        Ok(())
    }
}
