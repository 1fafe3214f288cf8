use super::{ParseResult, Parser};
use crate::lexer::Token;
use crate::vm::bytecode::{BytecodeWriter, CaptureMode, Opcode};

/// Binary operator spelled by `token`, if any.
fn binary_operator(token: &Token) -> Option<Opcode> {
    let op = match token {
        Token::Plus => Opcode::Addition,
        Token::Minus => Opcode::Subtraction,
        Token::Star => Opcode::Multiplication,
        Token::Slash => Opcode::Division,
        Token::Percent => Opcode::Modulo,
        Token::HatHat => Opcode::Power,
        Token::ShiftLeft => Opcode::ShiftLeft,
        Token::ShiftRight => Opcode::ShiftRight,
        Token::Ampersand => Opcode::BitAnd,
        Token::Pipe => Opcode::BitOr,
        Token::Hat => Opcode::BitXor,
        Token::Question => Opcode::Elvis,
        Token::EqualEqual => Opcode::Equals,
        Token::NotEqual => Opcode::NotEquals,
        Token::Less => Opcode::Less,
        Token::Greater => Opcode::Greater,
        Token::LessEqual => Opcode::LessEqual,
        Token::GreaterEqual => Opcode::GreaterEqual,
        Token::AmpAmp => Opcode::LogicalAnd,
        Token::PipePipe => Opcode::LogicalOr,
        Token::Equal => Opcode::Assign,
        Token::PlusEqual => Opcode::AddAssign,
        Token::MinusEqual => Opcode::SubAssign,
        Token::StarEqual => Opcode::MulAssign,
        Token::SlashEqual => Opcode::DivAssign,
        Token::PercentEqual => Opcode::ModAssign,
        Token::HatHatEqual => Opcode::PowAssign,
        Token::ShiftLeftEqual => Opcode::ShlAssign,
        Token::ShiftRightEqual => Opcode::ShrAssign,
        Token::AmpEqual => Opcode::AndAssign,
        Token::PipeEqual => Opcode::OrAssign,
        Token::HatEqual => Opcode::XorAssign,
        Token::QuestionEqual => Opcode::ElvisAssign,
        Token::MinusArrow => Opcode::Cast,
        Token::TildeArrow => Opcode::Bitcast,
        _ => return None,
    };
    Some(op)
}

fn precedence(op: Opcode) -> (u8, bool) {
    op.binary_info().unwrap_or((0, false))
}

/// Reorders `operand (op operand)*` fragments into postfix order.
fn infix_to_postfix(out: &mut BytecodeWriter, first: BytecodeWriter, rest: Vec<(Opcode, BytecodeWriter, BytecodeWriter)>) {
    let mut op_stack: Vec<(Opcode, BytecodeWriter)> = Vec::new();
    out.merge(first);
    for (op, op_buf, operand) in rest {
        let (prec, right) = precedence(op);
        while let Some((top, _)) = op_stack.last() {
            let (top_prec, _) = precedence(*top);
            let should_pop = (!right && prec <= top_prec) || (right && prec < top_prec);
            if !should_pop {
                break;
            }
            if let Some((_, buf)) = op_stack.pop() {
                out.merge(buf);
            }
        }
        op_stack.push((op, op_buf));
        out.merge(operand);
    }
    while let Some((_, buf)) = op_stack.pop() {
        out.merge(buf);
    }
}

impl Parser<'_> {
    /// Parses an expression followed by `End`.
    ///
    /// Returns whether the expression needs a terminating `;` (a declaration
    /// with an attached body doesn't).
    pub(super) fn parse_expression(&mut self, buf: &mut BytecodeWriter, operand_only: bool) -> ParseResult<bool> {
        let mut require_semicolon = true;
        let mut first: Option<BytecodeWriter> = None;
        let mut rest = Vec::new();
        let mut pending_op: Option<(Opcode, BytecodeWriter)> = None;
        loop {
            let mut operand = BytecodeWriter::new();
            let extern_token = if operand_only {
                None
            } else {
                self.expect(&Token::Extern)
            };
            self.parse_operand(&mut operand)?;
            let mut extern_used = false;
            if !operand_only {
                if let Some((name, tok)) = self.expect_identifier() {
                    operand.op(Opcode::Decl, tok.row, tok.col);
                    operand.bool(extern_token.is_some()).str(name);
                    require_semicolon = self.parse_decl_tail(&mut operand)?;
                    extern_used = true;
                }
            }
            if let (Some(tok), false) = (&extern_token, extern_used) {
                return Err(self.error_at(tok, "Unexpected 'extern'"));
            }
            match pending_op.take() {
                None => first = Some(operand),
                Some((op, op_buf)) => rest.push((op, op_buf, operand)),
            }
            if operand_only {
                break;
            }
            let next = self.peek();
            let Some(op) = binary_operator(&next.token) else {
                break;
            };
            self.pop();
            require_semicolon = true;
            let mut op_buf = BytecodeWriter::new();
            op_buf.op(op, next.row, next.col);
            pending_op = Some((op, op_buf));
        }
        infix_to_postfix(buf, first.unwrap_or_default(), rest);
        buf.end();
        Ok(require_semicolon)
    }

    /// Generic parameters, capture mode and optional body of a declaration.
    /// Returns whether a `;` is still required.
    fn parse_decl_tail(&mut self, buf: &mut BytecodeWriter) -> ParseResult<bool> {
        if self.expect(&Token::LParen).is_some() {
            loop {
                buf.bool(true);
                let name = self.require_identifier()?;
                buf.str(name);
                self.require(&Token::Equal, "Expected '='")?;
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
        buf.bool(false);
        let capture = self.parse_capture_mode()?;
        let opener = self
            .expect(&Token::LBrace)
            .or_else(|| self.expect(&Token::EqualsArrow));
        match opener {
            Some(tok) => {
                buf.bool(true).u8(capture as u8);
                buf.push();
                self.parse_codeblock(buf, Some(tok))?;
                buf.pop();
                Ok(false)
            }
            None if capture != CaptureMode::None => self.fail("Expected '{'"),
            None => {
                buf.bool(false);
                Ok(true)
            }
        }
    }
}
