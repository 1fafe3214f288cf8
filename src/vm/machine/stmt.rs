// stmt 모듈 - 명령 실행
//
// 명령은 블록 단위로 실행된다. 제어 흐름(return/break/continue)은 에러가 아니라
// `State`로 전달되고, 블록은 상태가 Running이 아니면 멈춘다.

use std::cmp::Ordering;

use crate::types::{TypeId, TypeKind};
use crate::vm::bytecode::{BytecodeReader, Opcode};
use crate::vm::value::{Variable, extend};

use super::{State, Vm, VmErrorKind, VmResult};

impl Vm {
    /// 명령 하나를 실행한다. `End`를 만나면 None.
    pub(crate) fn exec_command(&mut self, r: &mut BytecodeReader) -> VmResult<Option<Variable>> {
        let op = r.opcode();
        if op == Opcode::End {
            return Ok(None);
        }
        let row = r.i32();
        let col = r.i32();
        let saved = self.set_position(row, col);
        let value = match op {
            Opcode::If => self.exec_if(r)?,
            Opcode::While => self.exec_while(r)?,
            Opcode::For => self.exec_for(r)?,
            Opcode::Return => {
                let value = if r.bool() {
                    self.eval_value(r)?
                } else {
                    self.void_value()
                };
                self.state_var = Some(value.clone());
                self.state = State::Return;
                value
            }
            Opcode::Continue => {
                self.state = State::Continue;
                self.void_value()
            }
            Opcode::Break => {
                self.state = State::Break;
                self.void_value()
            }
            Opcode::Try => self.exec_try(r)?,
            Opcode::Throw => return Err(self.exec_throw(r)),
            Opcode::Codeblock => {
                let mut block = r.enter();
                self.exec_block(&mut block, true)?
            }
            Opcode::Expr => match self.eval(r)? {
                Some(value) => value,
                None => self.void_value(),
            },
            other => return Err(self.error(format!("Unexpected command '{}'", other))),
        };
        self.check_fault()?;
        self.restore_position(saved);
        Ok(Some(value))
    }

    /// 블록 끝이나 제어 상태 변화까지 명령을 실행하고 마지막 값을 돌려준다.
    pub(crate) fn exec_block(&mut self, r: &mut BytecodeReader, push_level: bool) -> VmResult<Variable> {
        if push_level {
            self.push_level();
        }
        let mut last = self.void_value();
        while self.state == State::Running {
            match self.exec_command(r)? {
                Some(value) => last = value,
                None => break,
            }
        }
        if push_level {
            self.pop_level();
        }
        Ok(last)
    }

    // ========== 분기 / 반복 ==========

    fn exec_if(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let cond = self.eval_value(r)?;
        let truth = self.truthy(&cond)?;
        let mut then_block = r.enter();
        let has_else = r.bool();
        if truth {
            if has_else {
                r.skip();
            }
            return self.exec_block(&mut then_block, true);
        }
        if has_else {
            let mut else_block = r.enter();
            return self.exec_block(&mut else_block, true);
        }
        Ok(self.void_value())
    }

    fn exec_while(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let start = r.pos();
        let mut last = self.void_value();
        loop {
            r.seek(start);
            let cond = self.eval_value(r)?;
            let truth = self.truthy(&cond)?;
            let mut body = r.enter();
            if !truth {
                break;
            }
            last = self.exec_block(&mut body, true)?;
            match self.state {
                State::Break => {
                    self.state = State::Running;
                    break;
                }
                State::Continue => self.state = State::Running,
                State::Return => break,
                State::Running => {}
            }
        }
        Ok(last)
    }

    /// `for T i: lo [excl] => hi [excl] [step s] { ... }`
    ///
    /// 음수 step은 hi에서 lo 쪽으로 내려간다. 반복 변수는 매 회차 새 레벨에 선언되고,
    /// 본문에서 바꾼 값에서 다음 회차가 이어진다. 타입 범위를 넘어 감싸지면 멈춘다.
    fn exec_for(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let ty_var = self.eval_value(r)?;
        let ty = self.expect_type(&ty_var)?;
        let ty = self.resolve_type(ty)?;
        if !self.types.kind(ty).is_integer() {
            return Err(self.error("Not an integer type"));
        }
        let name = r.str();
        let lo = self.eval_value(r)?;
        let lo = self.cast(ty, &lo, false)?.bits(&self.types);
        let lo_excl = r.bool();
        let hi = self.eval_value(r)?;
        let hi = self.cast(ty, &hi, false)?.bits(&self.types);
        let hi_excl = r.bool();
        let step = if r.bool() {
            let step = self.eval_value(r)?;
            let s64 = self.types.primitive(TypeKind::Int64);
            self.cast(s64, &step, false)?.bits(&self.types) as i64
        } else {
            1
        };
        let body_start = r.pos();
        r.skip();
        let end = r.pos();

        let bounds = ForBounds::new(self.types.get(ty).is_signed_integer(), step < 0, lo, lo_excl, hi, hi_excl);
        let mut iter = bounds.first();
        if bounds.starts_excluded() {
            iter = self.step_value(ty, iter, step);
        }

        let mut last = self.void_value();
        while bounds.contains(iter) {
            self.push_level();
            let var = self.fresh(ty, iter);
            self.scopes.declare(name, var);
            r.seek(body_start);
            let mut body = r.enter();
            last = self.exec_block(&mut body, false)?;

            let state = self.state;
            if matches!(state, State::Break | State::Continue) {
                self.state = State::Running;
            }
            if matches!(state, State::Break | State::Return) {
                self.pop_level();
                break;
            }
            let current = self
                .scopes
                .lookup(name, self.base())
                .map_or(iter, |v| v.bits(&self.types));
            let next = self.step_value(ty, current, step);
            self.pop_level();
            if !bounds.advances(current, next) {
                break;
            }
            iter = next;
        }
        r.seek(end);
        Ok(last)
    }

    fn step_value(&self, ty: TypeId, value: u64, step: i64) -> u64 {
        extend(value.wrapping_add(step as u64), self.types.get(ty))
    }

    // ========== 예외 ==========

    /// `try { } [catch [silently] [as e] { }]`
    fn exec_try(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let depth = self.scopes.depth();
        let frames = self.frames.len();
        let mut body = r.enter();
        let outcome = self.exec_block(&mut body, true);

        let has_catch = r.bool();
        let (silently, bind) = if has_catch {
            let silently = r.bool();
            let bind = if r.bool() { Some(r.str()) } else { None };
            (silently, bind)
        } else {
            (false, None)
        };
        let handler = has_catch.then(|| r.enter());

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        tracing::debug!(kind = %error.kind, error = %error.message, "caught");
        self.unwind_to(depth, frames);
        self.state = State::Running;
        self.state_var = None;

        let Some(mut handler) = handler else {
            if self.config.log_caught_errors {
                self.log_error(&error);
            }
            return Ok(self.void_value());
        };
        if !silently && self.config.log_caught_errors {
            self.log_error(&error);
        }

        self.push_level();
        if let Some(name) = bind {
            let value = match &error.payload {
                Some(payload) => self.fresh(payload.ty, payload.bits(&self.types)),
                None => self.string_value(&error.message),
            };
            self.scopes.declare(name, value);
        }
        let value = self.exec_block(&mut handler, false)?;
        self.pop_level();
        Ok(value)
    }

    /// `throw value [as "message"];`
    fn exec_throw(&mut self, r: &mut BytecodeReader) -> super::VmError {
        let value = match self.eval_value(r) {
            Ok(value) => value,
            Err(e) => return e,
        };
        let message = if r.bool() {
            let id = r.str();
            self.strings.resolve(id).to_string()
        } else {
            value.render(&self.types, &self.strings)
        };
        let mut error = self.error_of(VmErrorKind::Thrown, message);
        error.payload = Some(value.to_rvalue(&self.types));
        error
    }
}

/// for 루프의 범위 검사
struct ForBounds {
    signed: bool,
    reverse: bool,
    lo: u64,
    lo_excl: bool,
    hi: u64,
    hi_excl: bool,
}

impl ForBounds {
    fn new(signed: bool, reverse: bool, lo: u64, lo_excl: bool, hi: u64, hi_excl: bool) -> Self {
        ForBounds {
            signed,
            reverse,
            lo,
            lo_excl,
            hi,
            hi_excl,
        }
    }

    fn cmp(&self, a: u64, b: u64) -> Ordering {
        if self.signed {
            (a as i64).cmp(&(b as i64))
        } else {
            a.cmp(&b)
        }
    }

    fn first(&self) -> u64 {
        if self.reverse { self.hi } else { self.lo }
    }

    fn starts_excluded(&self) -> bool {
        if self.reverse { self.hi_excl } else { self.lo_excl }
    }

    fn contains(&self, value: u64) -> bool {
        let (lower, upper) = (self.cmp(value, self.lo), self.cmp(value, self.hi));
        let above = if self.lo_excl { lower == Ordering::Greater } else { lower != Ordering::Less };
        let below = if self.hi_excl { upper == Ordering::Less } else { upper != Ordering::Greater };
        above && below
    }

    /// 다음 값이 진행 방향으로 움직였는지 (감싸짐이나 step 0이면 false)
    fn advances(&self, current: u64, next: u64) -> bool {
        let ordering = self.cmp(next, current);
        if self.reverse {
            ordering == Ordering::Less
        } else {
            ordering == Ordering::Greater
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_bounds_inclusive_and_exclusive() {
        let bounds = ForBounds::new(true, false, 0, false, 3, true);
        assert!(bounds.contains(0));
        assert!(bounds.contains(2));
        assert!(!bounds.contains(3));
        assert!(!bounds.contains((-1i64) as u64));
    }

    #[test]
    fn test_for_bounds_detects_wrap() {
        let bounds = ForBounds::new(false, false, 0, false, 255, false);
        assert!(bounds.advances(254, 255));
        assert!(!bounds.advances(255, 0));
        let reverse = ForBounds::new(true, true, 0, false, 5, false);
        assert_eq!(reverse.first(), 5);
        assert!(reverse.advances(5, 4));
    }
}
