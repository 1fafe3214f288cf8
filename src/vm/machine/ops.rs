// ops 모듈 - 연산자 디스패치
//
// 연산자마다 피연산자 패턴 목록을 두고, 스택 꼭대기와 처음 맞는 규칙을 실행한다.
// 맞는 규칙이 없으면 "Operand type mismatch (...)" 에러.

use std::cmp::Ordering;

use crate::types::{TypeId, TypeKind};
use crate::vm::bytecode::{BytecodeReader, Opcode, OperatorFormat};
use crate::vm::value::{Variable, extend};

use super::{Vm, VmError, VmResult};

// ========== 규칙 표 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Integer,
    Number,
    Pointer,
    Struct,
    Function,
    Type,
    Any,
}

#[derive(Debug, Clone, Copy)]
struct Operand {
    pattern: Pattern,
    lvalue: bool,
}

const fn val(pattern: Pattern) -> Operand {
    Operand { pattern, lvalue: false }
}

const fn lval(pattern: Pattern) -> Operand {
    Operand { pattern, lvalue: true }
}

type Handler = fn(&mut Vm, Opcode, &mut BytecodeReader, &mut Vec<Variable>) -> VmResult<()>;

struct Rule {
    ops: &'static [Opcode],
    operands: &'static [Operand],
    run: Handler,
}

use Opcode as O;
use Pattern as P;

const ADDITIVE: &[Opcode] = &[O::Addition, O::Subtraction];
const MULTIPLICATIVE: &[Opcode] = &[O::Multiplication, O::Division, O::Modulo, O::Power];
const BITWISE: &[Opcode] = &[O::ShiftLeft, O::ShiftRight, O::BitAnd, O::BitOr, O::BitXor];
const ORDERING: &[Opcode] = &[O::Less, O::Greater, O::LessEqual, O::GreaterEqual];
const STEPS: &[Opcode] = &[
    O::PrefixIncrement,
    O::PrefixDecrement,
    O::SuffixIncrement,
    O::SuffixDecrement,
];

static RULES: &[Rule] = &[
    Rule { ops: ADDITIVE, operands: &[val(P::Number), val(P::Number)], run: arithmetic },
    Rule { ops: ADDITIVE, operands: &[val(P::Pointer), val(P::Integer)], run: pointer_offset },
    Rule { ops: &[O::Addition], operands: &[val(P::Integer), val(P::Pointer)], run: pointer_offset },
    Rule { ops: MULTIPLICATIVE, operands: &[val(P::Number), val(P::Number)], run: arithmetic },
    Rule { ops: BITWISE, operands: &[val(P::Integer), val(P::Integer)], run: arithmetic },
    Rule { ops: &[O::Elvis], operands: &[val(P::Any), val(P::Any)], run: elvis },
    Rule { ops: &[O::Equals, O::NotEquals], operands: &[val(P::Any), val(P::Any)], run: compare },
    Rule { ops: ORDERING, operands: &[val(P::Number), val(P::Number)], run: compare },
    Rule { ops: ORDERING, operands: &[val(P::Pointer), val(P::Pointer)], run: compare },
    Rule { ops: &[O::LogicalAnd, O::LogicalOr], operands: &[val(P::Any), val(P::Any)], run: logical },
    Rule { ops: &[O::Assign], operands: &[lval(P::Any), val(P::Any)], run: assign },
    Rule { ops: &[O::AddAssign, O::SubAssign], operands: &[lval(P::Number), val(P::Number)], run: compound },
    Rule { ops: &[O::AddAssign, O::SubAssign], operands: &[lval(P::Pointer), val(P::Integer)], run: compound },
    Rule {
        ops: &[O::MulAssign, O::DivAssign, O::ModAssign, O::PowAssign],
        operands: &[lval(P::Number), val(P::Number)],
        run: compound,
    },
    Rule {
        ops: &[O::ShlAssign, O::ShrAssign, O::AndAssign, O::OrAssign, O::XorAssign],
        operands: &[lval(P::Integer), val(P::Integer)],
        run: compound,
    },
    Rule { ops: &[O::ElvisAssign], operands: &[lval(P::Any), val(P::Any)], run: compound },
    Rule { ops: &[O::Cast, O::Bitcast], operands: &[val(P::Any), val(P::Type)], run: cast },
    Rule { ops: STEPS, operands: &[lval(P::Number)], run: step },
    Rule { ops: &[O::Address], operands: &[lval(P::Any)], run: address },
    Rule { ops: &[O::Dereference], operands: &[val(P::Pointer)], run: dereference },
    Rule { ops: &[O::Dereference], operands: &[val(P::Type)], run: dereference_type },
    Rule { ops: &[O::ArithPlus, O::ArithNegate], operands: &[val(P::Number)], run: sign },
    Rule { ops: &[O::LogicNegate], operands: &[val(P::Any)], run: logic_not },
    Rule { ops: &[O::BinaryNegate], operands: &[val(P::Integer)], run: bit_not },
    Rule { ops: &[O::Const, O::Pointer], operands: &[val(P::Type)], run: modify_type },
    Rule { ops: &[O::Function], operands: &[val(P::Type)], run: function_type },
    Rule { ops: &[O::Array], operands: &[val(P::Pointer)], run: index_pointer },
    Rule { ops: &[O::Array], operands: &[val(P::Struct)], run: index_struct },
    Rule { ops: &[O::Call], operands: &[val(P::Function)], run: call },
    Rule { ops: &[O::GetSize, O::GetLength, O::GetScope], operands: &[val(P::Any)], run: allocation_info },
    Rule { ops: &[O::WalkStruct], operands: &[val(P::Struct)], run: member },
    Rule { ops: &[O::WalkStruct], operands: &[val(P::Type)], run: member_type },
];

impl Vm {
    pub(super) fn apply_operator(
        &mut self,
        op: Opcode,
        r: &mut BytecodeReader,
        stack: &mut Vec<Variable>,
    ) -> VmResult<()> {
        for rule in RULES.iter().filter(|rule| rule.ops.contains(&op)) {
            let n = rule.operands.len();
            if stack.len() < n {
                continue;
            }
            let tail = &stack[stack.len() - n..];
            if tail
                .iter()
                .zip(rule.operands)
                .all(|(var, operand)| self.matches(var, *operand))
            {
                return (rule.run)(self, op, r, stack);
            }
        }
        Err(self.mismatch(op, stack))
    }

    fn matches(&self, var: &Variable, operand: Operand) -> bool {
        if operand.lvalue && !var.is_lvalue() {
            return false;
        }
        let kind = self.kind_of(var);
        match operand.pattern {
            Pattern::Integer => kind.is_integer(),
            Pattern::Number => kind.is_number(),
            Pattern::Pointer => kind == TypeKind::Pointer,
            Pattern::Struct => kind == TypeKind::Struct,
            Pattern::Function => kind == TypeKind::Function,
            Pattern::Type => kind == TypeKind::Type,
            Pattern::Any => true,
        }
    }

    fn mismatch(&self, op: Opcode, stack: &[Variable]) -> VmError {
        let describe = |var: Option<&Variable>| match var {
            Some(var) => {
                let mut name = self.display_type(var.ty);
                if var.is_lvalue() {
                    name.push('=');
                }
                name
            }
            None => "?".to_string(),
        };
        let n = stack.len();
        let top = describe(stack.last());
        let symbol = op.symbol();
        let shape = match op.operator_format().unwrap_or(OperatorFormat::Suffix) {
            OperatorFormat::Binary => {
                let left = describe(n.checked_sub(2).and_then(|i| stack.get(i)));
                format!("({} {} {})", left, symbol, top)
            }
            OperatorFormat::Prefix => format!("({}{})", symbol, top),
            OperatorFormat::Suffix | OperatorFormat::Member => format!("({}{})", top, symbol),
            OperatorFormat::Array => format!("({}[])", top),
            OperatorFormat::Call => format!("({}())", top),
            OperatorFormat::Function => format!("({}<-())", top),
        };
        self.error(format!("Operand type mismatch {}", shape))
    }

    /// 이항 산술 전 공통 타입으로 맞춘다.
    ///
    /// 더 넓은 종류를 고르되 최소 s32, 어느 한쪽이 부호 없는 정수나 포인터면
    /// 부호 없는 쪽으로. 숫자가 아닌 값끼리는 u64로 비교한다.
    pub(super) fn promote(&mut self, a: &Variable, b: &Variable) -> VmResult<(TypeId, Variable, Variable)> {
        let (ka, kb) = (self.kind_of(a), self.kind_of(b));
        let ty = if ka.is_number() && kb.is_number() {
            let kind = ka.max(kb).max(TypeKind::Int32);
            let base = self.types.primitive(kind);
            let unsigned = !kind.is_float()
                && (self.types.is_unsigned_like(a.ty) || self.types.is_unsigned_like(b.ty));
            if unsigned { self.types.unsign(base) } else { base }
        } else {
            self.u64_type()
        };
        let x = self.cast(ty, a, false)?;
        let y = self.cast(ty, b, false)?;
        Ok((ty, x, y))
    }
}

// ========== 산술 ==========

fn pop2(vm: &Vm, stack: &mut Vec<Variable>) -> VmResult<(Variable, Variable)> {
    let b = stack.pop();
    let a = stack.pop();
    match (a, b) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(vm.error("Missing operand")),
    }
}

fn pop1(vm: &Vm, stack: &mut Vec<Variable>) -> VmResult<Variable> {
    stack.pop().ok_or_else(|| vm.error("Missing operand"))
}

fn arithmetic(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let (ty, x, y) = vm.promote(&a, &b)?;
    let bits = compute(vm, op, ty, &x, &y)?;
    let bits = extend(bits, vm.types.get(ty));
    stack.push(Variable::rvalue(ty, bits));
    Ok(())
}

fn compute(vm: &Vm, op: Opcode, ty: TypeId, x: &Variable, y: &Variable) -> VmResult<u64> {
    let t = vm.types.get(ty);
    if t.kind.is_float() {
        let (a, b) = (x.as_f64(&vm.types), y.as_f64(&vm.types));
        let value = match op {
            Opcode::Addition => a + b,
            Opcode::Subtraction => a - b,
            Opcode::Multiplication => a * b,
            Opcode::Division => a / b,
            Opcode::Modulo => a % b,
            Opcode::Power => a.powf(b),
            _ => return Err(vm.error(format!("Operator '{}' needs integers", op.symbol()))),
        };
        return Ok(match t.kind {
            TypeKind::Float32 => (value as f32).to_bits() as u64,
            _ => value.to_bits(),
        });
    }

    let (a, b) = (x.bits(&vm.types), y.bits(&vm.types));
    let signed = t.is_signed_integer();
    let bits = match op {
        Opcode::Addition => a.wrapping_add(b),
        Opcode::Subtraction => a.wrapping_sub(b),
        Opcode::Multiplication => a.wrapping_mul(b),
        Opcode::Division | Opcode::Modulo if b == 0 => return Err(vm.error("Division by zero")),
        Opcode::Division if signed => (a as i64).wrapping_div(b as i64) as u64,
        Opcode::Division => a / b,
        Opcode::Modulo if signed => (a as i64).wrapping_rem(b as i64) as u64,
        Opcode::Modulo => a % b,
        Opcode::Power => int_pow(a, b, signed),
        Opcode::ShiftLeft => a << (b & 63),
        Opcode::ShiftRight if signed => ((a as i64) >> (b & 63)) as u64,
        Opcode::ShiftRight => a >> (b & 63),
        Opcode::BitAnd => a & b,
        Opcode::BitOr => a | b,
        Opcode::BitXor => a ^ b,
        _ => return Err(vm.error(format!("Unexpected operator '{}'", op.symbol()))),
    };
    Ok(bits)
}

/// 정수 거듭제곱. 음의 지수는 ±1만 값을 가지고 나머지는 0.
fn int_pow(base: u64, exp: u64, signed: bool) -> u64 {
    if signed && (exp as i64) < 0 {
        return match base as i64 {
            1 => 1,
            -1 if exp & 1 == 1 => u64::MAX,
            -1 => 1,
            _ => 0,
        };
    }
    let exp = u32::try_from(exp).unwrap_or(u32::MAX);
    base.wrapping_pow(exp)
}

/// `p + i`, `i + p`, `p - i`. 한 칸은 가리키는 타입의 크기.
fn pointer_offset(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let (pointer, index) = if vm.kind_of(&a) == TypeKind::Pointer {
        (a, b)
    } else {
        (b, a)
    };
    let stride = pointer_stride(vm, pointer.ty);
    let offset = (index.bits(&vm.types) as i64).wrapping_mul(stride as i64) as u64;
    let base = pointer.bits(&vm.types);
    let bits = match op {
        Opcode::Subtraction => base.wrapping_sub(offset),
        _ => base.wrapping_add(offset),
    };
    stack.push(Variable::rvalue(pointer.ty, bits));
    Ok(())
}

/// 포인터 산술의 한 칸. `void#`는 바이트 단위.
fn pointer_stride(vm: &Vm, pointer: TypeId) -> u64 {
    match vm.types.get(pointer).pointer_base() {
        Some(base) if vm.types.kind(base) == TypeKind::Void => 1,
        Some(base) => vm.types.get(base).size.max(1),
        None => 1,
    }
}

// ========== 비교 / 논리 ==========

fn compare(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let (ty, x, y) = vm.promote(&a, &b)?;
    let t = vm.types.get(ty);
    let ordering = if t.kind.is_float() {
        x.as_f64(&vm.types).partial_cmp(&y.as_f64(&vm.types))
    } else {
        let (neg_a, neg_b) = (a.is_negative(&vm.types), b.is_negative(&vm.types));
        if neg_a != neg_b {
            // 부호가 다른 정수는 승격 전 부호로만 판정한다.
            Some(neg_b.cmp(&neg_a))
        } else if t.is_signed_integer() {
            Some((x.bits(&vm.types) as i64).cmp(&(y.bits(&vm.types) as i64)))
        } else {
            Some(x.bits(&vm.types).cmp(&y.bits(&vm.types)))
        }
    };
    let result = match op {
        Opcode::Less => ordering == Some(Ordering::Less),
        Opcode::Greater => ordering == Some(Ordering::Greater),
        Opcode::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Opcode::GreaterEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Opcode::Equals => ordering == Some(Ordering::Equal),
        _ => ordering != Some(Ordering::Equal),
    };
    push_bool(vm, stack, result);
    Ok(())
}

fn push_bool(vm: &mut Vm, stack: &mut Vec<Variable>, value: bool) {
    let ty = vm.bool_type();
    stack.push(Variable::rvalue(ty, value as u64));
}

fn logical(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let (x, y) = (vm.truthy(&a)?, vm.truthy(&b)?);
    let result = match op {
        Opcode::LogicalAnd => x && y,
        _ => x || y,
    };
    push_bool(vm, stack, result);
    Ok(())
}

fn elvis(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let chosen = if vm.truthy(&a)? { a } else { b };
    stack.push(chosen);
    Ok(())
}

// ========== 대입 ==========

fn assign(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let converted = vm.cast(a.ty, &b, false)?;
    a.store(&vm.types, converted.bits(&vm.types));
    stack.push(a);
    Ok(())
}

/// `a op= b`: 기본 연산을 돌리고 대상 타입으로 변환해 저장한다.
fn compound(vm: &mut Vm, op: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (a, b) = pop2(vm, stack)?;
    let Some(base) = op.compound_base() else {
        return Err(vm.error(format!("Unexpected operator '{}'", op.symbol())));
    };
    let mut scratch = vec![a.clone(), b];
    vm.apply_operator(base, r, &mut scratch)?;
    let result = pop1(vm, &mut scratch)?;
    let converted = vm.cast(a.ty, &result, false)?;
    a.store(&vm.types, converted.bits(&vm.types));
    stack.push(a);
    Ok(())
}

fn cast(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let (value, target) = pop2(vm, stack)?;
    let target = target.as_type(&vm.types);
    let converted = vm.cast(target, &value, op == Opcode::Bitcast)?;
    stack.push(converted);
    Ok(())
}

fn step(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let old = var.to_rvalue(&vm.types);
    let up = matches!(op, Opcode::PrefixIncrement | Opcode::SuffixIncrement);
    let bits = old.bits(&vm.types);
    let next = match vm.kind_of(&var) {
        TypeKind::Float32 => {
            let value = f32::from_bits(bits as u32);
            let value = if up { value + 1.0 } else { value - 1.0 };
            value.to_bits() as u64
        }
        TypeKind::Float64 => {
            let value = f64::from_bits(bits);
            let value = if up { value + 1.0 } else { value - 1.0 };
            value.to_bits()
        }
        _ if up => bits.wrapping_add(1),
        _ => bits.wrapping_sub(1),
    };
    var.store(&vm.types, next);
    let result = match op {
        Opcode::PrefixIncrement | Opcode::PrefixDecrement => var.to_rvalue(&vm.types),
        _ => old,
    };
    stack.push(result);
    Ok(())
}

// ========== 포인터 ==========

fn address(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let Some(addr) = var.address() else {
        return Err(vm.error("Cannot take the address of a temporary value"));
    };
    let ty = vm.types.pointer(var.ty);
    stack.push(Variable::rvalue(ty, addr as u64));
    Ok(())
}

fn dereference(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let pointer = pop1(vm, stack)?;
    let addr = pointer.bits(&vm.types);
    if addr == 0 {
        return Err(vm.error("Null pointer dereference"));
    }
    stack.push(element_at(vm, pointer.ty, addr));
    Ok(())
}

/// 포인터가 가리키는 칸. const 대상은 rvalue.
///
/// 칸을 한 번 읽어 두므로 잘못된 주소는 역참조한 노드에서 폴트로 드러난다.
fn element_at(vm: &Vm, pointer: TypeId, addr: u64) -> Variable {
    let base = vm.types.get(pointer).pointer_base().unwrap_or_else(|| vm.types.void());
    let var = Variable::at(base, addr as *mut u8);
    let _ = var.raw_bits(vm.types.get(base).value_size());
    if vm.types.get(base).is_const() {
        var.to_rvalue(&vm.types)
    } else {
        var
    }
}

fn dereference_type(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let ty = pop1(vm, stack)?.as_type(&vm.types);
    let t = vm.types.get(ty);
    let Some(inner) = t.pointer_base().or_else(|| t.return_type()) else {
        return Err(vm.error(format!(
            "Type {} is not a pointer or a function",
            vm.display_type(ty)
        )));
    };
    stack.push(vm.type_value(inner));
    Ok(())
}

fn index_pointer(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let pointer = pop1(vm, stack)?;
    let index = vm.eval_value(r)?;
    if !vm.kind_of(&index).is_integer() {
        return Err(vm.error("Index must be an integer"));
    }
    let addr = pointer.bits(&vm.types);
    if addr == 0 {
        return Err(vm.error("Null pointer dereference"));
    }
    let stride = match vm.types.get(pointer.ty).pointer_base() {
        Some(base) => vm.types.get(base).value_size(),
        None => 0,
    };
    let offset = (index.bits(&vm.types) as i64).wrapping_mul(stride as i64) as u64;
    stack.push(element_at(vm, pointer.ty, addr.wrapping_add(offset)));
    Ok(())
}

/// 구조체 배열 (`new [S](n)`)의 i번째 원소
fn index_struct(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let array = pop1(vm, stack)?;
    let index = vm.eval_value(r)?;
    if !vm.kind_of(&index).is_integer() {
        return Err(vm.error("Index must be an integer"));
    }
    let addr = array.bits(&vm.types);
    if addr == 0 {
        return Err(vm.error("Struct is unset"));
    }
    let size = vm.types.get(array.ty).size;
    let offset = (index.bits(&vm.types) as i64).wrapping_mul(size as i64) as u64;
    stack.push(Variable::rvalue(array.ty, addr.wrapping_add(offset)));
    Ok(())
}

// ========== 단항 ==========

fn sign(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let ty = vm.types.mutable(var.ty);
    let bits = var.bits(&vm.types);
    let bits = match (op, vm.types.kind(ty)) {
        (Opcode::ArithPlus, _) => bits,
        (_, TypeKind::Float32) => (-f32::from_bits(bits as u32)).to_bits() as u64,
        (_, TypeKind::Float64) => (-f64::from_bits(bits)).to_bits(),
        _ => bits.wrapping_neg(),
    };
    let bits = extend(bits, vm.types.get(ty));
    stack.push(Variable::rvalue(ty, bits));
    Ok(())
}

fn logic_not(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let truth = vm.truthy(&var)?;
    push_bool(vm, stack, !truth);
    Ok(())
}

fn bit_not(vm: &mut Vm, _: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let ty = vm.types.mutable(var.ty);
    let bits = extend(!var.bits(&vm.types), vm.types.get(ty));
    stack.push(Variable::rvalue(ty, bits));
    Ok(())
}

// ========== 타입 연산 ==========

fn modify_type(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let ty = pop1(vm, stack)?.as_type(&vm.types);
    let modified = match op {
        Opcode::Const => vm.types.constant(ty),
        _ => vm.types.pointer(ty),
    };
    stack.push(vm.type_value(modified));
    Ok(())
}

/// `R <- [$] (T a, U b, ...)`
fn function_type(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let ret = pop1(vm, stack)?.as_type(&vm.types);
    let lvalue_return = r.bool();
    let mut params = Vec::new();
    while let Some(param) = vm.eval(r)? {
        let ty = vm.expect_type(&param)?;
        let name = if r.bool() { Some(r.str()) } else { None };
        params.push(crate::types::Param { name, ty });
    }
    let ty = vm.types.function(ret, params, lvalue_return);
    stack.push(vm.type_value(ty));
    Ok(())
}

fn member_type(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let name = r.str();
    let ty = pop1(vm, stack)?.as_type(&vm.types);
    let ty = vm.resolve_type(ty)?;
    let found = match vm.types.kind(ty) {
        TypeKind::Struct => vm.types.field(ty, name).map(|f| f.ty).ok_or_else(|| {
            vm.error(format!("Field '{}' not found", vm.strings.resolve(name)))
        })?,
        TypeKind::Function => vm.types.param(ty, name).map(|p| p.ty).ok_or_else(|| {
            vm.error(format!("Parameter '{}' not found", vm.strings.resolve(name)))
        })?,
        _ => return Err(vm.error("Not a function or struct")),
    };
    stack.push(vm.type_value(found));
    Ok(())
}

// ========== 호출 / 구조체 ==========

fn call(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let function = pop1(vm, stack)?;
    let mut args = Vec::new();
    while let Some(arg) = vm.eval(r)? {
        args.push(arg);
    }
    let result = vm.execute_function(&function, args)?;
    stack.push(result);
    Ok(())
}

fn member(vm: &mut Vm, _: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let name = r.str();
    let target = pop1(vm, stack)?;
    let addr = target.bits(&vm.types);
    if addr == 0 {
        return Err(vm.error("Struct is unset"));
    }
    match vm.walk_struct(target.ty, addr, name) {
        Some(field) => {
            stack.push(field);
            Ok(())
        }
        None => Err(vm.error(format!("Field '{}' not found", vm.strings.resolve(name)))),
    }
}

/// `x::size`, `x::length`, `x::scope`. 추적되지 않는 주소는 u64::MAX.
fn allocation_info(vm: &mut Vm, op: Opcode, _: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
    let var = pop1(vm, stack)?;
    let addr = var.bits(&vm.types);
    let found = vm.heap.find(addr).and_then(|id| vm.heap.get(id));
    let value = match found {
        None => u64::MAX,
        Some(allocation) => match op {
            Opcode::GetSize => allocation.size,
            Opcode::GetScope => allocation.level as u64,
            _ => {
                let t = vm.types.get(var.ty);
                let element = match t.pointer_base() {
                    Some(base) => vm.types.get(base).value_size(),
                    None if t.kind == TypeKind::Struct => t.size,
                    None => 1,
                };
                if element == 0 {
                    allocation.size
                } else {
                    allocation.size / element
                }
            }
        },
    };
    let ty = vm.u64_type();
    stack.push(Variable::rvalue(ty, value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_int_pow() {
        assert_eq!(int_pow(2, 10, true), 1024);
        assert_eq!(int_pow(2, (-1i64) as u64, true), 0);
        assert_eq!(int_pow((-1i64) as u64, (-3i64) as u64, true), u64::MAX);
        assert_eq!(int_pow(1, (-5i64) as u64, true), 1);
        assert_eq!(int_pow(3, 0, false), 1);
    }

    #[test]
    fn test_rule_table_covers_operators() {
        let missing: Vec<Opcode> = (0..=u8::MAX)
            .filter_map(Opcode::from_repr)
            .filter(|op| op.is_operator())
            .filter(|op| !RULES.iter().any(|rule| rule.ops.contains(op)))
            .collect();
        assert_eq!(missing, Vec::<Opcode>::new());
    }
}
