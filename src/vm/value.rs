// value 모듈 - 변수 핸들과 메모리 읽기/쓰기
//
// 모든 값은 8바이트 안에 들어간다. 구조체는 데이터 주소, 함수는 호출 가능한
// 코드 주소, 타입은 TypeId를 담는다.

use std::cell::Cell;
use std::rc::Rc;

use crate::types::{Type, TypeCache, TypeId, TypeKind};
use crate::vm::fault;
use crate::vm::strings::{StrId, StringPool};

// ========== 저장소 ==========

/// 이름 붙은 변수의 저장 칸. 캡처(`[$]`)는 같은 칸을 Rc로 공유한다.
#[derive(Debug, Default)]
pub struct Slot(Cell<u64>);

impl Slot {
    pub fn new(bits: u64) -> Rc<Self> {
        Rc::new(Slot(Cell::new(bits)))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr() as *mut u8
    }
}

/// 값이 어디에 있는지. `Value`만 rvalue다.
#[derive(Debug, Clone)]
pub enum Place {
    Value(u64),
    Slot(Rc<Slot>),
    Ref(*mut u8),
}

/// 함수 값이 어떤 이름으로 불렸는지, 메서드라면 어느 구조체에 묶였는지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub name: StrId,
    pub this: Option<(TypeId, u64)>,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub ty: TypeId,
    pub place: Place,
    pub origin: Option<Origin>,
}

// ========== 원시 메모리 접근 ==========

/// `size` 바이트를 리틀 엔디언으로 읽는다. 폴트가 나면 0을 읽은 것으로 하고
/// 폴트는 `fault::take_pending`으로 넘긴다.
///
/// # Safety
/// `ptr`은 `size` 바이트 이상 읽을 수 있어야 한다.
pub unsafe fn read_raw(ptr: *const u8, size: u64) -> u64 {
    let mut buf = [0u8; 8];
    let size = size.min(8) as usize;
    unsafe { fault::copy_guarded(ptr, buf.as_mut_ptr(), size) };
    u64::from_le_bytes(buf)
}

/// # Safety
/// `ptr`은 `size` 바이트 이상 쓸 수 있어야 한다.
pub unsafe fn write_raw(ptr: *mut u8, size: u64, bits: u64) {
    let buf = bits.to_le_bytes();
    let size = size.min(8) as usize;
    unsafe { fault::copy_guarded(buf.as_ptr(), ptr, size) };
}

/// `value_size`로 자르고 부호 있는 정수는 부호 확장한다.
pub fn extend(bits: u64, ty: &Type) -> u64 {
    let size = ty.value_size();
    if size == 0 {
        return 0;
    }
    if size >= 8 {
        return bits;
    }
    let shift = 64 - size * 8;
    if ty.is_signed_integer() {
        (((bits << shift) as i64) >> shift) as u64
    } else {
        (bits << shift) >> shift
    }
}

// ========== Variable ==========

impl Variable {
    pub fn rvalue(ty: TypeId, bits: u64) -> Self {
        Variable {
            ty,
            place: Place::Value(bits),
            origin: None,
        }
    }

    pub fn slot(ty: TypeId, slot: Rc<Slot>) -> Self {
        Variable {
            ty,
            place: Place::Slot(slot),
            origin: None,
        }
    }

    pub fn at(ty: TypeId, addr: *mut u8) -> Self {
        Variable {
            ty,
            place: Place::Ref(addr),
            origin: None,
        }
    }

    pub fn is_lvalue(&self) -> bool {
        !matches!(self.place, Place::Value(_))
    }

    /// 저장소 주소 (`$x`)
    pub fn address(&self) -> Option<*mut u8> {
        match &self.place {
            Place::Value(_) => None,
            Place::Slot(slot) => Some(slot.as_ptr()),
            Place::Ref(addr) => Some(*addr),
        }
    }

    pub fn bits(&self, types: &TypeCache) -> u64 {
        let ty = types.get(self.ty);
        let raw = match &self.place {
            Place::Value(bits) => *bits,
            Place::Slot(slot) => slot.get(),
            Place::Ref(addr) => unsafe { read_raw(*addr, ty.value_size()) },
        };
        extend(raw, ty)
    }

    /// lvalue에 값을 쓴다. rvalue라면 아무 일도 하지 않는다.
    pub fn store(&self, types: &TypeCache, bits: u64) {
        let size = types.get(self.ty).value_size();
        match &self.place {
            Place::Value(_) => {}
            Place::Slot(slot) => unsafe { write_raw(slot.as_ptr(), size, bits) },
            Place::Ref(addr) => unsafe { write_raw(*addr, size, bits) },
        }
    }

    /// 현재 값의 rvalue 사본
    pub fn to_rvalue(&self, types: &TypeCache) -> Variable {
        Variable {
            ty: self.ty,
            place: Place::Value(self.bits(types)),
            origin: self.origin,
        }
    }

    pub fn as_f64(&self, types: &TypeCache) -> f64 {
        let bits = self.bits(types);
        let ty = types.get(self.ty);
        match ty.kind {
            TypeKind::Float32 => f32::from_bits(bits as u32) as f64,
            TypeKind::Float64 => f64::from_bits(bits),
            _ if ty.is_unsigned() || !ty.kind.is_integer() => bits as f64,
            _ => bits as i64 as f64,
        }
    }

    /// 타입 정보 없이 저장소에서 `size` 바이트를 읽는다.
    pub fn raw_bits(&self, size: u64) -> u64 {
        match &self.place {
            Place::Value(bits) => *bits,
            Place::Slot(slot) => slot.get(),
            Place::Ref(addr) => unsafe { read_raw(*addr, size) },
        }
    }

    pub fn as_type(&self, types: &TypeCache) -> TypeId {
        TypeId::from_bits(self.bits(types))
    }

    /// 부호 있는 정수이면서 음수인지
    pub fn is_negative(&self, types: &TypeCache) -> bool {
        types.get(self.ty).is_signed_integer() && (self.bits(types) as i64) < 0
    }

    /// 값을 사람이 읽을 수 있는 형태로 출력한다.
    pub fn render(&self, types: &TypeCache, strings: &StringPool) -> String {
        render_value(types, strings, self.ty, self.bits(types))
    }
}

fn render_value(types: &TypeCache, strings: &StringPool, id: TypeId, bits: u64) -> String {
    let ty = types.get(id);
    if let Some(base) = ty.pointer_base() {
        let base = types.get(base);
        if base.kind == TypeKind::Int8 && !base.is_unsigned() && bits != 0 {
            let text = unsafe { std::ffi::CStr::from_ptr(bits as *const std::ffi::c_char) };
            return format!("\"{}\"", escape_string(&text.to_string_lossy()));
        }
    }
    match ty.kind {
        TypeKind::Void => "(void)".to_string(),
        TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => {
            if ty.is_unsigned() {
                bits.to_string()
            } else {
                (bits as i64).to_string()
            }
        }
        TypeKind::Float32 => format_general(f32::from_bits(bits as u32) as f64),
        TypeKind::Float64 => format_general(f64::from_bits(bits)),
        TypeKind::Pointer => format!("0x{:016x}", bits),
        TypeKind::Type => types.display(TypeId::from_bits(bits), strings),
        TypeKind::Struct if bits == 0 => "(null)".to_string(),
        TypeKind::Struct => {
            let mut out = String::from("{");
            let fields = ty.fields();
            for (i, field) in fields.iter().enumerate() {
                let name = field.name.map_or("<anonymous>", |n| strings.resolve(n));
                let addr = bits + field.offset;
                let value = match field.inline {
                    Some(_) => render_value(types, strings, field.ty, addr),
                    None => {
                        let field_ty = types.get(field.ty);
                        let raw = unsafe { read_raw(addr as *const u8, field_ty.value_size()) };
                        render_value(types, strings, field.ty, extend(raw, field_ty))
                    }
                };
                out.push_str(&format!(" {} = {}", name, value));
                if i + 1 < fields.len() {
                    out.push(',');
                }
            }
            out.push_str(" }");
            out
        }
        _ => types.display(id, strings),
    }
}

/// C의 `%g`와 같은 모양 (유효숫자 6자리)
pub fn format_general(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:.5e}", value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }
    let fixed = format!("{:.*}", (5 - exp) as usize, value);
    trim_fraction(&fixed).to_string()
}

fn trim_fraction(text: &str) -> &str {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.')
}

pub fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_sign() {
        let mut types = TypeCache::new();
        let s8 = types.primitive(TypeKind::Int8);
        let u8_ = types.unsign(s8);
        assert_eq!(extend(0xFF, types.get(s8)), u64::MAX);
        assert_eq!(extend(0x1FF, types.get(u8_)), 0xFF);
    }

    #[test]
    fn test_slot_store_is_width_limited() {
        let mut types = TypeCache::new();
        let s16 = types.primitive(TypeKind::Int16);
        let var = Variable::slot(s16, Slot::new(0));
        var.store(&types, 0x1_8000);
        assert_eq!(var.bits(&types) as i64, -32768);
    }

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(0.5), "0.5");
        assert_eq!(format_general(3.5), "3.5");
        assert_eq!(format_general(100.0), "100");
        assert_eq!(format_general(1e20), "1e+20");
        assert_eq!(format_general(0.0001), "0.0001");
        assert_eq!(format_general(1.0 / 3.0), "0.333333");
    }
}
