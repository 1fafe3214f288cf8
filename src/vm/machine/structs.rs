// structs 모듈 - 구조체 타입 생성, 필드 탐색, 생성자/소멸자

use crate::types::{Field, FieldPlacement, TypeId, TypeKind};
use crate::vm::bytecode::BytecodeReader;
use crate::vm::strings::StrId;
use crate::vm::value::{Origin, Variable, write_raw};

use super::{Vm, VmResult};

impl Vm {
    // ========== 타입 생성 ==========

    /// `struct [: Base] { fields }` 본문을 읽어 구조체 타입을 만든다.
    pub(super) fn eval_struct_type(&mut self, r: &mut BytecodeReader) -> VmResult<TypeId> {
        let base = if r.bool() {
            let base = self.eval_value(r)?;
            Some(self.expect_type(&base)?)
        } else {
            None
        };

        let mut fields = Vec::new();
        while r.bool() {
            let row = r.i32();
            let col = r.i32();
            self.set_position(row, col);
            fields.push(self.eval_field(r)?);
        }
        match self.types.structure(fields, base) {
            Ok(ty) => Ok(ty),
            Err(e) => Err(self.error(e.describe(&self.strings))),
        }
    }

    fn eval_field(&mut self, r: &mut BytecodeReader) -> VmResult<Field> {
        let inline = if r.bool() {
            if r.bool() {
                let count = self.eval_value(r)?;
                if !self.kind_of(&count).is_integer() {
                    return Err(self.error("Inline count is not an integer"));
                }
                Some(count.bits(&self.types))
            } else {
                Some(1)
            }
        } else {
            None
        };

        let ty_var = self.eval_value(r)?;
        let ty = self.expect_type(&ty_var)?;
        let name = if r.bool() { Some(r.str()) } else { None };
        let mut field = Field::new(name, ty);
        field.inline = inline;

        if r.bool() {
            if r.bool() {
                let capture = r.capture_mode();
                let chunk = r.chunk().clone();
                let (entry, len) = r.skip();
                let name = name.unwrap_or(StrId::ANONYMOUS);
                field.value = self.generate_function(chunk, entry, len, capture, ty, name, false)?;
            } else {
                let value = self.eval_value(r)?;
                field.value = match self.types.kind(ty) {
                    // 아직 선언되지 않은 타입을 가리킬 수 있으므로 해석하지 않는다.
                    TypeKind::Pointer | TypeKind::Deferred => value.bits(&self.types),
                    _ => self.cast(ty, &value, false)?.bits(&self.types),
                };
            }
        }

        if r.bool() {
            let relative = r.bool();
            let offset = self.eval_value(r)?;
            if !self.kind_of(&offset).is_integer() {
                return Err(self.error("Field offset is not an integer"));
            }
            let offset = offset.bits(&self.types);
            field.placement = if relative {
                FieldPlacement::Relative(offset)
            } else {
                FieldPlacement::Absolute(offset)
            };
        }
        Ok(field)
    }

    // ========== 필드 ==========

    /// `addr`에 있는 `ty` 구조체에서 `name` 필드를 찾는다.
    ///
    /// 이름 없는 인라인 필드는 안쪽까지 먼저 찾는다. 인라인 필드는 주소 rvalue,
    /// const 필드는 값 rvalue, 나머지는 lvalue. 함수 필드는 `this`가 묶인다.
    pub(crate) fn walk_struct(&self, ty: TypeId, addr: u64, name: StrId) -> Option<Variable> {
        let fields = self.types.get(ty).fields();
        for field in fields {
            let at = addr.wrapping_add(field.offset);
            if field.inline.is_some() && field.name.is_none() {
                if self.types.kind(field.ty) == TypeKind::Struct {
                    if let Some(found) = self.walk_struct(field.ty, at, name) {
                        return Some(found);
                    }
                }
                continue;
            }
            if field.name != Some(name) {
                continue;
            }
            if field.inline.is_some() {
                return Some(Variable::rvalue(field.ty, at));
            }
            let field_ty = self.types.get(field.ty);
            let mut var = Variable::at(field.ty, at as *mut u8);
            if field_ty.is_const() {
                var = var.to_rvalue(&self.types);
            }
            if field_ty.kind == TypeKind::Function {
                var.origin = Some(Origin {
                    name,
                    this: Some((ty, addr)),
                });
            }
            return Some(var);
        }
        None
    }

    /// 필드 기본값을 채운다. 인라인 구조체는 원소마다 재귀한다.
    pub(crate) fn init_struct(&self, ty: TypeId, addr: u64) {
        for field in self.types.get(ty).fields() {
            let field_ty = self.types.get(field.ty);
            let at = addr.wrapping_add(field.offset);
            match field.inline {
                Some(count) if field_ty.kind == TypeKind::Struct => {
                    for i in 0..count {
                        self.init_struct(field.ty, at + i * field_ty.size);
                    }
                }
                Some(_) => {}
                None => {
                    let value = if field.value == 0 && field_ty.kind == TypeKind::Type {
                        self.types.void().to_bits()
                    } else {
                        field.value
                    };
                    if value != 0 {
                        unsafe { write_raw(at as *mut u8, field_ty.value_size(), value) };
                    }
                }
            }
        }
    }

    /// `new [S] { .name = value }`의 덮어쓰기. const 필드도 여기서는 쓸 수 있다.
    pub(super) fn override_field(&mut self, ty: TypeId, addr: u64, name: StrId, value: &Variable) -> VmResult<()> {
        let Some((offset, field)) = self.find_field(ty, name) else {
            return Err(self.error(format!(
                "Field '{}' doesn't exist",
                self.strings.resolve(name)
            )));
        };
        if field.inline.is_some() {
            return Err(self.error(format!(
                "Cannot assign to inline field '{}'",
                self.strings.resolve(name)
            )));
        }
        let converted = self.cast(field.ty, value, false)?;
        let size = self.types.get(field.ty).value_size();
        let bits = converted.bits(&self.types);
        unsafe { write_raw(addr.wrapping_add(offset) as *mut u8, size, bits) };
        Ok(())
    }

    /// 이름 없는 인라인 필드 안까지 찾아 (구조체 기준 오프셋, 필드)를 돌려준다.
    fn find_field(&self, ty: TypeId, name: StrId) -> Option<(u64, Field)> {
        for field in self.types.get(ty).fields() {
            if field.inline.is_some() && field.name.is_none() {
                if let Some((inner, found)) = self.find_field(field.ty, name) {
                    return Some((field.offset + inner, found));
                }
                continue;
            }
            if field.name == Some(name) {
                return Some((field.offset, field.clone()));
            }
        }
        None
    }

    // ========== 생성자 / 소멸자 ==========

    /// `new` 메서드가 있으면 호출한다.
    pub(super) fn construct(&mut self, ty: TypeId, addr: u64) -> VmResult<()> {
        self.call_method(ty, addr, StrId::NEW)
    }

    /// `delete` 메서드가 있으면 호출한다 (레벨 해제, `delete(x)`).
    pub(super) fn destruct(&mut self, ty: TypeId, addr: u64) -> VmResult<()> {
        self.call_method(ty, addr, StrId::DELETE)
    }

    fn call_method(&mut self, ty: TypeId, addr: u64, name: StrId) -> VmResult<()> {
        let Some(method) = self.walk_struct(ty, addr, name) else {
            return Ok(());
        };
        if self.kind_of(&method) != TypeKind::Function || method.bits(&self.types) == 0 {
            return Ok(());
        }
        self.execute_function(&method, Vec::new())?;
        Ok(())
    }
}
