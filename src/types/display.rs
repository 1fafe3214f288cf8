use std::fmt::Write;

use super::{TypeCache, TypeData, TypeId, TypeKind};
use crate::vm::strings::StringPool;

impl TypeCache {
    /// 타입을 소스 표기와 비슷한 문자열로 렌더링. 구조체 역참조는 `S1`처럼 찍힌다.
    pub fn display(&self, id: TypeId, strings: &StringPool) -> String {
        let mut out = String::new();
        let mut structs = Vec::new();
        let mut open = Vec::new();
        self.render(id, strings, &mut structs, &mut open, &mut out);
        out
    }

    fn render(
        &self,
        id: TypeId,
        strings: &StringPool,
        structs: &mut Vec<TypeId>,
        open: &mut Vec<TypeId>,
        out: &mut String,
    ) {
        if let Some(at) = structs.iter().position(|&s| s == id) {
            let _ = write!(out, "S{}", at + 1);
            return;
        }
        if open.contains(&id) {
            out.push_str("(cycle)");
            return;
        }
        let ty = self.get(id);
        if ty.is_const() {
            out.push_str("const ");
        }
        let unsigned = ty.is_unsigned();
        match (&ty.data, ty.kind) {
            (_, TypeKind::Void) => out.push_str("void"),
            (_, TypeKind::Type) => out.push_str("type"),
            (_, TypeKind::Int8) => out.push_str(if unsigned { "u8" } else { "s8" }),
            (_, TypeKind::Int16) => out.push_str(if unsigned { "u16" } else { "s16" }),
            (_, TypeKind::Int32) => out.push_str(if unsigned { "u32" } else { "s32" }),
            (_, TypeKind::Int64) => out.push_str(if unsigned { "u64" } else { "s64" }),
            (_, TypeKind::Float32) => out.push_str("f32"),
            (_, TypeKind::Float64) => out.push_str("f64"),
            (_, TypeKind::Varargs) => out.push_str("..."),
            (TypeData::Pointer { base }, _) => {
                open.push(id);
                self.render(*base, strings, structs, open, out);
                open.pop();
                out.push('#');
            }
            (TypeData::Function { ret, params }, _) => {
                open.push(id);
                self.render(*ret, strings, structs, open, out);
                out.push_str("<-");
                if ty.lvalue_return() {
                    out.push('$');
                }
                out.push('(');
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(param.ty, strings, structs, open, out);
                    if let Some(name) = param.name {
                        let _ = write!(out, " {}", strings.resolve(name));
                    }
                }
                out.push(')');
                open.pop();
            }
            (TypeData::Struct { fields }, _) => {
                structs.push(id);
                let _ = write!(out, "struct S{} {{ ", structs.len());
                for field in fields {
                    if let Some(count) = field.inline {
                        let _ = write!(out, "inline({}) ", count);
                    }
                    match field.inline {
                        Some(count) if count != 1 => out.push_str("..."),
                        _ => self.render(field.ty, strings, structs, open, out),
                    }
                    if let Some(name) = field.name {
                        let _ = write!(out, " {}", strings.resolve(name));
                    }
                    let _ = write!(out, " @ {}; ", field.offset);
                }
                out.push('}');
            }
            (TypeData::Deferred { name }, _) => {
                let _ = write!(out, "(defer {})", strings.resolve(*name));
            }
            (TypeData::Parent { depth }, _) => {
                let _ = write!(out, "(parent {})", depth);
            }
            (TypeData::Primitive, _) => out.push_str("?"),
        }
    }
}
