use std::collections::HashSet;

use super::{Field, FieldPlacement, Type, TypeCache, TypeData, TypeError, TypeKind, TypeResult};
use crate::vm::strings::StrId;

impl TypeCache {
    /// Byte span a field occupies inside its struct.
    pub fn field_extent(&self, field: &Field) -> u64 {
        let ty = self.get(field.ty);
        match field.inline {
            Some(count) => ty.size * count,
            None => ty.value_size(),
        }
    }

    fn field_alignment(&self, field: &Field) -> u64 {
        let ty = self.get(field.ty);
        let alignment = match field.inline {
            Some(_) => ty.alignment,
            None => ty.value_size(),
        };
        alignment.max(1)
    }

    /// One pass in declaration order; writes every field offset and the
    /// struct's size and alignment.
    pub(super) fn build_layout(&self, ty: &mut Type) {
        let TypeData::Struct { fields } = &mut ty.data else {
            return;
        };
        let mut size = 0u64;
        let mut max_alignment = 1u64;
        let mut prev_end = 0u64;
        for field in fields.iter_mut() {
            let alignment = self.field_alignment(field);
            field.offset = match field.placement {
                FieldPlacement::Auto => size.next_multiple_of(alignment),
                FieldPlacement::Absolute(offset) => offset,
                FieldPlacement::Relative(delta) => prev_end + delta,
            };
            prev_end = field.offset + self.field_extent(field);
            size = size.max(prev_end);
            max_alignment = max_alignment.max(alignment);
        }
        ty.size = size.next_multiple_of(max_alignment);
        ty.alignment = max_alignment;
    }

    pub(super) fn check_fields(&self, fields: &[Field]) -> TypeResult<()> {
        let mut seen = HashSet::new();
        for field in fields {
            let Some(name) = field.name else {
                continue;
            };
            if !seen.insert(name) {
                return Err(TypeError::DuplicateField(name));
            }
            if name == StrId::NEW || name == StrId::DELETE {
                let ty = self.get(field.ty);
                if ty.kind != TypeKind::Function {
                    return Err(TypeError::MethodNotFunction(name));
                }
                if !ty.params().is_empty() {
                    return Err(TypeError::MethodTakesParameters(name));
                }
            }
        }
        Ok(())
    }
}
