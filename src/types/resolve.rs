use std::collections::HashSet;

use super::{Field, Param, Type, TypeCache, TypeData, TypeError, TypeFlags, TypeId, TypeKind, TypeResult, hash_mix};
use crate::vm::strings::StrId;

/// What a deferred name currently refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferTarget {
    Missing,
    NotAType,
    Type(TypeId),
}

impl TypeCache {
    /// Replaces every deferred name below `id` with the type it names.
    ///
    /// Self references come back as real cycles: following a self-referential
    /// pointer field's pointee yields the enclosing struct itself.
    pub fn resolve_defers(
        &mut self,
        id: TypeId,
        lookup: &mut dyn FnMut(StrId) -> DeferTarget,
    ) -> TypeResult<TypeId> {
        let mut ancestors = Vec::new();
        let open = self.resolve_inner(id, lookup, &mut ancestors)?;
        let resolved = if self.get(open).contains_parent {
            self.close_root(open)
        } else {
            open
        };
        let mut path = Vec::new();
        self.validate(resolved, &mut path)?;
        Ok(resolved)
    }

    fn ancestor_ref(&mut self, id: TypeId, ancestors: &[TypeId]) -> Option<TypeId> {
        let at = ancestors.iter().rposition(|&t| t == id)?;
        Some(self.parent_ref((ancestors.len() - at) as u32))
    }

    fn resolve_inner(
        &mut self,
        id: TypeId,
        lookup: &mut dyn FnMut(StrId) -> DeferTarget,
        ancestors: &mut Vec<TypeId>,
    ) -> TypeResult<TypeId> {
        if let Some(parent) = self.ancestor_ref(id, ancestors) {
            return Ok(parent);
        }
        let orig = self.get(id).clone();
        if orig.flags.contains(TypeFlags::CLOSED) {
            return Ok(id);
        }
        let data = match &orig.data {
            TypeData::Deferred { .. } => {
                let mut visited = HashSet::new();
                let target = self.resolve_single_defer(id, lookup, &mut visited)?;
                let ty = self.resolve_inner(target, lookup, ancestors)?;
                return Ok(self.ancestor_ref(ty, ancestors).unwrap_or(ty));
            }
            TypeData::Pointer { base } => {
                ancestors.push(id);
                let base = self.resolve_inner(*base, lookup, ancestors);
                ancestors.pop();
                TypeData::Pointer { base: base? }
            }
            TypeData::Function { ret, params } => {
                ancestors.push(id);
                let resolved = self.resolve_function(*ret, params, lookup, ancestors);
                ancestors.pop();
                let (ret, params) = resolved?;
                TypeData::Function { ret, params }
            }
            TypeData::Struct { fields } => {
                ancestors.push(id);
                let resolved = self.resolve_fields(fields, lookup, ancestors);
                ancestors.pop();
                TypeData::Struct { fields: resolved? }
            }
            _ => return Ok(id),
        };
        let mut ty = Type { data, ..orig };
        if ty.kind == TypeKind::Struct {
            self.build_layout(&mut ty);
        }
        Ok(self.register(ty))
    }

    fn resolve_function(
        &mut self,
        ret: TypeId,
        params: &[Param],
        lookup: &mut dyn FnMut(StrId) -> DeferTarget,
        ancestors: &mut Vec<TypeId>,
    ) -> TypeResult<(TypeId, Vec<Param>)> {
        let ret = self.resolve_inner(ret, lookup, ancestors)?;
        let mut out = Vec::with_capacity(params.len());
        for param in params {
            let ty = self.resolve_inner(param.ty, lookup, ancestors)?;
            out.push(Param { name: param.name, ty });
        }
        Ok((ret, out))
    }

    fn resolve_fields(
        &mut self,
        fields: &[Field],
        lookup: &mut dyn FnMut(StrId) -> DeferTarget,
        ancestors: &mut Vec<TypeId>,
    ) -> TypeResult<Vec<Field>> {
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            let ty = self.resolve_inner(field.ty, lookup, ancestors)?;
            out.push(Field { ty, ..field.clone() });
        }
        Ok(out)
    }

    fn resolve_single_defer(
        &self,
        mut id: TypeId,
        lookup: &mut dyn FnMut(StrId) -> DeferTarget,
        visited: &mut HashSet<TypeId>,
    ) -> TypeResult<TypeId> {
        while let TypeData::Deferred { name } = self.get(id).data {
            if !visited.insert(id) {
                return Err(TypeError::DeferRecurses(name));
            }
            id = match lookup(name) {
                DeferTarget::Missing => return Err(TypeError::DeferNotFound(name)),
                DeferTarget::NotAType => return Err(TypeError::DeferNotAType(name)),
                DeferTarget::Type(target) => target,
            };
        }
        Ok(id)
    }

    fn close_root(&mut self, open: TypeId) -> TypeId {
        if let Some(&closed) = self.closed.get(&open) {
            return closed;
        }
        let mut stack = Vec::new();
        let closed = self.close(open, &mut stack);
        self.closed.insert(open, closed);
        tracing::trace!(open = open.0, closed = closed.0, "closed self-referential type");
        closed
    }

    /// Builds a non-interned copy of `id` where each `Parent(n)` marker points
    /// at the `n`-th enclosing copy.
    fn close(&mut self, id: TypeId, stack: &mut Vec<TypeId>) -> TypeId {
        let orig = self.get(id).clone();
        if !orig.contains_parent {
            return id;
        }
        if let TypeData::Parent { depth } = orig.data {
            return match stack.len().checked_sub(depth as usize) {
                Some(at) => stack[at],
                None => id,
            };
        }
        let new_id = TypeId(self.types.len() as u32);
        let mut copy = orig.clone();
        copy.flags |= TypeFlags::CLOSED;
        copy.hash = hash_mix(orig.hash, TypeFlags::CLOSED.bits() as u64);
        copy.contains_parent = false;
        self.types.push(copy);

        stack.push(new_id);
        let data = match orig.data {
            TypeData::Pointer { base } => TypeData::Pointer {
                base: self.close(base, stack),
            },
            TypeData::Function { ret, params } => TypeData::Function {
                ret: self.close(ret, stack),
                params: params
                    .into_iter()
                    .map(|p| Param {
                        name: p.name,
                        ty: self.close(p.ty, stack),
                    })
                    .collect(),
            },
            TypeData::Struct { fields } => TypeData::Struct {
                fields: fields
                    .into_iter()
                    .map(|f| Field {
                        ty: self.close(f.ty, stack),
                        ..f
                    })
                    .collect(),
            },
            other => other,
        };
        stack.pop();

        let mut closed = self.types[new_id.0 as usize].clone();
        closed.data = data;
        if closed.kind == TypeKind::Struct {
            self.build_layout(&mut closed);
        }
        self.types[new_id.0 as usize] = closed;
        new_id
    }

    /// Inline fields must form a finite tree of structs and named pointers.
    fn validate(&self, id: TypeId, path: &mut Vec<TypeId>) -> TypeResult<()> {
        let ty = self.get(id);
        if ty.kind != TypeKind::Struct {
            return Ok(());
        }
        path.push(id);
        for field in ty.fields() {
            if field.inline.is_none() {
                continue;
            }
            let field_ty = self.get(field.ty);
            if path.contains(&field.ty) || field_ty.kind == TypeKind::Parent {
                return Err(TypeError::InlineRecurses(field.name));
            }
            match field_ty.kind {
                TypeKind::Struct => self.validate(field.ty, path)?,
                TypeKind::Pointer if field.name.is_none() => {
                    return Err(TypeError::InlinePointerUnnamed);
                }
                TypeKind::Pointer => {}
                _ => return Err(TypeError::InlineNotComposite(field.name)),
            }
        }
        path.pop();
        Ok(())
    }
}
