// function 모듈 - 스크립트 함수와 스텁 레지스트리
//
// 변수에 담긴 함수 값은 항상 호출 가능한 코드 주소다. 스크립트 함수라면 그 주소는
// JIT 스텁이고, 레지스트리에서 주소로 찾아 구분한다 (바이트 검사 없음).

use std::collections::HashMap;
use std::rc::Rc;

use crate::types::TypeId;
use crate::vm::bytecode::{CaptureMode, Chunk};
use crate::vm::strings::StrId;
use crate::vm::value::Variable;

/// 호출 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Native(u64),
    Script(u32),
}

#[derive(Debug)]
pub struct ScriptFunction {
    pub name: StrId,
    pub file: StrId,
    pub chunk: Rc<Chunk>,
    pub entry: usize,
    pub len: usize,
    pub capture: CaptureMode,
    pub captured: Vec<(StrId, Variable)>,
    pub ty: TypeId,
    pub stub: u64,
    /// 캡처 없는 함수는 본문 위치로 캐시된다.
    pub cache_key: Option<(usize, usize)>,
}

/// 스텁 id로 색인되는 함수 표. 해제된 함수의 스텁은 시그니처별로 재사용한다.
#[derive(Debug, Default)]
pub struct FunctionTable {
    slots: Vec<Option<ScriptFunction>>,
    stubs: Vec<u64>,
    by_addr: HashMap<u64, u32>,
    free: HashMap<TypeId, Vec<u32>>,
    cache: HashMap<(usize, usize), u32>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, addr: u64) -> Callee {
        match self.by_addr.get(&addr) {
            Some(&id) => Callee::Script(id),
            None => Callee::Native(addr),
        }
    }

    pub fn get(&self, id: u32) -> Option<&ScriptFunction> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn cached(&self, key: (usize, usize)) -> Option<u64> {
        let id = self.cache.get(&key)?;
        self.get(*id).map(|f| f.stub)
    }

    /// 같은 시그니처의 반납된 스텁 (id, 주소)
    pub fn reuse(&mut self, ty: TypeId) -> Option<(u32, u64)> {
        let id = self.free.get_mut(&ty)?.pop()?;
        Some((id, self.stubs[id as usize]))
    }

    /// 새 스텁에 쓸 id
    pub fn next_id(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn insert(&mut self, id: u32, function: ScriptFunction) {
        let index = id as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
            self.stubs.resize(index + 1, 0);
        }
        self.stubs[index] = function.stub;
        self.by_addr.insert(function.stub, id);
        if let Some(key) = function.cache_key {
            self.cache.insert(key, id);
        }
        self.slots[index] = Some(function);
    }

    pub fn release(&mut self, id: u32) -> Option<ScriptFunction> {
        let function = self.slots.get_mut(id as usize)?.take()?;
        self.by_addr.remove(&function.stub);
        if let Some(key) = function.cache_key {
            self.cache.remove(&key);
        }
        self.free.entry(function.ty).or_default().push(id);
        tracing::trace!(id, "function released");
        Some(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(ty: TypeId, stub: u64, key: Option<(usize, usize)>) -> ScriptFunction {
        ScriptFunction {
            name: StrId::ANONYMOUS,
            file: StrId::GLOBAL,
            chunk: Chunk::new(Vec::new()),
            entry: 0,
            len: 0,
            capture: CaptureMode::None,
            captured: Vec::new(),
            ty,
            stub,
            cache_key: key,
        }
    }

    #[test]
    fn test_classify_and_release() {
        let mut table = FunctionTable::new();
        let ty = TypeId(42);
        let id = table.next_id();
        table.insert(id, function(ty, 0x1000, Some((1, 2))));
        assert_eq!(table.classify(0x1000), Callee::Script(id));
        assert_eq!(table.classify(0x2000), Callee::Native(0x2000));
        assert_eq!(table.cached((1, 2)), Some(0x1000));

        table.release(id);
        assert_eq!(table.classify(0x1000), Callee::Native(0x1000));
        assert_eq!(table.cached((1, 2)), None);
        assert_eq!(table.reuse(TypeId(7)), None);
        assert_eq!(table.reuse(ty), Some((id, 0x1000)));
    }
}
