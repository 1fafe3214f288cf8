// scope 모듈 - 렉시컬 레벨 스택과 호출 프레임

use std::collections::HashMap;
use std::rc::Rc;

use super::heap::AllocId;
use super::strings::StrId;
use super::value::Variable;

/// 블록 하나에 대응하는 레벨. 변수와 이 레벨이 소유한 할당을 가진다.
#[derive(Debug, Default)]
pub struct Level {
    vars: HashMap<StrId, Variable>,
    order: Vec<StrId>,
    pub allocs: Vec<AllocId>,
}

impl Level {
    /// 선언 순서대로 변수를 꺼낸다.
    pub fn drain_vars(&mut self) -> Vec<Variable> {
        let mut out = Vec::with_capacity(self.order.len());
        for name in self.order.drain(..) {
            if let Some(var) = self.vars.remove(&name) {
                out.push(var);
            }
        }
        out
    }

    pub fn names(&self) -> &[StrId] {
        &self.order
    }
}

/// 호출 스택의 한 프레임. 에러 추적용 위치와 첫 레벨 인덱스를 기록한다.
#[derive(Debug, Clone)]
pub struct Frame {
    pub name: StrId,
    pub file: StrId,
    pub row: i32,
    pub col: i32,
    pub base: usize,
    /// `...`로 받은 인자들
    pub varargs: Option<Rc<Vec<Variable>>>,
}

impl Frame {
    pub fn new(name: StrId, file: StrId, base: usize) -> Self {
        Frame {
            name,
            file,
            row: 0,
            col: 0,
            base,
            varargs: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scopes {
    levels: Vec<Level>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn push(&mut self) {
        self.levels.push(Level::default());
    }

    pub fn pop(&mut self) -> Option<Level> {
        self.levels.pop()
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    /// 가장 안쪽 레벨에 변수를 만든다. 이미 있으면 false.
    pub fn declare(&mut self, name: StrId, var: Variable) -> bool {
        let Some(level) = self.levels.last_mut() else {
            return false;
        };
        if level.vars.contains_key(&name) {
            return false;
        }
        level.order.push(name);
        level.vars.insert(name, var);
        true
    }

    /// 함수 안에서는 자기 레벨들과 전역 레벨(0)만 보인다.
    pub fn lookup(&self, name: StrId, base: usize) -> Option<&Variable> {
        let index = self.level_of(name, base)?;
        self.levels[index].vars.get(&name)
    }

    pub fn lookup_mut(&mut self, name: StrId, base: usize) -> Option<&mut Variable> {
        let index = self.level_of(name, base)?;
        self.levels[index].vars.get_mut(&name)
    }

    pub fn level_of(&self, name: StrId, base: usize) -> Option<usize> {
        (0..self.levels.len())
            .rev()
            .filter(|&i| i == 0 || i >= base)
            .find(|&i| self.levels[i].vars.contains_key(&name))
    }

    /// 캡처 대상: `base`부터 위쪽 레벨의 모든 변수 (전역 제외)
    pub fn visible_from(&self, base: usize) -> Vec<(StrId, Variable)> {
        let mut out = Vec::new();
        for level in self.levels.iter().skip(base.max(1)) {
            for name in &level.order {
                if let Some(var) = level.vars.get(name) {
                    out.push((*name, var.clone()));
                }
            }
        }
        out
    }

    pub fn add_alloc(&mut self, level: usize, id: AllocId) {
        if let Some(level) = self.levels.get_mut(level) {
            level.allocs.push(id);
        }
    }

    pub fn remove_alloc(&mut self, level: usize, id: AllocId) {
        if let Some(level) = self.levels.get_mut(level) {
            level.allocs.retain(|&a| a != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    fn var(bits: u64) -> Variable {
        Variable::rvalue(TypeId(0), bits)
    }

    #[test]
    fn test_function_levels_hide_callers() {
        let mut scopes = Scopes::new();
        scopes.push();
        let g = StrId(100);
        let local = StrId(101);
        scopes.declare(g, var(1));
        scopes.push();
        scopes.declare(local, var(2));
        // 함수 프레임은 레벨 2부터
        scopes.push();
        assert!(scopes.lookup(g, 2).is_some());
        assert!(scopes.lookup(local, 2).is_none());
        assert!(scopes.lookup(local, 0).is_some());
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let mut scopes = Scopes::new();
        scopes.push();
        assert!(scopes.declare(StrId(9), var(1)));
        assert!(!scopes.declare(StrId(9), var(2)));
        scopes.push();
        assert!(scopes.declare(StrId(9), var(3)));
    }

    #[test]
    fn test_drain_in_declaration_order() {
        let mut scopes = Scopes::new();
        scopes.push();
        for i in [30u32, 10, 20] {
            scopes.declare(StrId(i), var(i as u64));
        }
        let mut level = scopes.pop().unwrap();
        let order: Vec<u64> = level
            .drain_vars()
            .iter()
            .map(|v| match v.place {
                crate::vm::value::Place::Value(b) => b,
                _ => 0,
            })
            .collect();
        assert_eq!(order, vec![30, 10, 20]);
    }
}
