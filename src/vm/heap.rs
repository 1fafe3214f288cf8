// heap 모듈 - 컨텍스트 소유 힙
//
// 할당은 세대 번호가 붙은 슬롯 배열에 기록된다. 각 항목은 소유 레벨을 기억하므로
// "이 할당이 어느 레벨 소속인가"는 O(1)이다.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocId {
    index: u32,
    generation: u32,
}

/// 해제 시 추가로 해야 할 일
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    None,
    /// `delete` 메서드 실행
    Struct,
    /// 스크립트 함수 해제 (스텁 반납)
    Function(u32),
}

#[derive(Debug)]
pub struct Allocation {
    pub addr: u64,
    pub size: u64,
    pub ty: TypeId,
    pub level: usize,
    pub cleanup: Cleanup,
    /// 생성 순서. 같은 레벨 안에서 최신 것부터 해제한다.
    pub seq: u64,
    memory: Option<(NonNull<u8>, Layout)>,
}

#[derive(Debug, Default)]
struct HeapSlot {
    generation: u32,
    entry: Option<Allocation>,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<HeapSlot>,
    free: Vec<u32>,
    by_addr: HashMap<u64, AllocId>,
    next_seq: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    fn insert(&mut self, allocation: Allocation) -> AllocId {
        let addr = allocation.addr;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(allocation);
                AllocId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(HeapSlot {
                    generation: 0,
                    entry: Some(allocation),
                });
                AllocId {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        self.by_addr.insert(addr, id);
        id
    }

    /// 0으로 채워진 메모리를 할당한다.
    pub fn allocate(&mut self, size: u64, ty: TypeId, level: usize, cleanup: Cleanup) -> Option<(AllocId, *mut u8)> {
        let layout = Layout::from_size_align(size.max(1) as usize, 16).ok()?;
        let memory = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.insert(Allocation {
            addr: memory.as_ptr() as u64,
            size,
            ty,
            level,
            cleanup,
            seq,
            memory: Some((memory, layout)),
        });
        tracing::trace!(size, level, "allocated");
        Some((id, memory.as_ptr()))
    }

    /// 힙 메모리 없이 주소만 추적한다 (함수 스텁).
    pub fn track(&mut self, addr: u64, ty: TypeId, level: usize, cleanup: Cleanup) -> AllocId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(Allocation {
            addr,
            size: 0,
            ty,
            level,
            cleanup,
            seq,
            memory: None,
        })
    }

    pub fn find(&self, addr: u64) -> Option<AllocId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn get(&self, id: AllocId) -> Option<&Allocation> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn set_level(&mut self, id: AllocId, level: usize) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation {
                if let Some(entry) = slot.entry.as_mut() {
                    entry.level = level;
                }
            }
        }
    }

    /// 추적에서 뺀다. 메모리는 `release`에서 돌려준다.
    pub fn take(&mut self, id: AllocId) -> Option<Allocation> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.by_addr.remove(&entry.addr);
        Some(entry)
    }

    pub fn release(&mut self, allocation: Allocation) {
        if let Some((memory, layout)) = allocation.memory {
            unsafe { alloc::dealloc(memory.as_ptr(), layout) };
        }
        tracing::trace!(size = allocation.size, "released");
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(Allocation {
                memory: Some((memory, layout)),
                ..
            }) = slot.entry.take()
            {
                unsafe { alloc::dealloc(memory.as_ptr(), layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_invalidates_stale_ids() {
        let mut heap = Heap::new();
        let ty = TypeId(0);
        let (a, addr) = heap.allocate(16, ty, 0, Cleanup::None).unwrap();
        assert_eq!(heap.find(addr as u64), Some(a));
        let taken = heap.take(a).unwrap();
        heap.release(taken);
        assert!(heap.get(a).is_none());
        assert!(heap.find(addr as u64).is_none());

        let (b, _) = heap.allocate(8, ty, 1, Cleanup::None).unwrap();
        assert_ne!(a, b);
        assert!(heap.take(a).is_none());
        assert_eq!(heap.get(b).map(|e| e.level), Some(1));
    }

    #[test]
    fn test_memory_is_zeroed() {
        let mut heap = Heap::new();
        let (_, addr) = heap.allocate(32, TypeId(0), 0, Cleanup::None).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(addr, 32) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
