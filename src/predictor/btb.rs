
use crate::{Addr, BRANCH_SHIFT};

/// An entry in the branch target buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BtbEntry<O> {
    /// Address of the branch
    addr: Addr,

    /// Opcode of the branch
    op: O,

    /// Predicted target
    tgt: Addr,
}
impl <O: Copy> BtbEntry<O> {
    pub fn addr(&self) -> Addr { self.addr }
    pub fn op(&self) -> O { self.op }
    pub fn target(&self) -> Addr { self.tgt }
}

/// A way in a set, linked into the set's LRU list by index.
#[derive(Clone, Copy, Debug)]
struct Way<O> {
    entry: Option<BtbEntry<O>>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// One set of the BTB. Every way (valid or not) is on the LRU list.
#[derive(Clone, Debug)]
struct BtbSet<O> {
    ways: Vec<Way<O>>,
    /// Most-recently used way
    head: usize,
    /// Least-recently used way
    tail: usize,
}
impl <O: Copy> BtbSet<O> {
    fn new(assoc: usize) -> Self {
        let ways = (0..assoc).map(|i| Way {
            entry: None,
            prev: i.checked_sub(1),
            next: if i + 1 < assoc { Some(i + 1) } else { None },
        }).collect();
        Self { ways, head: 0, tail: assoc - 1 }
    }

    fn find(&self, addr: Addr) -> Option<usize> {
        self.ways.iter().position(|w| matches!(w.entry, Some(e) if e.addr == addr))
    }

    /// Move a way to the head of the LRU list.
    fn promote(&mut self, way: usize) {
        if self.head == way {
            return;
        }
        let Way { prev, next, .. } = self.ways[way];

        // Unlink. Anything but the head has a predecessor.
        if let Some(p) = prev {
            self.ways[p].next = next;
            match next {
                Some(n) => self.ways[n].prev = Some(p),
                None => self.tail = p,
            }
        }

        // Relink at the head
        self.ways[self.head].prev = Some(way);
        self.ways[way].prev = None;
        self.ways[way].next = Some(self.head);
        self.head = way;
    }

    /// Ways from most to least recently used.
    fn lru_order(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(self.head), |&w| self.ways[w].next)
            .take(self.ways.len())
    }
}

/// A set-associative branch target buffer with LRU replacement.
#[derive(Clone, Debug)]
pub struct Btb<O> {
    sets: Vec<BtbSet<O>>,
    assoc: usize,
}
impl <O: Copy> Btb<O> {
    /// Create a BTB with `sets` sets of `assoc` ways. Zero sets create a
    /// BTB which never hits.
    pub fn new(sets: usize, assoc: usize) -> Self {
        assert!(sets == 0 || (sets.is_power_of_two() && assoc.is_power_of_two()));
        let sets = if sets == 0 { Vec::new() } else { vec![BtbSet::new(assoc); sets] };
        Self { sets, assoc }
    }

    pub fn num_sets(&self) -> usize { self.sets.len() }
    pub fn assoc(&self) -> usize { self.assoc }
    pub fn is_enabled(&self) -> bool { !self.sets.is_empty() }

    pub fn set_index(&self, addr: Addr) -> usize {
        ((addr >> BRANCH_SHIFT) as usize) & (self.sets.len() - 1)
    }

    /// Return the predicted target for `addr`, making the entry the most
    /// recently used in its set.
    pub fn lookup(&mut self, addr: Addr) -> Option<Addr> {
        if self.sets.is_empty() {
            return None;
        }
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        let way = set.find(addr)?;
        set.promote(way);
        set.ways[way].entry.map(|e| e.tgt)
    }

    /// Read an entry without disturbing the replacement state.
    pub fn probe(&self, addr: Addr) -> Option<&BtbEntry<O>> {
        if self.sets.is_empty() {
            return None;
        }
        let set = &self.sets[self.set_index(addr)];
        set.find(addr).and_then(|w| set.ways[w].entry.as_ref())
    }

    /// Record the target of a taken branch. Returns 'true' if the branch
    /// already had an entry.
    pub fn update(&mut self, addr: Addr, op: O, tgt: Addr) -> bool {
        if self.sets.is_empty() {
            return false;
        }
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        if let Some(way) = set.find(addr) {
            if let Some(e) = set.ways[way].entry.as_mut() {
                e.op = op;
                e.tgt = tgt;
            }
            set.promote(way);
            return true;
        }

        // Replace the least-recently used way
        let victim = set.tail;
        set.ways[victim].entry = Some(BtbEntry { addr, op, tgt });
        set.promote(victim);
        false
    }

    /// Addresses held by the set for `addr`, from most to least recently
    /// used.
    pub fn set_contents(&self, addr: Addr) -> Vec<Addr> {
        if self.sets.is_empty() {
            return Vec::new();
        }
        let set = &self.sets[self.set_index(addr)];
        set.lru_order()
            .filter_map(|w| set.ways[w].entry.map(|e| e.addr))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BranchKind;

    #[test]
    fn hit_after_update() {
        let mut btb: Btb<BranchKind> = Btb::new(16, 2);
        assert_eq!(btb.lookup(0x100), None);
        assert!(!btb.update(0x100, BranchKind::DirectJump, 0x800));
        assert_eq!(btb.lookup(0x100), Some(0x800));
        assert!(btb.update(0x100, BranchKind::IndirectJump, 0x900));
        assert_eq!(btb.lookup(0x100), Some(0x900));
        assert_eq!(btb.probe(0x100).map(|e| e.op()), Some(BranchKind::IndirectJump));
        assert_eq!(btb.set_contents(0x100), vec![0x100]);
    }

    #[test]
    fn evicts_lru() {
        let mut btb: Btb<BranchKind> = Btb::new(1, 4);
        for i in 0..4 {
            btb.update(i * 4, BranchKind::DirectJump, 0x1000 + i);
        }
        assert_eq!(btb.set_contents(0), vec![12, 8, 4, 0]);

        // Touching the oldest entry protects it
        assert_eq!(btb.lookup(0), Some(0x1000));
        assert_eq!(btb.set_contents(0), vec![0, 12, 8, 4]);

        btb.update(16, BranchKind::DirectJump, 0x2000);
        assert_eq!(btb.set_contents(0), vec![16, 0, 12, 8]);
        assert_eq!(btb.lookup(4), None);
        assert_eq!(btb.lookup(16), Some(0x2000));
    }

    #[test]
    fn no_duplicates() {
        let mut btb: Btb<BranchKind> = Btb::new(2, 2);
        for _ in 0..5 {
            btb.update(0x10, BranchKind::DirectJump, 0x20);
        }
        assert_eq!(btb.set_contents(0x10), vec![0x10]);
    }

    #[test]
    fn disabled() {
        let mut btb: Btb<BranchKind> = Btb::new(0, 0);
        assert!(!btb.update(0x10, BranchKind::DirectJump, 0x20));
        assert_eq!(btb.lookup(0x10), None);
    }
}
