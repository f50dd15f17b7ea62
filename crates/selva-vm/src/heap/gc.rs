// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tracing collector for the Selva heap.
//!
//! The collector works purely by list splicing. At the start of a cycle the
//! `old` list is appended to `active`, so the whole heap sits in one list,
//! and the colour bit flips. Tracing then splices every cell reachable from
//! a root back onto the head of `old`, colouring it on the way. Whatever is
//! still in `active` afterwards is unreachable: the finalizable cells among
//! it release their external buffers, and the whole residue becomes the free
//! pool for the next cycle.
//!
//! Cells never move. Splicing rewires `prev`/`next` links only, so every
//! `CellRef` held by a root keeps pointing at the same cell across any
//! number of collections.

use crate::heap::Heap;
use crate::value::{CellRef, Payload};

impl Heap {
    /// Run a full collection cycle and return the number of freed cells.
    pub fn collect(&mut self) -> usize {
        self.merge_old_into_active();
        self.colour = !self.colour;

        for root in self.root_snapshot() {
            self.trace_from(root);
        }

        self.sweep_finalizable();

        self.next_free = self.active.head;
        let freed = self.count_active();
        self.free_count = freed;
        self.collections += 1;

        tracing::debug!(
            freed,
            live = self.cells.len() - freed,
            cycle = self.collections,
            "collection cycle complete"
        );
        freed
    }

    /// Splice `root` and everything reachable from it onto the `old` list.
    ///
    /// Children are spliced to the head of `old` as they are discovered; the
    /// scan cursor chases them head-ward, so every spliced cell is scanned
    /// exactly once and no native recursion is needed.
    fn trace_from(&mut self, root: CellRef) {
        if self.cells[root.index()].colour == self.colour {
            return;
        }
        self.splice_to_old(root);

        let mut scan = root;
        loop {
            self.trace_children(scan);
            match self.cells[scan.index()].prev {
                Some(prev) => scan = prev,
                None => break,
            }
        }
    }

    /// Splice the not-yet-coloured children of `cell` onto the head of
    /// `old`.
    fn trace_children(&mut self, cell: CellRef) {
        // Collected up front: splicing rewires the links the payload walk
        // would otherwise read through.
        let children = self.child_refs(cell);
        for child in children {
            if self.cells[child.index()].colour != self.colour {
                self.splice_to_old(child);
            }
        }
    }

    /// The cell references a payload holds, per tag.
    fn child_refs(&self, cell: CellRef) -> Vec<CellRef> {
        match &self.cells[cell.index()].payload {
            Payload::Pair { car, cdr } => vec![*car, *cdr],
            Payload::Vector(Some(buffer)) => buffer.to_vec(),
            Payload::CompiledProc {
                code,
                constants,
                env,
            } => vec![*code, *constants, *env],
            Payload::MetaProc { inner, meta } => vec![*inner, *meta],
            Payload::HashTable(Some(body)) => body
                .iter()
                .flat_map(|(&key, &value)| [key, value])
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Move one cell from `active` to the head of `old` and colour it.
    fn splice_to_old(&mut self, cell: CellRef) {
        let (prev, next) = {
            let slot = &self.cells[cell.index()];
            (slot.prev, slot.next)
        };

        match prev {
            Some(prev) => self.cells[prev.index()].next = next,
            None => self.active.head = next,
        }
        match next {
            Some(next) => self.cells[next.index()].prev = prev,
            None => self.active.tail = prev,
        }

        let head = self.old.head;
        {
            let slot = &mut self.cells[cell.index()];
            slot.prev = None;
            slot.next = head;
            slot.colour = self.colour;
        }
        if let Some(head) = head {
            self.cells[head.index()].prev = Some(cell);
        } else {
            self.old.tail = Some(cell);
        }
        self.old.head = Some(cell);
    }

    /// Append the whole `old` list to the tail of `active`.
    fn merge_old_into_active(&mut self) {
        let Some(old_head) = self.old.head else {
            return;
        };
        match self.active.tail {
            Some(tail) => {
                self.cells[tail.index()].next = Some(old_head);
                self.cells[old_head.index()].prev = Some(tail);
            }
            None => self.active.head = Some(old_head),
        }
        self.active.tail = self.old.tail;
        self.old.head = None;
        self.old.tail = None;
    }

    /// Finalize the unreachable members of the finalizable set and retain
    /// the rest for the next cycle.
    fn sweep_finalizable(&mut self) {
        let mut pending = core::mem::take(&mut self.finalizable);
        let mut retained = core::mem::take(&mut self.finalizable_next);
        retained.clear();

        for cell in pending.drain(..) {
            if self.cells[cell.index()].colour == self.colour {
                retained.push(cell);
            } else {
                self.cells[cell.index()].payload.finalize();
            }
        }

        self.finalizable = retained;
        self.finalizable_next = pending;
    }

    /// Number of cells currently on the `active` list.
    fn count_active(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.active.head;
        while let Some(cell) = cursor {
            count += 1;
            cursor = self.cells[cell.index()].next;
        }
        count
    }
}
