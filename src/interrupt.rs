//! Pending interrupt (ice) blocks and how a pending count becomes placements.

use rand::Rng;
use rand::seq::index::sample;
use serde::Serialize;

use crate::config::{MAX_ICE_ROWS, WIDTH};

pub const MAX_PARTIAL: usize = WIDTH - 1;

#[derive(Clone, Debug, Default, Serialize)]
pub struct InterruptQueue {
    /// Incoming ice not yet dropped.
    pub pending: u32,
}

impl InterruptQueue {
    pub fn add(&mut self, count: u32) {
        self.pending = self.pending.saturating_add(count);
    }

    pub fn cancel(&mut self, count: u32) -> u32 {
        let taken = count.min(self.pending);
        self.pending -= taken;
        taken
    }

    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

/// One ice drop: `rows` complete rows plus one block in each listed column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IcePlacement {
    pub rows: u8,
    pub columns: Vec<u8>,
}

impl IcePlacement {
    pub fn count(&self) -> u32 {
        self.rows as u32 * WIDTH as u32 + self.columns.len() as u32
    }

    pub fn per_column(&self) -> [usize; WIDTH] {
        let mut counts = [self.rows as usize; WIDTH];
        for &c in &self.columns {
            if let Some(n) = counts.get_mut(c as usize) {
                *n += 1;
            }
        }
        counts
    }

    /// Rebuild from wire fields, discarding out-of-range or repeated columns.
    pub fn from_wire(rows: u8, x_count: u8, x_indices: [u8; MAX_PARTIAL]) -> Self {
        let mut columns: Vec<u8> = Vec::new();
        for &c in x_indices.iter().take((x_count as usize).min(MAX_PARTIAL)) {
            if (c as usize) < WIDTH && !columns.contains(&c) {
                columns.push(c);
            }
        }
        Self {
            rows: rows.min(MAX_ICE_ROWS as u8),
            columns,
        }
    }

    pub fn wire_indices(&self) -> [u8; MAX_PARTIAL] {
        let mut out = [0u8; MAX_PARTIAL];
        for (slot, c) in out.iter_mut().zip(&self.columns) {
            *slot = *c;
        }
        out
    }
}

/// Turn a pending count into a drop. At most five full rows per drop; below that, whole
/// rows first and the remainder in distinct random columns.
pub fn distribute<R: Rng + ?Sized>(pending: u32, rng: &mut R) -> Option<IcePlacement> {
    if pending == 0 {
        return None;
    }
    let full = (MAX_ICE_ROWS * WIDTH) as u32;
    if pending >= full {
        return Some(IcePlacement {
            rows: MAX_ICE_ROWS as u8,
            columns: Vec::new(),
        });
    }
    let rows = (pending / WIDTH as u32) as u8;
    let partial = (pending % WIDTH as u32) as usize;
    let mut columns: Vec<u8> = sample(rng, WIDTH, partial)
        .into_iter()
        .map(|c| c as u8)
        .collect();
    columns.sort_unstable();
    Some(IcePlacement { rows, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn thirty_fills_five_rows() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = distribute(30, &mut rng).unwrap();
        assert_eq!(p.rows, 5);
        assert!(p.columns.is_empty());
        assert_eq!(p.count(), 30);
    }

    #[test]
    fn large_counts_are_capped_at_five_rows() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(distribute(71, &mut rng).unwrap().count(), 30);
    }

    #[test]
    fn remainder_uses_distinct_columns() {
        let mut rng = StdRng::seed_from_u64(3);
        for n in 1..30 {
            let p = distribute(n, &mut rng).unwrap();
            assert_eq!(p.count(), n);
            assert_eq!(p.rows as u32, n / 6);
            let mut cols = p.columns.clone();
            cols.dedup();
            assert_eq!(cols.len(), p.columns.len());
            assert!(p.columns.iter().all(|&c| (c as usize) < WIDTH));
        }
        assert!(distribute(0, &mut rng).is_none());
    }

    #[test]
    fn wire_form_drops_bad_columns() {
        let p = IcePlacement::from_wire(1, 4, [0, 9, 0, 3, 5]);
        assert_eq!(p.columns, vec![0, 3]);
        assert_eq!(p.per_column(), [2, 1, 1, 2, 1, 1]);
    }

    #[test]
    fn queue_cancel_never_underflows() {
        let mut q = InterruptQueue::default();
        q.add(4);
        assert_eq!(q.cancel(10), 4);
        assert_eq!(q.pending, 0);
    }
}
