// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::weight::Weight;
use std::collections::BinaryHeap;

/// The outcome of a capacity cut.
pub struct Cut {
    /// The k-th smallest weight seen; recorded as the cube's cutoff
    pub cutoff: Weight,

    /// The batch positions of the k rows that stay, when the buffer
    /// tracked them exactly. Ties at the cutoff break by position, so this
    /// set - not a plain value comparison - decides the boundary.
    ///
    /// `None` in estimate mode: the caller splits by weight value alone.
    pub keep: Option<Vec<usize>>,
}

/// Selects the rows a cube keeps when it exceeds its capacity.
///
/// For targets up to the configured buffer capacity the k smallest
/// `(weight, position)` pairs are tracked exactly with a bounded max-heap,
/// so equal weights at the boundary resolve by batch position. For larger
/// targets a deterministic systematic sample (every `stride`-th weight,
/// with the stride doubling whenever the buffer fills) estimates the cutoff
/// quantile instead, so memory stays bounded by the buffer capacity either
/// way.
pub struct WeightBuffer {
    target: usize,
    exact: bool,

    /// k smallest `(weight, position)` pairs seen, max on top (exact mode)
    heap: BinaryHeap<(Weight, usize)>,

    /// Systematic sample (estimate mode)
    sample: Vec<Weight>,
    stride: usize,
    buffer_capacity: usize,

    seen: usize,
    min: Weight,
}

impl WeightBuffer {
    /// Creates a buffer keeping the `target` smallest rows.
    #[must_use]
    pub fn new(target: usize, buffer_capacity: usize) -> Self {
        let buffer_capacity = buffer_capacity.max(1);

        Self {
            target,
            exact: target <= buffer_capacity,
            heap: BinaryHeap::new(),
            sample: Vec::new(),
            stride: 1,
            buffer_capacity,
            seen: 0,
            min: Weight::MAX,
        }
    }

    /// Folds one row's weight in.
    ///
    /// `pos` is the row's position in the batch; it breaks ties among equal
    /// weights at the selection boundary, keeping the selection stable.
    pub fn push(&mut self, weight: Weight, pos: usize) {
        self.seen += 1;
        self.min = self.min.min(weight);

        if self.exact {
            self.heap.push((weight, pos));

            if self.heap.len() > self.target.max(1) {
                self.heap.pop();
            }

            return;
        }

        if (self.seen - 1) % self.stride == 0 {
            if self.sample.len() == self.buffer_capacity {
                // Decimate: keep every other element, double the stride
                let mut idx = 0;
                self.sample.retain(|_| {
                    idx += 1;
                    idx % 2 == 1
                });
                self.stride *= 2;
            }

            if (self.seen - 1) % self.stride == 0 {
                self.sample.push(weight);
            }
        }
    }

    /// Resolves the cut.
    ///
    /// Exact mode returns the keeper positions alongside the cutoff; a
    /// target of zero keeps nothing and cuts at the smallest weight seen.
    /// Estimate mode returns the matching quantile of the systematic
    /// sample and no keeper set.
    #[must_use]
    pub fn cut(self) -> Cut {
        if self.seen == 0 {
            return Cut {
                cutoff: Weight::MAX,
                keep: None,
            };
        }

        if self.target == 0 {
            return Cut {
                cutoff: self.min,
                keep: Some(vec![]),
            };
        }

        if self.exact {
            if self.heap.len() < self.target {
                return Cut {
                    cutoff: Weight::MAX,
                    keep: None,
                };
            }

            let cutoff = self.heap.peek().map_or(Weight::MAX, |(w, _)| *w);
            let keep = self.heap.into_iter().map(|(_, pos)| pos).collect();

            return Cut {
                cutoff,
                keep: Some(keep),
            };
        }

        if self.target >= self.seen {
            return Cut {
                cutoff: Weight::MAX,
                keep: None,
            };
        }

        let mut sorted = self.sample.clone();
        sorted.sort_unstable();

        if sorted.is_empty() {
            return Cut {
                cutoff: Weight::MAX,
                keep: None,
            };
        }

        let idx = (self.target * sorted.len() / self.seen).min(sorted.len() - 1);

        Cut {
            cutoff: sorted.get(idx).copied().unwrap_or(Weight::MAX),
            keep: None,
        }
    }
}
