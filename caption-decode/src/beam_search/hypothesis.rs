use std::cmp::Ordering;

/// A candidate output sequence with its cumulative log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

impl Hypothesis {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    token: u32,
    parent: Option<usize>,
}

/// Append-only token tree. Live hypotheses are leaves, so extending one
/// never copies its prefix.
#[derive(Debug, Default)]
struct HypothesisArena {
    nodes: Vec<Node>,
}

impl HypothesisArena {
    fn push(&mut self, parent: Option<usize>, token: u32) -> usize {
        self.nodes.push(Node { token, parent });
        self.nodes.len() - 1
    }

    fn tokens(&self, mut node: Option<usize>) -> Vec<u32> {
        let mut tokens = Vec::new();
        while let Some(idx) = node {
            let n = self.nodes[idx];
            tokens.push(n.token);
            node = n.parent;
        }
        tokens.reverse();
        tokens
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    node: Option<usize>,
    score: f32,
}

/// A `(slot, token)` pair picked from the flattened score matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub slot: usize,
    pub token: u32,
    pub score: f32,
}

/// The beam of a single example.
///
/// Live slot `i` corresponds to row `i` of the example's segment in the
/// recurrent state. `cap` starts at the beam size and shrinks by one for every
/// hypothesis that emits the end-of-sequence token.
#[derive(Debug)]
pub(crate) struct Beam {
    arena: HypothesisArena,
    slots: Vec<Slot>,
    completed: Vec<Hypothesis>,
    cap: usize,
    eos_idx: u32,
}

impl Beam {
    pub fn new(beam_size: usize, eos_idx: u32) -> Self {
        Self {
            arena: HypothesisArena::default(),
            slots: vec![Slot {
                node: None,
                score: 0.,
            }],
            completed: Vec::new(),
            cap: beam_size,
            eos_idx,
        }
    }

    /// Number of live slots.
    pub fn live(&self) -> usize {
        self.slots.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn scores(&self) -> impl Iterator<Item = f32> + '_ {
        self.slots.iter().map(|s| s.score)
    }

    /// Picks the `cap` best candidates from the `(live, vocab)` score rows.
    ///
    /// Candidates are ranked by score, ties go to the lower flattened index
    /// `slot * vocab + token`.
    pub fn select(&self, scores: &[Vec<f32>]) -> Vec<Candidate> {
        let vocab = match scores.first() {
            Some(row) if !row.is_empty() && self.cap > 0 => row.len(),
            _ => return Vec::new(),
        };
        let flat: Vec<f32> = scores.iter().flatten().copied().collect();
        let cmp = |&i: &usize, &j: &usize| -> Ordering {
            flat[j].total_cmp(&flat[i]).then(i.cmp(&j))
        };
        let mut order: Vec<usize> = (0..flat.len()).collect();
        if order.len() > self.cap {
            order.select_nth_unstable_by(self.cap - 1, cmp);
            order.truncate(self.cap);
        }
        order.sort_unstable_by(cmp);
        order
            .into_iter()
            .map(|i| Candidate {
                slot: i / vocab,
                token: (i % vocab) as u32,
                score: flat[i],
            })
            .collect()
    }

    /// Applies the picked candidates: end-of-sequence candidates are frozen
    /// into the completed list, the others become the new live slots.
    ///
    /// Returns `(source slot, token)` for each new live slot, in slot order.
    pub fn advance(&mut self, picked: &[Candidate]) -> Vec<(usize, u32)> {
        let mut survivors = Vec::with_capacity(picked.len());
        let mut slots = Vec::with_capacity(picked.len());
        for c in picked {
            let parent = self.slots[c.slot].node;
            if c.token == self.eos_idx {
                let mut tokens = self.arena.tokens(parent);
                tokens.push(c.token);
                self.completed.push(Hypothesis {
                    tokens,
                    score: c.score,
                });
                self.cap -= 1;
            } else {
                let node = self.arena.push(parent, c.token);
                slots.push(Slot {
                    node: Some(node),
                    score: c.score,
                });
                survivors.push((c.slot, c.token));
            }
        }
        self.slots = slots;
        survivors
    }

    /// Adds the still-live hypotheses to the completed ones and returns the
    /// `out_size` best, highest score first.
    pub fn finish(self, out_size: usize) -> Vec<Hypothesis> {
        let Self {
            arena,
            slots,
            mut completed,
            ..
        } = self;
        completed.extend(slots.iter().map(|s| Hypothesis {
            tokens: arena.tokens(s.node),
            score: s.score,
        }));
        completed.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.tokens.cmp(&a.tokens))
        });
        completed.truncate(out_size);
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_the_lower_flat_index() {
        let beam = Beam::new(3, 0);
        let picked = beam.select(&[vec![-1.0, -0.5, -0.5, -0.5]]);
        let tokens: Vec<u32> = picked.iter().map(|c| c.token).collect();
        assert_eq!(tokens, [1, 2, 3]);
    }

    #[test]
    fn select_decodes_slot_and_token() {
        let mut beam = Beam::new(2, 0);
        beam.advance(&[
            Candidate {
                slot: 0,
                token: 3,
                score: -0.1,
            },
            Candidate {
                slot: 0,
                token: 1,
                score: -0.2,
            },
        ]);
        let picked = beam.select(&[vec![-9.0, -9.0, -1.0, -9.0], vec![-9.0, -0.5, -9.0, -9.0]]);
        assert_eq!(
            picked,
            [
                Candidate {
                    slot: 1,
                    token: 1,
                    score: -0.5
                },
                Candidate {
                    slot: 0,
                    token: 2,
                    score: -1.0
                },
            ]
        );
    }

    #[test]
    fn eos_freezes_and_shrinks_the_beam() {
        let mut beam = Beam::new(2, 0);
        let survivors = beam.advance(&[
            Candidate {
                slot: 0,
                token: 2,
                score: -0.1,
            },
            Candidate {
                slot: 0,
                token: 0,
                score: -0.3,
            },
        ]);
        assert_eq!(survivors, [(0, 2)]);
        assert_eq!(beam.cap(), 1);
        assert_eq!(beam.live(), 1);
        let survivors = beam.advance(&[Candidate {
            slot: 0,
            token: 4,
            score: -0.2,
        }]);
        assert_eq!(survivors, [(0, 4)]);
        let done = beam.finish(5);
        assert_eq!(
            done,
            [
                Hypothesis {
                    tokens: vec![2, 4],
                    score: -0.2
                },
                Hypothesis {
                    tokens: vec![0],
                    score: -0.3
                },
            ]
        );
    }

    #[test]
    fn duplicate_paths_are_kept_apart() {
        let mut beam = Beam::new(2, 0);
        beam.advance(&[
            Candidate {
                slot: 0,
                token: 1,
                score: -0.5,
            },
            Candidate {
                slot: 0,
                token: 2,
                score: -0.5,
            },
        ]);
        // both slots extend with the same token
        beam.advance(&[
            Candidate {
                slot: 1,
                token: 3,
                score: -1.0,
            },
            Candidate {
                slot: 0,
                token: 3,
                score: -1.0,
            },
        ]);
        let done = beam.finish(2);
        assert_eq!(done[0].tokens, [2, 3]);
        assert_eq!(done[1].tokens, [1, 3]);
    }
}
