//! Pairwise losses and WARP weighting.
//!
//! A loss compares the score of a positive item with the score of a
//! sampled negative item for the same user. With WARP weighting on, the
//! loss of each triplet is further multiplied by
//!
//! ```text
//! w(n) = ln(floor((N - 1) / n)) / ln(N)
//! ```
//!
//! where `N` is the number of items and `n` the number of draws the
//! sampler needed to find a margin-violating negative.
use wyrm::{BoxedNode, InputNode, Variable};

/// Base pairwise loss.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LossKind {
    /// `sigmoid(negative - positive)`: Bayesian Personalised Ranking.
    SigmoidPairwise,
    /// `max(0, margin + negative - positive)`.
    Hinge,
}

/// Rank-approximating weight of a triplet that took `num_samples` draws
/// to find its negative, in a catalogue of `num_items` items.
///
/// `num_samples` is clamped into `[1, num_items - 1]`, which keeps the
/// argument of the logarithm at least one. Catalogues with fewer than
/// two items have no valid negatives and get a weight of zero.
pub fn warp_weight(num_samples: usize, num_items: usize) -> f32 {
    if num_items < 2 {
        return 0.0;
    }

    let num_samples = num_samples.max(1).min(num_items - 1);
    let rank_estimate = (num_items - 1) / num_samples;

    (rank_estimate as f32).ln() / (num_items as f32).ln()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A configured pairwise loss.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LossFunction {
    kind: LossKind,
    warp: bool,
    margin: f32,
}

impl LossFunction {
    /// Build a loss. `margin` is used by the hinge loss and by the
    /// margin-violation test of the WARP sampler.
    pub fn new(kind: LossKind, warp: bool, margin: f32) -> Self {
        LossFunction { kind, warp, margin }
    }

    /// The base loss kind.
    pub fn kind(&self) -> LossKind {
        self.kind
    }

    /// Whether losses are WARP-weighted.
    pub fn is_warp(&self) -> bool {
        self.warp
    }

    /// The margin.
    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Unweighted loss of a single pair of scores.
    pub fn base_value(&self, positive: f32, negative: f32) -> f32 {
        match self.kind {
            LossKind::SigmoidPairwise => {
                sigmoid(f64::from(negative) - f64::from(positive)) as f32
            }
            LossKind::Hinge => (self.margin + negative - positive).max(0.0),
        }
    }

    /// Weight of a triplet: the WARP weight if enabled, otherwise one.
    pub fn weight(&self, num_samples: usize, num_items: usize) -> f32 {
        if self.warp {
            warp_weight(num_samples, num_items)
        } else {
            1.0
        }
    }

    /// Loss of a single triplet.
    pub fn value(&self, positive: f32, negative: f32, num_samples: usize, num_items: usize) -> f32 {
        self.weight(num_samples, num_items) * self.base_value(positive, negative)
    }

    /// Mean loss over a batch of triplets.
    pub fn mean_value(
        &self,
        positives: &[f32],
        negatives: &[f32],
        num_samples: &[usize],
        num_items: usize,
    ) -> Option<f32> {
        if positives.is_empty() {
            return None;
        }

        let total: f32 = izip!(positives, negatives, num_samples)
            .map(|(&positive, &negative, &samples)| {
                self.value(positive, negative, samples, num_items)
            })
            .sum();

        Some(total / positives.len() as f32)
    }

    /// Build the per-triplet loss node over the positive and negative
    /// prediction nodes. `weights` is only read in WARP mode.
    pub(crate) fn build(
        &self,
        positive: Variable<BoxedNode>,
        negative: Variable<BoxedNode>,
        weights: &Variable<InputNode>,
    ) -> Variable<BoxedNode> {
        let loss = match self.kind {
            LossKind::SigmoidPairwise => (negative - positive).sigmoid().boxed(),
            LossKind::Hinge => (self.margin + negative - positive).relu().boxed(),
        };

        if self.warp {
            (weights.clone() * loss).boxed()
        } else {
            loss
        }
    }
}
