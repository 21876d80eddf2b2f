//! Rejection sampling of negative items.
//!
//! For a user, candidate items are drawn uniformly from the whole
//! catalogue until one is found that is not among the user's positives
//! and that passes the configured acceptance test. The number of draws
//! is bounded by `max_samples`: when it runs out, the last candidate is
//! returned anyway with `accepted` unset, and may still be a positive.
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use data::CompressedInteractionsUser;
use models::factorization::EmbeddingModel;
use {ItemId, UserId};

/// Decides whether a candidate negative is informative enough.
#[derive(Clone, Copy, Debug)]
pub enum NegativeAcceptance<'a> {
    /// Accept any item that is not a positive.
    AlwaysAccept,
    /// Accept only candidates whose current score exceeds the
    /// positive score minus `margin`.
    MarginViolation {
        /// Model whose live scores are compared.
        model: &'a EmbeddingModel,
        /// Required score gap.
        margin: f32,
    },
}

/// Per-draw context the acceptance test is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct SamplingContext {
    /// The user the negative is drawn for.
    pub user_id: UserId,
    /// Current score of the positive item.
    pub positive_score: f32,
}

impl<'a> NegativeAcceptance<'a> {
    /// Whether `candidate` should be accepted.
    pub fn accepts(&self, context: &SamplingContext, candidate: ItemId) -> bool {
        match *self {
            NegativeAcceptance::AlwaysAccept => true,
            NegativeAcceptance::MarginViolation { model, margin } => {
                let negative_score = model.predict_single(context.user_id, candidate);
                negative_score > context.positive_score - margin
            }
        }
    }
}

/// The outcome of one sampler call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegativeSample {
    /// The sampled item.
    pub item_id: ItemId,
    /// Number of candidates drawn.
    pub num_samples: usize,
    /// False if the draw budget was exhausted without acceptance.
    pub accepted: bool,
}

/// Bounded rejection sampler for negative items.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegativeSampler {
    max_samples: usize,
}

impl NegativeSampler {
    /// Build a sampler that draws at most `max_samples` candidates
    /// per call. A budget of zero is raised to one.
    pub fn new(max_samples: usize) -> Self {
        NegativeSampler {
            max_samples: max_samples.max(1),
        }
    }

    /// The draw budget.
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Draw a negative item for `user` from a catalogue of `num_items`
    /// items. `num_items` must be positive.
    pub fn sample<R: Rng>(
        &self,
        user: &CompressedInteractionsUser,
        num_items: usize,
        acceptance: &NegativeAcceptance,
        context: &SamplingContext,
        rng: &mut R,
    ) -> NegativeSample {
        let item_range = Uniform::new(0, num_items);
        let mut candidate = 0;

        for num_samples in 1..=self.max_samples {
            candidate = item_range.sample(rng);

            if !user.contains(candidate) && acceptance.accepts(context, candidate) {
                return NegativeSample {
                    item_id: candidate,
                    num_samples: num_samples,
                    accepted: true,
                };
            }
        }

        NegativeSample {
            item_id: candidate,
            num_samples: self.max_samples,
            accepted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};
    use wyrm::Arr;

    use super::*;
    use data::{Interaction, Interactions};

    fn matrix() -> ::data::CompressedInteractions {
        let mut interactions = Interactions::new(3, 10);

        for item_id in &[0, 2, 3, 7] {
            interactions.push(Interaction::new(0, *item_id, 0));
        }
        for item_id in 0..9 {
            interactions.push(Interaction::new(1, item_id, 0));
        }
        for item_id in 0..10 {
            interactions.push(Interaction::new(2, item_id, 0));
        }

        interactions.to_compressed()
    }

    fn context(user_id: UserId) -> SamplingContext {
        SamplingContext {
            user_id: user_id,
            positive_score: 0.0,
        }
    }

    #[test]
    fn accepted_negatives_are_not_positives() {
        let mat = matrix();
        let user = mat.get_user(0).unwrap();
        let sampler = NegativeSampler::new(100);
        let mut rng = XorShiftRng::from_seed([42; 16]);

        for _ in 0..1000 {
            let sample = sampler.sample(
                &user,
                mat.num_items(),
                &NegativeAcceptance::AlwaysAccept,
                &context(0),
                &mut rng,
            );

            assert!(sample.accepted);
            assert!(!user.contains(sample.item_id));
            assert!(sample.num_samples >= 1 && sample.num_samples <= 100);
        }
    }

    #[test]
    fn finds_the_single_negative() {
        let mat = matrix();
        let user = mat.get_user(1).unwrap();
        let sampler = NegativeSampler::new(1000);
        let mut rng = XorShiftRng::from_seed([3; 16]);

        let sample = sampler.sample(
            &user,
            mat.num_items(),
            &NegativeAcceptance::AlwaysAccept,
            &context(1),
            &mut rng,
        );

        assert!(sample.accepted);
        assert_eq!(sample.item_id, 9);
    }

    #[test]
    fn exhaustion_is_bounded_and_reported() {
        let mat = matrix();
        let user = mat.get_user(2).unwrap();
        let sampler = NegativeSampler::new(25);
        let mut rng = XorShiftRng::from_seed([5; 16]);

        let sample = sampler.sample(
            &user,
            mat.num_items(),
            &NegativeAcceptance::AlwaysAccept,
            &context(2),
            &mut rng,
        );

        assert!(!sample.accepted);
        assert_eq!(sample.num_samples, 25);
        assert!(sample.item_id < 10);
    }

    #[test]
    fn margin_violation_filters_candidates() {
        let mat = matrix();
        let user = mat.get_user(0).unwrap();

        // Only item 9 scores high enough to violate the margin.
        let user_embedding = Arr::from_shape_vec((3, 1), vec![1.0, 1.0, 1.0]).unwrap();
        let mut item_values = vec![-5.0; 10];
        item_values[9] = 0.5;
        let item_embedding = Arr::from_shape_vec((10, 1), item_values).unwrap();
        let model = EmbeddingModel::from_embeddings(user_embedding, item_embedding).unwrap();

        let acceptance = NegativeAcceptance::MarginViolation {
            model: &model,
            margin: 1.0,
        };
        let context = SamplingContext {
            user_id: 0,
            positive_score: 1.0,
        };

        assert!(acceptance.accepts(&context, 9));
        assert!(!acceptance.accepts(&context, 4));

        let sampler = NegativeSampler::new(10_000);
        let mut rng = XorShiftRng::from_seed([9; 16]);

        for _ in 0..20 {
            let sample = sampler.sample(&user, 10, &acceptance, &context, &mut rng);
            assert!(sample.accepted);
            assert_eq!(sample.item_id, 9);
        }
    }

    #[test]
    fn zero_budget_is_raised() {
        assert_eq!(NegativeSampler::new(0).max_samples(), 1);
    }
}
