//! Per-user ROC AUC over the full item catalogue.
use std::cmp::Ordering;

use rayon::prelude::*;

use super::RankingModel;
use data::{CompressedInteractions, CompressedInteractionsUser};
use EvaluationError;

/// ROC AUC of `scores` against binary labels given as the sorted
/// `positives` indices.
///
/// Ties between a positive and a negative count as half a correctly
/// ordered pair. Returns `None` when there are no positives or no
/// negatives.
pub fn auc(scores: &[f32], positives: &[usize]) -> Option<f32> {
    let num_positives = positives.len();
    let num_negatives = scores.len().saturating_sub(num_positives);

    if num_positives == 0 || num_negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&x, &y| {
        scores[x]
            .partial_cmp(&scores[y])
            .unwrap_or(Ordering::Equal)
    });

    // Sum of the 1-based ranks of the positives, with tied scores
    // sharing the average rank of their group.
    let mut positive_rank_sum = 0.0f64;
    let mut start = 0;

    while start < order.len() {
        let mut stop = start + 1;
        while stop < order.len() && scores[order[stop]] == scores[order[start]] {
            stop += 1;
        }

        let average_rank = (start + stop + 1) as f64 / 2.0;
        let group_positives = order[start..stop]
            .iter()
            .filter(|&&idx| positives.binary_search(&idx).is_ok())
            .count();

        positive_rank_sum += average_rank * group_positives as f64;
        start = stop;
    }

    let num_positives = num_positives as f64;
    let correct_pairs = positive_rank_sum - num_positives * (num_positives + 1.0) / 2.0;

    Some((correct_pairs / (num_positives * num_negatives as f64)) as f32)
}

/// AUC of a single user's row, or `None` if it is undefined.
pub fn user_auc<T: RankingModel>(
    model: &T,
    user: &CompressedInteractionsUser,
) -> Result<Option<f32>, EvaluationError> {
    if user.is_empty() {
        return Ok(None);
    }

    let predictions = model.predict_user(user.user_id)?;

    Ok(auc(&predictions, user.item_ids))
}

/// Mean per-user AUC over all users of `test` that have at least one
/// positive and one negative item.
///
/// Returns `EvaluationError::NoQualifyingUsers` if no user qualifies;
/// the mean is then undefined.
pub fn full_auc<T: RankingModel + Sync>(
    model: &T,
    test: &CompressedInteractions,
) -> Result<f32, EvaluationError> {
    if model.num_items() != test.num_items() {
        return Err(EvaluationError::ShapeMismatch {
            expected: model.num_items(),
            actual: test.num_items(),
        });
    }

    let aucs = test
        .iter_users()
        .filter(|user| !user.is_empty())
        .collect::<Vec<_>>()
        .par_iter()
        .map(|user| user_auc(model, user))
        .collect::<Result<Vec<_>, _>>()?;

    let aucs: Vec<f32> = aucs.into_iter().filter_map(|x| x).collect();

    if aucs.is_empty() {
        return Err(EvaluationError::NoQualifyingUsers);
    }

    Ok(aucs.iter().sum::<f32>() / aucs.len() as f32)
}

#[cfg(test)]
mod tests {
    use wyrm::Arr;

    use super::*;
    use data::{Interaction, Interactions};
    use models::factorization::EmbeddingModel;

    #[test]
    fn auc_perfect_and_inverted() {
        assert_eq!(auc(&[0.9, 0.8, 0.2, 0.1], &[0, 1]), Some(1.0));
        assert_eq!(auc(&[0.9, 0.8, 0.2, 0.1], &[2, 3]), Some(0.0));
    }

    #[test]
    fn auc_ties_count_half() {
        assert_eq!(auc(&[0.5, 0.5, 0.5, 0.5], &[0, 2]), Some(0.5));
        // Positive at 0.5 ties one negative and beats another.
        assert_eq!(auc(&[0.5, 0.5, 0.1], &[0]), Some(0.75));
    }

    #[test]
    fn auc_matches_pairwise_count() {
        let scores = [0.3, -1.0, 2.0, 0.3, 0.7, 0.0, 0.3];
        let positives = [0, 2, 5];

        let mut correct = 0.0;
        let mut pairs = 0.0;
        for &positive in &positives {
            for negative in (0..scores.len()).filter(|idx| !positives.contains(idx)) {
                pairs += 1.0;
                if scores[positive] > scores[negative] {
                    correct += 1.0;
                } else if scores[positive] == scores[negative] {
                    correct += 0.5;
                }
            }
        }

        let value = auc(&scores, &positives).unwrap();
        assert!((value - correct / pairs).abs() < 1e-6);
    }

    #[test]
    fn auc_undefined_without_both_classes() {
        assert_eq!(auc(&[0.1, 0.2], &[]), None);
        assert_eq!(auc(&[0.1, 0.2], &[0, 1]), None);
        assert_eq!(auc(&[], &[]), None);
    }

    fn model() -> EmbeddingModel {
        // User 0 prefers items with high ids, user 1 low ids.
        let user = Arr::from_shape_vec((3, 1), vec![1.0, -1.0, 1.0]).unwrap();
        let item = Arr::from_shape_vec((4, 1), vec![0.0, 1.0, 2.0, 3.0]).unwrap();

        EmbeddingModel::from_embeddings(user, item).unwrap()
    }

    fn matrix(interactions: Vec<Interaction>) -> CompressedInteractions {
        let mut data = Interactions::new(3, 4);
        for interaction in interactions {
            data.push(interaction);
        }

        data.to_compressed()
    }

    #[test]
    fn full_auc_averages_qualifying_users() {
        let model = model();
        let mat = matrix(vec![
            Interaction::new(0, 3, 0),
            Interaction::new(1, 3, 0),
        ]);

        // User 0 ranks item 3 first, user 1 ranks it last; user 2 is empty.
        assert_eq!(full_auc(&model, &mat), Ok(0.5));
    }

    #[test]
    fn full_auc_skips_saturated_rows() {
        let model = model();
        let mat = matrix(vec![
            Interaction::new(0, 2, 0),
            Interaction::new(0, 3, 0),
            Interaction::new(1, 0, 0),
            Interaction::new(1, 1, 0),
            Interaction::new(1, 2, 0),
            Interaction::new(1, 3, 0),
        ]);

        assert_eq!(full_auc(&model, &mat), Ok(1.0));
    }

    #[test]
    fn full_auc_without_qualifying_users() {
        let model = model();
        let mat = matrix(Vec::new());

        assert_eq!(full_auc(&model, &mat), Err(EvaluationError::NoQualifyingUsers));
    }

    #[test]
    fn full_auc_checks_shape() {
        let model = model();
        let mat = Interactions::new(3, 7).to_compressed();

        assert_eq!(
            full_auc(&model, &mat),
            Err(EvaluationError::ShapeMismatch {
                expected: 4,
                actual: 7
            })
        );
    }

    #[test]
    fn full_auc_is_idempotent() {
        let model = model();
        let mat = matrix(vec![
            Interaction::new(0, 1, 0),
            Interaction::new(1, 2, 0),
            Interaction::new(2, 0, 0),
            Interaction::new(2, 3, 0),
        ]);

        assert_eq!(full_auc(&model, &mat), full_auc(&model, &mat));
    }
}
