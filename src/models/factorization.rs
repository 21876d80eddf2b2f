//! Bilinear factorization model over shared user and item embedding tables.
//!
//! The score of a (user, item) pair is the inner product of their latent
//! vectors. Positive and negative items are always looked up in the same
//! item table, so the pairwise training graph is siamese.
use std::sync::Arc;

use ndarray::{ArrayView1, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rayon::prelude::*;

use wyrm;
use wyrm::{Arr, BoxedNode, IndexInputNode, InputNode, ParameterNode, Variable};

use super::loss::LossFunction;
use {FittingError, ItemId, PredictionError, RankingModel, UserId};

fn embedding_init<R: Rng>(rows: usize, cols: usize, init_range: f32, rng: &mut R) -> Arr {
    let uniform = Uniform::new(-init_range, init_range);
    Arr::zeros((rows, cols)).map(|_| uniform.sample(rng))
}

fn row_dot(user: ArrayView1<f32>, item: ArrayView1<f32>) -> f32 {
    match (user.as_slice(), item.as_slice()) {
        (Some(user), Some(item)) => wyrm::simd_dot(user, item),
        _ => user.dot(&item),
    }
}

/// User and item embedding tables.
#[derive(Debug)]
pub struct EmbeddingModel {
    num_users: usize,
    num_items: usize,
    latent_dim: usize,
    user_embedding: Arc<wyrm::HogwildParameter>,
    item_embedding: Arc<wyrm::HogwildParameter>,
}

impl Clone for EmbeddingModel {
    fn clone(&self) -> Self {
        EmbeddingModel {
            num_users: self.num_users,
            num_items: self.num_items,
            latent_dim: self.latent_dim,
            user_embedding: Arc::new(self.user_embedding.as_ref().clone()),
            item_embedding: Arc::new(self.item_embedding.as_ref().clone()),
        }
    }
}

/// Input and output nodes of a pairwise training graph for a fixed
/// minibatch size.
pub(crate) struct PairwiseGraph {
    pub user_idx: Variable<IndexInputNode>,
    pub positive_idx: Variable<IndexInputNode>,
    pub negative_idx: Variable<IndexInputNode>,
    pub weights: Variable<InputNode>,
    pub loss: Variable<BoxedNode>,
}

impl EmbeddingModel {
    /// Build a model with every embedding entry drawn uniformly
    /// from `[-init_range, init_range)`.
    pub fn new<R: Rng>(
        num_users: usize,
        num_items: usize,
        latent_dim: usize,
        init_range: f32,
        rng: &mut R,
    ) -> Self {
        let user_embedding = embedding_init(num_users, latent_dim, init_range, rng);
        let item_embedding = embedding_init(num_items, latent_dim, init_range, rng);

        EmbeddingModel::from_tables(user_embedding, item_embedding)
    }

    /// Build a model from existing embedding tables. Both tables
    /// must have the same number of columns.
    pub fn from_embeddings(
        user_embedding: Arr,
        item_embedding: Arr,
    ) -> Result<Self, FittingError> {
        if user_embedding.cols() != item_embedding.cols() {
            return Err(FittingError::LatentDimMismatch {
                user_dim: user_embedding.cols(),
                item_dim: item_embedding.cols(),
            });
        }

        Ok(EmbeddingModel::from_tables(user_embedding, item_embedding))
    }

    fn from_tables(user_embedding: Arr, item_embedding: Arr) -> Self {
        EmbeddingModel {
            num_users: user_embedding.rows(),
            num_items: item_embedding.rows(),
            latent_dim: user_embedding.cols(),
            user_embedding: Arc::new(wyrm::HogwildParameter::new(user_embedding)),
            item_embedding: Arc::new(wyrm::HogwildParameter::new(item_embedding)),
        }
    }

    /// Return the number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Return the number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Return the embedding dimensionality.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Return a copy of the user embedding table.
    pub fn user_embeddings(&self) -> Arr {
        self.user_embedding.value().to_owned()
    }

    /// Return a copy of the item embedding table.
    pub fn item_embeddings(&self) -> Arr {
        self.item_embedding.value().to_owned()
    }

    fn check_user(&self, user_id: UserId) -> Result<(), PredictionError> {
        if user_id < self.num_users {
            Ok(())
        } else {
            Err(PredictionError::UnknownUser(user_id))
        }
    }

    fn check_item(&self, item_id: ItemId) -> Result<(), PredictionError> {
        if item_id < self.num_items {
            Ok(())
        } else {
            Err(PredictionError::UnknownItem(item_id))
        }
    }

    /// Score without bounds checks; panics on out-of-range ids.
    pub(crate) fn predict_single(&self, user_id: UserId, item_id: ItemId) -> f32 {
        let user_embeddings = self.user_embedding.value();
        let item_embeddings = self.item_embedding.value();

        row_dot(
            user_embeddings.subview(Axis(0), user_id),
            item_embeddings.subview(Axis(0), item_id),
        )
    }

    /// Inner product of the user's and the item's latent vectors.
    pub fn score(&self, user_id: UserId, item_id: ItemId) -> Result<f32, PredictionError> {
        self.check_user(user_id)?;
        self.check_item(item_id)?;

        Ok(self.predict_single(user_id, item_id))
    }

    /// Element-wise paired scores of `user_ids[i]` against `item_ids[i]`.
    pub fn score_pairs(
        &self,
        user_ids: &[UserId],
        item_ids: &[ItemId],
    ) -> Result<Vec<f32>, PredictionError> {
        user_ids
            .par_iter()
            .zip(item_ids.par_iter())
            .map(|(&user_id, &item_id)| self.score(user_id, item_id))
            .collect()
    }

    /// Scores of the positive and the negative item for the same user,
    /// both read from the one item table.
    pub fn forward(
        &self,
        user_id: UserId,
        positive_item_id: ItemId,
        negative_item_id: ItemId,
    ) -> Result<(f32, f32), PredictionError> {
        Ok((
            self.score(user_id, positive_item_id)?,
            self.score(user_id, negative_item_id)?,
        ))
    }

    /// Build the pairwise training graph for minibatches of
    /// exactly `minibatch_size` triplets.
    pub(crate) fn pairwise_graph(
        &self,
        minibatch_size: usize,
        loss: &LossFunction,
    ) -> PairwiseGraph {
        let user_embeddings = ParameterNode::shared(self.user_embedding.clone());
        let item_embeddings = ParameterNode::shared(self.item_embedding.clone());

        let user_idx = IndexInputNode::new(&vec![0; minibatch_size]);
        let positive_idx = IndexInputNode::new(&vec![0; minibatch_size]);
        let negative_idx = IndexInputNode::new(&vec![0; minibatch_size]);
        let weights = InputNode::new(Arr::zeros((minibatch_size, 1)));

        let user_vector = user_embeddings.index(&user_idx);
        let positive_item_vector = item_embeddings.index(&positive_idx);
        let negative_item_vector = item_embeddings.index(&negative_idx);

        let positive_prediction = user_vector.vector_dot(&positive_item_vector).boxed();
        let negative_prediction = user_vector.vector_dot(&negative_item_vector).boxed();

        let loss = loss.build(positive_prediction, negative_prediction, &weights);

        PairwiseGraph {
            user_idx,
            positive_idx,
            negative_idx,
            weights,
            loss,
        }
    }
}

impl RankingModel for EmbeddingModel {
    fn num_items(&self) -> usize {
        self.num_items
    }

    fn predict_user(&self, user_id: UserId) -> Result<Vec<f32>, PredictionError> {
        self.check_user(user_id)?;

        let user_embeddings = self.user_embedding.value();
        let user_embedding = user_embeddings.subview(Axis(0), user_id);

        self.item_embedding
            .value()
            .genrows()
            .into_iter()
            .map(|item_embedding| {
                let prediction = row_dot(user_embedding.view(), item_embedding);

                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn model() -> EmbeddingModel {
        let user = Arr::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, -1.0, 0.5, 0.0]).unwrap();
        let item = Arr::from_shape_vec(
            (3, 3),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 2.0, -1.0, 0.5],
        ).unwrap();

        EmbeddingModel::from_embeddings(user, item).unwrap()
    }

    #[test]
    fn score_is_inner_product() {
        let model = model();

        assert_eq!(model.score(0, 0).unwrap(), 1.0);
        assert_eq!(model.score(0, 1).unwrap(), 5.0);
        assert_eq!(model.score(0, 2).unwrap(), 1.5);
        assert_eq!(model.score(1, 2).unwrap(), -2.5);
        assert_eq!(model.predict_user(0).unwrap(), vec![1.0, 5.0, 1.5]);
        assert_eq!(
            model.score_pairs(&[0, 1, 1], &[1, 0, 2]).unwrap(),
            vec![5.0, -1.0, -2.5]
        );
        assert_eq!(model.forward(0, 1, 2).unwrap(), (5.0, 1.5));
    }

    #[test]
    fn score_is_linear_in_user_vector() {
        let model = model();

        let mut user = model.user_embeddings();
        user.subview_mut(Axis(0), 0).mapv_inplace(|x| 2.0 * x);
        let doubled =
            EmbeddingModel::from_embeddings(user, model.item_embeddings()).unwrap();

        for item_id in 0..3 {
            assert_eq!(
                doubled.score(0, item_id).unwrap(),
                2.0 * model.score(0, item_id).unwrap()
            );
            assert_eq!(
                doubled.score(1, item_id).unwrap(),
                model.score(1, item_id).unwrap()
            );
        }
    }

    #[test]
    fn unknown_ids_are_errors() {
        let model = model();

        assert_eq!(model.score(2, 0), Err(PredictionError::UnknownUser(2)));
        assert_eq!(model.score(0, 3), Err(PredictionError::UnknownItem(3)));
        assert_eq!(model.predict_user(5), Err(PredictionError::UnknownUser(5)));
    }

    #[test]
    fn mismatched_tables_are_rejected() {
        let user = Arr::zeros((2, 3));
        let item = Arr::zeros((4, 2));

        assert_eq!(
            EmbeddingModel::from_embeddings(user, item).err(),
            Some(FittingError::LatentDimMismatch {
                user_dim: 3,
                item_dim: 2
            })
        );
    }

    #[test]
    fn initialization_is_bounded_and_not_constant() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let model = EmbeddingModel::new(10, 20, 8, 0.05, &mut rng);

        let user = model.user_embeddings();
        let item = model.item_embeddings();

        assert_eq!(user.shape(), &[10, 8]);
        assert_eq!(item.shape(), &[20, 8]);
        assert!(user.iter().chain(item.iter()).all(|x| x.abs() <= 0.05));
        assert!(item.iter().any(|&x| x != 0.0));

        let scores = model.predict_user(0).unwrap();
        assert!(scores.iter().any(|&score| score != scores[0]));
    }

    #[test]
    fn clone_does_not_share_tables() {
        let mut rng = XorShiftRng::from_seed([1; 16]);
        let model = EmbeddingModel::new(2, 2, 2, 0.5, &mut rng);
        let copy = model.clone();

        assert_eq!(copy.user_embeddings(), model.user_embeddings());
        assert!(!Arc::ptr_eq(&copy.item_embedding, &model.item_embedding));
    }
}
