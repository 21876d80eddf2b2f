#![deny(missing_docs)]
//! # warpfm
//!
//! `warpfm` fits latent-factor recommendation models on implicit (binary)
//! feedback using pairwise ranking objectives. For every observed
//! (user, item) interaction a negative item is drawn, and the model is
//! trained to score the observed item above the negative one.
//!
//! In WARP mode the sampler keeps drawing until it finds a negative that
//! violates the ranking margin under the current model, and the loss of
//! each triplet is weighted by how hard that search was: positives that
//! are already ranked well need many draws and receive little weight.
//!
//! ## Example
//! Fitting a model on the Movielens 100K dataset:
//!
//! ```rust,no_run
//! # extern crate warpfm;
//! # extern crate rand;
//! # use rand::SeedableRng;
//! let mut data = warpfm::datasets::download_movielens_100k().unwrap();
//!
//! let mut rng = rand::XorShiftRng::from_seed([42; 16]);
//!
//! let (train, test) = warpfm::data::train_test_split(&mut data, &mut rng, 0.2);
//! let train_mat = train.to_compressed();
//! let test_mat = test.to_compressed();
//!
//! let mut trainer = warpfm::training::Hyperparameters::new(data.num_users(), data.num_items())
//!     .latent_dim(20)
//!     .minibatch_size(64)
//!     .loss(warpfm::models::loss::LossKind::Hinge)
//!     .warp(true)
//!     .init_range(0.5)
//!     .num_epochs(10)
//!     .rng(rng)
//!     .build()
//!     .unwrap();
//!
//! for report in trainer.fit(&train_mat, &test_mat).unwrap() {
//!     println!(
//!         "Epoch {}: train AUC {:?}, test AUC {:?}",
//!         report.epoch, report.train_auc, report.test_auc
//!     );
//! }
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate log;

#[cfg(feature = "default")]
extern crate csv;
#[macro_use]
extern crate failure;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;

#[cfg(feature = "default")]
extern crate reqwest;

extern crate wyrm;

pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod sampling;
pub mod training;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Prediction error types.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The user id is outside the model's user range.
    #[fail(display = "Unknown user id {}.", _0)]
    UnknownUser(UserId),
    /// The item id is outside the model's item range.
    #[fail(display = "Unknown item id {}.", _0)]
    UnknownItem(ItemId),
}

/// Fitting error types.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum FittingError {
    /// A hyperparameter is outside its valid range.
    #[fail(display = "Invalid hyperparameter: {}", _0)]
    InvalidHyperparameter(String),
    /// Interaction matrix shape does not match the model.
    #[fail(
        display = "Shape mismatch: expected {:?}, got {:?}.",
        expected,
        actual
    )]
    ShapeMismatch {
        /// Shape the model was built for.
        expected: (usize, usize),
        /// Shape of the offending matrix.
        actual: (usize, usize),
    },
    /// User and item embedding tables have different widths.
    #[fail(
        display = "User embeddings have {} columns but item embeddings have {}.",
        user_dim,
        item_dim
    )]
    LatentDimMismatch {
        /// Columns of the user table.
        user_dim: usize,
        /// Columns of the item table.
        item_dim: usize,
    },
    /// Per-epoch evaluation failed.
    #[fail(display = "Evaluation failed: {}", _0)]
    Evaluation(#[cause] EvaluationError),
}

impl From<EvaluationError> for FittingError {
    fn from(error: EvaluationError) -> Self {
        FittingError::Evaluation(error)
    }
}

/// Evaluation error types.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum EvaluationError {
    /// No user has both a positive and a negative item, so the
    /// average AUC is undefined.
    #[fail(display = "No users with at least one positive and one negative item.")]
    NoQualifyingUsers,
    /// Interaction matrix shape does not match the model.
    #[fail(display = "Model scores {} items but the matrix has {}.", expected, actual)]
    ShapeMismatch {
        /// Number of items known to the model.
        expected: usize,
        /// Number of items in the matrix.
        actual: usize,
    },
    /// Scoring failed.
    #[fail(display = "Prediction failed: {}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<PredictionError> for EvaluationError {
    fn from(error: PredictionError) -> Self {
        EvaluationError::Prediction(error)
    }
}

/// Trait describing models that can score the whole item
/// catalogue for a known user.
pub trait RankingModel {
    /// Number of items the model can score.
    fn num_items(&self) -> usize;
    /// Score every item in the catalogue for `user_id`, in item id order.
    fn predict_user(&self, user_id: UserId) -> Result<Vec<f32>, PredictionError>;
}
