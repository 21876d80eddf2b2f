//! Epoch loop: resample negatives, shuffle, train on minibatches, evaluate.
//!
//! Each epoch draws one negative for every positive interaction of the
//! training matrix. In WARP mode the scores of all positives are computed
//! first, and a candidate negative is only accepted if it violates the
//! margin against its positive under the current model; the number of
//! draws it took then weights the triplet's loss.
use std::time::{Duration, Instant};

use rand;
use rand::distributions::{Distribution, Uniform};
use rand::{Rng, SeedableRng, XorShiftRng};
use rayon::prelude::*;

use wyrm::optim::{Optimizer as Optim, Optimizers};
use wyrm::{Arr, DataInput};

use data::{CompressedInteractions, CompressedInteractionsUser, TripletMinibatch, Triplets};
use evaluation::full_auc;
use models::factorization::{EmbeddingModel, PairwiseGraph};
use models::loss::{LossFunction, LossKind};
use models::Optimizer;
use sampling::{NegativeAcceptance, NegativeSample, NegativeSampler, SamplingContext};
use {EvaluationError, FittingError, ItemId};

/// Positives handled by one resampling partition. Fixed so that
/// seeded runs do not depend on the number of threads.
const RESAMPLE_PARTITION_SIZE: usize = 4096;

/// Hyperparameters describing the model and its training.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_users: usize,
    num_items: usize,
    latent_dim: usize,
    init_range: f32,
    minibatch_size: usize,
    num_epochs: usize,
    learning_rate: f32,
    l2_penalty: f32,
    loss: LossKind,
    warp: bool,
    margin: f32,
    max_samples: usize,
    optimizer: Optimizer,
    shuffle: bool,
    rng: XorShiftRng,
}

impl Hyperparameters {
    /// Build new hyperparameters for a `num_users` by `num_items` matrix.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Hyperparameters {
            num_users: num_users,
            num_items: num_items,
            latent_dim: 20,
            init_range: 0.1,
            minibatch_size: 64,
            num_epochs: 10,
            learning_rate: 0.05,
            l2_penalty: 0.0,
            loss: LossKind::SigmoidPairwise,
            warp: false,
            margin: 1.0,
            max_samples: 10,
            optimizer: Optimizer::Adagrad,
            shuffle: true,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Set the embedding dimensionality.
    pub fn latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the half-width `r` of the uniform initialization range `[-r, r)`.
    pub fn init_range(mut self, init_range: f32) -> Self {
        self.init_range = init_range;
        self
    }

    /// Set the minibatch size.
    pub fn minibatch_size(mut self, minibatch_size: usize) -> Self {
        self.minibatch_size = minibatch_size;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the loss function.
    pub fn loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    /// Turn WARP sampling and weighting on or off.
    pub fn warp(mut self, warp: bool) -> Self {
        self.warp = warp;
        self
    }

    /// Set the margin of the hinge loss and of the WARP violation test.
    pub fn margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the maximum number of candidate draws per negative.
    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Whether to shuffle the triplets each epoch. Unshuffled
    /// iteration follows the row order of the training matrix.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    /// Set hyperparameters randomly: useful for hyperparameter search.
    pub fn random<R: Rng>(num_users: usize, num_items: usize, rng: &mut R) -> Self {
        Hyperparameters {
            num_users: num_users,
            num_items: num_items,
            latent_dim: 2_usize.pow(Uniform::new(3, 8).sample(rng)),
            init_range: Uniform::new(0.05, 0.5).sample(rng),
            minibatch_size: 2_usize.pow(Uniform::new(4, 9).sample(rng)),
            num_epochs: 2_usize.pow(Uniform::new(2, 6).sample(rng)),
            learning_rate: (10.0_f32).powf(Uniform::new(-3.0, -0.5).sample(rng)),
            l2_penalty: (10.0_f32).powf(Uniform::new(-7.0, -3.0).sample(rng)),
            loss: if Uniform::new(0.0, 1.0).sample(rng) < 0.5 {
                LossKind::SigmoidPairwise
            } else {
                LossKind::Hinge
            },
            warp: Uniform::new(0.0, 1.0).sample(rng) < 0.5,
            margin: 1.0,
            max_samples: 2_usize.pow(Uniform::new(1, 8).sample(rng)),
            optimizer: if Uniform::new(0.0, 1.0).sample(rng) < 0.5 {
                Optimizer::Adam
            } else {
                Optimizer::Adagrad
            },
            shuffle: true,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    fn validate(&self) -> Result<(), FittingError> {
        let invalid = |message: &str| Err(FittingError::InvalidHyperparameter(message.to_owned()));

        if self.latent_dim == 0 {
            return invalid("latent_dim must be positive");
        }
        if self.minibatch_size == 0 {
            return invalid("minibatch_size must be positive");
        }
        if self.max_samples == 0 {
            return invalid("max_samples must be positive");
        }
        if !(self.init_range.is_finite() && self.init_range > 0.0) {
            return invalid("init_range must be positive and finite");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive and finite");
        }
        if !(self.l2_penalty.is_finite() && self.l2_penalty >= 0.0) {
            return invalid("l2_penalty must be non-negative and finite");
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return invalid("margin must be non-negative and finite");
        }

        Ok(())
    }

    /// Validate the hyperparameters and build a trainer with a
    /// freshly initialized model.
    pub fn build(mut self) -> Result<Trainer, FittingError> {
        self.validate()?;

        let model = EmbeddingModel::new(
            self.num_users,
            self.num_items,
            self.latent_dim,
            self.init_range,
            &mut self.rng,
        );

        let state = TrainerState {
            model: model,
            optimizer: self.optimizer.build(self.learning_rate, self.l2_penalty),
            loss: LossFunction::new(self.loss, self.warp, self.margin),
            sampler: NegativeSampler::new(self.max_samples),
            rng: XorShiftRng::from_seed(self.rng.gen()),
            minibatch_size: self.minibatch_size,
            shuffle: self.shuffle,
        };

        Ok(Trainer {
            hyper: self,
            state: state,
            epochs_completed: 0,
        })
    }
}

/// Statistics of a single training epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochStats {
    /// Number of training triplets.
    pub num_triplets: usize,
    /// Number of sampler calls that ran out of draws.
    pub num_exhausted: usize,
    /// Mean number of draws per triplet; zero for an empty epoch.
    pub mean_num_samples: f32,
    /// Mean (weighted) loss per triplet; zero for an empty epoch.
    pub loss: f32,
    /// Number of optimizer steps taken.
    pub num_minibatches: usize,
    /// Wall time spent resampling and training.
    pub elapsed: Duration,
}

/// Diagnostics reported after each epoch of `Trainer::fit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochReport {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Mean (weighted) training loss per triplet.
    pub loss: f32,
    /// Mean per-user AUC on the training matrix, `None` if undefined.
    pub train_auc: Option<f32>,
    /// Mean per-user AUC on the held-out matrix, `None` if undefined.
    pub test_auc: Option<f32>,
    /// Mean sampling effort per triplet.
    pub mean_num_samples: f32,
    /// Wall time spent resampling and training.
    pub elapsed: Duration,
}

/// Everything the epoch loop reads and mutates.
pub struct TrainerState {
    model: EmbeddingModel,
    optimizer: Optimizers,
    loss: LossFunction,
    sampler: NegativeSampler,
    rng: XorShiftRng,
    minibatch_size: usize,
    shuffle: bool,
}

impl TrainerState {
    /// Draw one negative for every positive of `train`. Users without
    /// positives contribute no triplets.
    fn resample(&mut self, train: &CompressedInteractions) -> (Triplets, usize) {
        let positives: Vec<(CompressedInteractionsUser, ItemId)> = train
            .iter_users()
            .flat_map(|user| user.item_ids.iter().map(move |&item_id| (user, item_id)))
            .collect();

        if positives.is_empty() {
            return (Triplets::default(), 0);
        }

        let num_partitions =
            (positives.len() + RESAMPLE_PARTITION_SIZE - 1) / RESAMPLE_PARTITION_SIZE;
        let rng = &mut self.rng;
        let seeds: Vec<[u8; 16]> = (0..num_partitions).map(|_| rng.gen()).collect();

        let model = &self.model;
        let warp = self.loss.is_warp();

        let positive_scores: Vec<f32> = if warp {
            positives
                .par_iter()
                .map(|&(user, item_id)| model.predict_single(user.user_id, item_id))
                .collect()
        } else {
            vec![0.0; positives.len()]
        };

        let acceptance = if warp {
            NegativeAcceptance::MarginViolation {
                model: model,
                margin: self.loss.margin(),
            }
        } else {
            NegativeAcceptance::AlwaysAccept
        };

        let sampler = &self.sampler;
        let num_items = train.num_items();

        let samples: Vec<Vec<NegativeSample>> = positives
            .par_chunks(RESAMPLE_PARTITION_SIZE)
            .zip(positive_scores.par_chunks(RESAMPLE_PARTITION_SIZE))
            .zip(seeds.into_par_iter())
            .map(|((partition, scores), seed)| {
                let mut rng = XorShiftRng::from_seed(seed);

                partition
                    .iter()
                    .zip(scores)
                    .map(|(&(user, _), &positive_score)| {
                        let context = SamplingContext {
                            user_id: user.user_id,
                            positive_score: positive_score,
                        };

                        sampler.sample(&user, num_items, &acceptance, &context, &mut rng)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut triplets = Triplets::with_capacity(positives.len());
        let mut num_exhausted = 0;

        let samples = samples.iter().flat_map(|partition| partition);

        for (&(user, positive_item_id), sample) in positives.iter().zip(samples) {
            if !sample.accepted {
                num_exhausted += 1;
            }

            triplets.push(user.user_id, positive_item_id, sample.item_id, sample.num_samples);
        }

        (triplets, num_exhausted)
    }

    /// One forward/backward pass and optimizer step. Returns the
    /// summed loss of the minibatch before the update.
    fn train_minibatch(
        &self,
        graph: &mut PairwiseGraph,
        batch: &TripletMinibatch,
        num_items: usize,
    ) -> f32 {
        graph.user_idx.set_value(batch.user_ids);
        graph.positive_idx.set_value(batch.positive_item_ids);
        graph.negative_idx.set_value(batch.negative_item_ids);

        if self.loss.is_warp() {
            let loss = &self.loss;
            let weights = Arr::from_shape_fn((batch.len(), 1), |(row, _)| {
                loss.weight(batch.num_samples[row], num_items)
            });
            graph.weights.set_value(&weights);
        }

        graph.loss.forward();
        let loss_value = graph.loss.value().scalar_sum();

        graph.loss.backward(1.0 / batch.len() as f32);
        self.apply_update(graph);

        loss_value
    }

    /// Apply the accumulated gradients to the embedding tables in place.
    fn apply_update(&self, graph: &mut PairwiseGraph) {
        self.optimizer.step(graph.loss.parameters());
    }

    /// Run all minibatches of `triplets` in order. Returns the summed
    /// loss and the number of optimizer steps.
    fn train(&self, triplets: &Triplets, num_items: usize) -> (f32, usize) {
        // Graphs have a fixed minibatch size; the last, shorter,
        // minibatch gets its own.
        let mut full_graph: Option<PairwiseGraph> = None;
        let mut tail_graph: Option<PairwiseGraph> = None;

        let mut loss_value = 0.0;
        let mut num_minibatches = 0;

        for batch in triplets.iter_minibatch(self.minibatch_size) {
            let graph = if batch.len() == self.minibatch_size {
                &mut full_graph
            } else {
                &mut tail_graph
            };
            let graph =
                graph.get_or_insert_with(|| self.model.pairwise_graph(batch.len(), &self.loss));

            loss_value += self.train_minibatch(graph, &batch, num_items);
            num_minibatches += 1;
        }

        (loss_value, num_minibatches)
    }
}

fn defined_auc(
    result: Result<f32, EvaluationError>,
    name: &str,
) -> Result<Option<f32>, FittingError> {
    match result {
        Ok(auc) => Ok(Some(auc)),
        Err(EvaluationError::NoQualifyingUsers) => {
            warn!("No users qualify for {} AUC; reporting it as undefined.", name);
            Ok(None)
        }
        Err(error) => Err(error.into()),
    }
}

/// Trains an `EmbeddingModel` with pairwise losses.
pub struct Trainer {
    hyper: Hyperparameters,
    state: TrainerState,
    epochs_completed: usize,
}

impl Trainer {
    /// The hyperparameters the trainer was built from.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// The model being trained.
    pub fn model(&self) -> &EmbeddingModel {
        &self.state.model
    }

    /// Consume the trainer, returning the trained model.
    pub fn into_model(self) -> EmbeddingModel {
        self.state.model
    }

    /// Number of epochs run so far.
    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    fn check_shape(&self, interactions: &CompressedInteractions) -> Result<(), FittingError> {
        let expected = (self.state.model.num_users(), self.state.model.num_items());

        if interactions.shape() != expected {
            return Err(FittingError::ShapeMismatch {
                expected: expected,
                actual: interactions.shape(),
            });
        }

        Ok(())
    }

    /// Run a single epoch over `train` without evaluating.
    pub fn fit_epoch(
        &mut self,
        train: &CompressedInteractions,
    ) -> Result<EpochStats, FittingError> {
        self.check_shape(train)?;

        let start = Instant::now();

        let (mut triplets, num_exhausted) = self.state.resample(train);

        debug!(
            "Resampled {} triplets, {} exhausted, mean effort {:.2}",
            triplets.len(),
            num_exhausted,
            triplets.mean_num_samples()
        );

        if self.state.shuffle {
            triplets.shuffle(&mut self.state.rng);
        }

        let (loss_sum, num_minibatches) = self.state.train(&triplets, train.num_items());

        self.epochs_completed += 1;

        Ok(EpochStats {
            num_triplets: triplets.len(),
            num_exhausted: num_exhausted,
            mean_num_samples: triplets.mean_num_samples(),
            loss: if triplets.is_empty() {
                0.0
            } else {
                loss_sum / triplets.len() as f32
            },
            num_minibatches: num_minibatches,
            elapsed: start.elapsed(),
        })
    }

    /// Run `num_epochs` epochs, evaluating the model on `train` and
    /// `test` after each one.
    pub fn fit(
        &mut self,
        train: &CompressedInteractions,
        test: &CompressedInteractions,
    ) -> Result<Vec<EpochReport>, FittingError> {
        self.check_shape(train)?;
        self.check_shape(test)?;

        let mut reports = Vec::with_capacity(self.hyper.num_epochs);

        for _ in 0..self.hyper.num_epochs {
            let epoch = self.epochs_completed;
            let stats = self.fit_epoch(train)?;

            let train_auc = defined_auc(full_auc(&self.state.model, train), "train")?;
            let test_auc = defined_auc(full_auc(&self.state.model, test), "test")?;

            info!(
                "Epoch {}: loss {:.4}, train AUC {:?}, test AUC {:?}, mean effort {:.2}, {:?}",
                epoch, stats.loss, train_auc, test_auc, stats.mean_num_samples, stats.elapsed
            );

            reports.push(EpochReport {
                epoch: epoch,
                loss: stats.loss,
                train_auc: train_auc,
                test_auc: test_auc,
                mean_num_samples: stats.mean_num_samples,
                elapsed: stats.elapsed,
            });
        }

        Ok(reports)
    }
}
