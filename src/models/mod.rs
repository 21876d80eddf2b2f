//! Models module.
use wyrm;
use wyrm::optim::Optimizers;

pub mod factorization;
pub mod loss;

/// Optimizer used to train the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

impl Optimizer {
    pub(crate) fn build(&self, learning_rate: f32, l2_penalty: f32) -> Optimizers {
        match *self {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(learning_rate)
                    .l2_penalty(l2_penalty),
            ),
            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(learning_rate)
                    .l2_penalty(l2_penalty),
            ),
        }
    }
}
