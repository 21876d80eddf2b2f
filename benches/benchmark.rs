#[macro_use]
extern crate criterion;

extern crate rand;
extern crate warpfm;

use criterion::Criterion;
use rand::{SeedableRng, XorShiftRng};

use warpfm::data::CompressedInteractions;
use warpfm::datasets::synthetic;
use warpfm::evaluation::full_auc;
use warpfm::models::loss::LossKind;
use warpfm::training::Hyperparameters;

fn load_synthetic() -> CompressedInteractions {
    let mut rng = XorShiftRng::from_seed([42; 16]);

    synthetic(944, 1683, 20, 100, 0.05, &mut rng).to_compressed()
}

fn bench_epoch(c: &mut Criterion, name: &str, loss: LossKind, warp: bool) {
    c.bench_function(name, move |b| {
        let data = load_synthetic();

        let mut trainer = Hyperparameters::new(data.num_users(), data.num_items())
            .latent_dim(32)
            .minibatch_size(64)
            .loss(loss)
            .warp(warp)
            .from_seed([42; 16])
            .build()
            .unwrap();

        b.iter(|| {
            trainer.fit_epoch(&data).unwrap();
        })
    });
}

fn bench_bpr(c: &mut Criterion) {
    bench_epoch(c, "bpr_epoch", LossKind::SigmoidPairwise, false);
}

fn bench_warp(c: &mut Criterion) {
    bench_epoch(c, "warp_epoch", LossKind::Hinge, true);
}

fn bench_auc(c: &mut Criterion) {
    c.bench_function("full_auc", |b| {
        let data = load_synthetic();
        let trainer = Hyperparameters::new(data.num_users(), data.num_items())
            .from_seed([42; 16])
            .build()
            .unwrap();

        b.iter(|| full_auc(trainer.model(), &data).unwrap())
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_bpr, bench_warp, bench_auc
}
criterion_main!(benches);
