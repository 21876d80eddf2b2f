extern crate env_logger;
extern crate failure;
extern crate rand;
extern crate serde;
extern crate serde_json;
#[macro_use]
extern crate serde_derive;
extern crate warpfm;

use std::fs::File;
use std::time::{Duration, Instant};

use warpfm::data::train_test_split;
use warpfm::datasets::download_movielens_100k;
use warpfm::training::{EpochReport, Hyperparameters};

#[derive(Debug, Serialize, Deserialize)]
struct Result {
    test_auc: f32,
    train_auc: f32,
    elapsed: Duration,
    epochs: Vec<EpochReport>,
    hyperparameters: Hyperparameters,
}

const RESULTS_PATH: &str = "factorization_results.json";

fn load_results() -> Vec<Result> {
    File::open(RESULTS_PATH)
        .ok()
        .and_then(|file| serde_json::from_reader(&file).ok())
        .unwrap_or_default()
}

fn main() -> std::result::Result<(), failure::Error> {
    env_logger::init();

    let mut data = download_movielens_100k()?;
    let mut rng = rand::thread_rng();

    let (train, test) = train_test_split(&mut data, &mut rng, 0.2);
    let train_mat = train.to_compressed();
    let test_mat = test.to_compressed();

    println!("Users {} items {}", data.num_users(), data.num_items());
    println!("Train: {}, test: {}", train.len(), test.len());

    for _ in 0..1000 {
        let mut results = load_results();

        let hyper = Hyperparameters::random(data.num_users(), data.num_items(), &mut rng);
        println!("Running {:#?}", &hyper);

        let start = Instant::now();
        let mut trainer = hyper.clone().build()?;
        let epochs = trainer.fit(&train_mat, &test_mat)?;

        let (train_auc, test_auc) = match epochs.last() {
            Some(&EpochReport {
                train_auc: Some(train_auc),
                test_auc: Some(test_auc),
                ..
            }) => (train_auc, test_auc),
            _ => continue,
        };

        let result = Result {
            train_auc: train_auc,
            test_auc: test_auc,
            elapsed: start.elapsed(),
            epochs: epochs,
            hyperparameters: hyper,
        };

        println!(
            "Train AUC {} test AUC {} in {:?}",
            result.train_auc, result.test_auc, result.elapsed
        );

        if !result.test_auc.is_nan() {
            results.push(result);
            results.sort_by(|a, b| {
                a.test_auc
                    .partial_cmp(&b.test_auc)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        println!("Best result: {:#?}", results.last());

        let file = File::create(RESULTS_PATH)?;
        serde_json::to_writer_pretty(&file, &results)?;
    }

    Ok(())
}
