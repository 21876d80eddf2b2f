//! Built-in datasets for easy testing and experimentation.
#[cfg(feature = "default")]
use std::env;
#[cfg(feature = "default")]
use std::fs::{create_dir_all, rename, File};
#[cfg(feature = "default")]
use std::io::BufWriter;
#[cfg(feature = "default")]
use std::path::{Path, PathBuf};

#[cfg(feature = "default")]
use csv;
#[cfg(feature = "default")]
use failure;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
#[cfg(feature = "default")]
use reqwest;

use data::{Interaction, Interactions};

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// Can't find the home directory.
    #[fail(display = "Cannot find home directory.")]
    NoHomeDir,
}

#[cfg(feature = "default")]
fn create_data_dir() -> Result<PathBuf, failure::Error> {
    #[allow(deprecated)]
    let path = env::home_dir()
        .ok_or_else(|| DatasetError::NoHomeDir)?
        .join(".warpfm");

    if !path.exists() {
        create_dir_all(&path)?;
    }

    Ok(path)
}

#[cfg(feature = "default")]
fn download(url: &str, dest_filename: &Path) -> Result<Interactions, failure::Error> {
    let data_dir = create_data_dir()?;
    let desired_filename = data_dir.join(dest_filename);
    let temp_filename = env::temp_dir().join(dest_filename);

    if !desired_filename.exists() {
        info!("Downloading {} to {:?}", url, desired_filename);

        let file = File::create(&temp_filename)?;
        let mut writer = BufWriter::new(file);

        let mut response = reqwest::get(url)?;
        response.copy_to(&mut writer)?;

        rename(temp_filename, &desired_filename)?;
    }

    let mut reader = csv::Reader::from_path(desired_filename)?;
    let interactions: Vec<Interaction> = reader.deserialize().collect::<Result<Vec<_>, _>>()?;

    Ok(Interactions::from(interactions))
}

/// Download the Movielens 100K dataset and return it.
///
/// The data is stored in `~/.warpfm/`.
#[cfg(feature = "default")]
pub fn download_movielens_100k() -> Result<Interactions, failure::Error> {
    download(
        "https://github.com/maciejkula/sbr-rs/raw/master/data.csv",
        Path::new("movielens_100K.csv"),
    )
}

/// Generate interactions with planted cluster structure.
///
/// Users and items are assigned to `num_clusters` clusters round-robin.
/// Each user draws `interactions_per_user` items: with probability
/// `noise` uniformly from the whole catalogue, otherwise from their own
/// cluster, skewed towards the cluster's lower item ids so that items
/// within a cluster differ in popularity. Repeated draws collapse into
/// a single entry once the interactions are compressed.
pub fn synthetic<R: Rng>(
    num_users: usize,
    num_items: usize,
    num_clusters: usize,
    interactions_per_user: usize,
    noise: f32,
    rng: &mut R,
) -> Interactions {
    let mut interactions = Interactions::new(num_users, num_items);

    if num_items == 0 {
        return interactions;
    }

    let num_clusters = num_clusters.max(1).min(num_items);
    let item_range = Uniform::new(0, num_items);
    let unit_range = Uniform::new(0.0f32, 1.0);
    let mut timestamp = 0;

    for user_id in 0..num_users {
        let cluster = user_id % num_clusters;
        let cluster_size = (num_items - cluster + num_clusters - 1) / num_clusters;

        for _ in 0..interactions_per_user {
            let item_id = if unit_range.sample(rng) < noise {
                item_range.sample(rng)
            } else {
                let position = unit_range.sample(rng).powi(2) * cluster_size as f32;
                let position = (position as usize).min(cluster_size - 1);

                cluster + position * num_clusters
            };

            interactions.push(Interaction::new(user_id, item_id, timestamp));
            timestamp += 1;
        }
    }

    interactions
}
