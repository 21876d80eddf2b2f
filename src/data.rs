//! Interaction data: raw interactions, the compressed user-by-item
//! matrix, and the per-epoch training triplets.
use std::cmp::Ordering;

use rand::Rng;

use super::{ItemId, Timestamp, UserId};

/// A single implicit-feedback interaction.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    timestamp: Timestamp,
}

impl Interaction {
    /// Create a new interaction.
    pub fn new(user_id: UserId, item_id: ItemId, timestamp: Timestamp) -> Self {
        Interaction {
            user_id,
            item_id,
            timestamp,
        }
    }

    /// Return the user id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    /// Return the item id.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }
    /// Return the timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Randomly split interactions into train and test sets, with
/// `test_fraction` of all interactions going into the test set.
pub fn train_test_split<R: Rng>(
    interactions: &mut Interactions,
    rng: &mut R,
    test_fraction: f32,
) -> (Interactions, Interactions) {
    interactions.shuffle(rng);

    let test_fraction = test_fraction.max(0.0).min(1.0);
    let (test, train) = interactions.split_at((test_fraction * interactions.len() as f32) as usize);

    (train, test)
}

/// A collection of raw interactions, together with the
/// dimensions of the user and item spaces.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Create an empty collection with a fixed shape.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users: num_users,
            num_items: num_items,
            interactions: Vec::new(),
        }
    }

    /// Add an interaction, growing the shape if necessary.
    pub fn push(&mut self, interaction: Interaction) {
        self.num_users = self.num_users.max(interaction.user_id() + 1);
        self.num_items = self.num_items.max(interaction.item_id() + 1);
        self.interactions.push(interaction);
    }

    /// Return the underlying interactions.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Return the number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Shuffle the interactions in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        rng.shuffle(&mut self.interactions);
    }

    /// Split at `idx`, keeping the shape on both sides.
    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let idx = idx.min(self.len());

        let head = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self.interactions[..idx].to_owned(),
        };
        let tail = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self.interactions[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Convert to the compressed user-by-item matrix.
    pub fn to_compressed(&self) -> CompressedInteractions {
        CompressedInteractions::from(self)
    }

    /// Return the number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Return the number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Return the (users, items) shape.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id()).max().map_or(0, |x| x + 1);
        let num_items = data.iter().map(|x| x.item_id()).max().map_or(0, |x| x + 1);

        Interactions {
            num_users: num_users,
            num_items: num_items,
            interactions: data,
        }
    }
}

fn cmp_user_item(x: &Interaction, y: &Interaction) -> Ordering {
    x.user_id()
        .cmp(&y.user_id())
        .then_with(|| x.item_id().cmp(&y.item_id()))
}

/// Binary user-by-item interaction matrix in compressed row form.
///
/// Each user's item ids are sorted and unique, so membership tests
/// are a binary search over the row.
#[derive(Clone, Debug)]
pub struct CompressedInteractions {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
}

impl<'a> From<&'a Interactions> for CompressedInteractions {
    fn from(interactions: &Interactions) -> CompressedInteractions {
        let mut data = interactions.data().to_owned();

        data.sort_by(cmp_user_item);
        data.dedup_by(|x, y| x.user_id() == y.user_id() && x.item_id() == y.item_id());

        let mut user_pointers = vec![0; interactions.num_users + 1];
        let mut item_ids = Vec::with_capacity(data.len());

        for datum in &data {
            item_ids.push(datum.item_id());

            user_pointers[datum.user_id() + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        CompressedInteractions {
            num_users: interactions.num_users,
            num_items: interactions.num_items,
            user_pointers: user_pointers,
            item_ids: item_ids,
        }
    }
}

impl CompressedInteractions {
    /// Iterate over all user rows, including empty ones.
    pub fn iter_users(&self) -> CompressedInteractionsUserIterator {
        CompressedInteractionsUserIterator {
            interactions: &self,
            idx: 0,
        }
    }

    /// Return the row of `user_id`, or `None` if out of range.
    pub fn get_user(&self, user_id: UserId) -> Option<CompressedInteractionsUser> {
        if user_id >= self.num_users {
            return None;
        }

        let start = self.user_pointers[user_id];
        let stop = self.user_pointers[user_id + 1];

        Some(CompressedInteractionsUser {
            user_id: user_id,
            item_ids: &self.item_ids[start..stop],
        })
    }

    /// Number of nonzero entries.
    pub fn nnz(&self) -> usize {
        self.item_ids.len()
    }

    /// Return the number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Return the number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Return the (users, items) shape.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Iterator over the rows of a `CompressedInteractions` matrix.
pub struct CompressedInteractionsUserIterator<'a> {
    interactions: &'a CompressedInteractions,
    idx: usize,
}

/// A single user's row: the sorted ids of the items they interacted with.
#[derive(Clone, Copy, Debug)]
pub struct CompressedInteractionsUser<'a> {
    /// The user id.
    pub user_id: UserId,
    /// Sorted, unique ids of the user's positive items.
    pub item_ids: &'a [ItemId],
}

impl<'a> CompressedInteractionsUser<'a> {
    /// Number of positive items.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the user has no positive items.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Whether `item_id` is one of the user's positives.
    pub fn contains(&self, item_id: ItemId) -> bool {
        self.item_ids.binary_search(&item_id).is_ok()
    }
}

impl<'a> Iterator for CompressedInteractionsUserIterator<'a> {
    type Item = CompressedInteractionsUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.interactions.get_user(self.idx);
        self.idx += 1;

        value
    }
}

/// Training triplets for one epoch: for every positive interaction,
/// the sampled negative item and the number of draws it took.
#[derive(Clone, Debug, Default)]
pub struct Triplets {
    /// User ids.
    pub user_ids: Vec<UserId>,
    /// Positive item ids.
    pub positive_item_ids: Vec<ItemId>,
    /// Sampled negative item ids.
    pub negative_item_ids: Vec<ItemId>,
    /// Sampling effort for each triplet.
    pub num_samples: Vec<usize>,
}

impl Triplets {
    /// Create empty triplets with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Triplets {
            user_ids: Vec::with_capacity(capacity),
            positive_item_ids: Vec::with_capacity(capacity),
            negative_item_ids: Vec::with_capacity(capacity),
            num_samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a triplet.
    pub fn push(
        &mut self,
        user_id: UserId,
        positive_item_id: ItemId,
        negative_item_id: ItemId,
        num_samples: usize,
    ) {
        self.user_ids.push(user_id);
        self.positive_item_ids.push(positive_item_id);
        self.negative_item_ids.push(negative_item_id);
        self.num_samples.push(num_samples);
    }

    /// Number of triplets.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether there are no triplets.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Mean sampling effort, or zero for no triplets.
    pub fn mean_num_samples(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }

        self.num_samples.iter().sum::<usize>() as f32 / self.len() as f32
    }

    /// Reorder the triplets by a random permutation.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut permutation: Vec<usize> = (0..self.len()).collect();
        rng.shuffle(&mut permutation);

        self.permute(&permutation);
    }

    /// Reorder the triplets so that position `i` holds the
    /// triplet previously at `permutation[i]`.
    pub fn permute(&mut self, permutation: &[usize]) {
        fn gather(values: &[usize], permutation: &[usize]) -> Vec<usize> {
            permutation.iter().map(|&idx| values[idx]).collect()
        }

        self.user_ids = gather(&self.user_ids, permutation);
        self.positive_item_ids = gather(&self.positive_item_ids, permutation);
        self.negative_item_ids = gather(&self.negative_item_ids, permutation);
        self.num_samples = gather(&self.num_samples, permutation);
    }

    /// Iterate over contiguous minibatches of `minibatch_size`
    /// triplets. The final minibatch may be shorter.
    pub fn iter_minibatch(&self, minibatch_size: usize) -> TripletMinibatchIterator {
        TripletMinibatchIterator {
            triplets: &self,
            idx: 0,
            minibatch_size: minibatch_size.max(1),
        }
    }
}

/// Iterator over minibatches of triplets.
#[derive(Clone, Debug)]
pub struct TripletMinibatchIterator<'a> {
    triplets: &'a Triplets,
    idx: usize,
    minibatch_size: usize,
}

/// A borrowed minibatch of triplets.
#[derive(Debug)]
pub struct TripletMinibatch<'a> {
    /// User ids.
    pub user_ids: &'a [UserId],
    /// Positive item ids.
    pub positive_item_ids: &'a [ItemId],
    /// Negative item ids.
    pub negative_item_ids: &'a [ItemId],
    /// Sampling effort for each triplet.
    pub num_samples: &'a [usize],
}

impl<'a> TripletMinibatch<'a> {
    /// Number of triplets in the minibatch.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the minibatch is empty.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

impl<'a> Iterator for TripletMinibatchIterator<'a> {
    type Item = TripletMinibatch<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.triplets.len() {
            return None;
        }

        let start = self.idx;
        let stop = (self.idx + self.minibatch_size).min(self.triplets.len());
        self.idx = stop;

        Some(TripletMinibatch {
            user_ids: &self.triplets.user_ids[start..stop],
            positive_item_ids: &self.triplets.positive_item_ids[start..stop],
            negative_item_ids: &self.triplets.negative_item_ids[start..stop],
            num_samples: &self.triplets.num_samples[start..stop],
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn triplets(len: usize) -> Triplets {
        let mut triplets = Triplets::with_capacity(len);

        for idx in 0..len {
            triplets.push(idx, idx + 1, idx + 2, 1);
        }

        triplets
    }

    #[test]
    fn compressed_rows_are_sorted_and_unique() {
        let interactions = Interactions::from(vec![
            Interaction::new(1, 5, 0),
            Interaction::new(1, 2, 1),
            Interaction::new(1, 5, 2),
            Interaction::new(3, 0, 3),
        ]);
        let mat = interactions.to_compressed();

        assert_eq!(mat.shape(), (4, 6));
        assert_eq!(mat.nnz(), 3);
        assert_eq!(mat.get_user(1).unwrap().item_ids, &[2, 5]);
        assert!(mat.get_user(0).unwrap().is_empty());
        assert!(mat.get_user(2).unwrap().is_empty());
        assert!(mat.get_user(3).unwrap().contains(0));
        assert!(!mat.get_user(3).unwrap().contains(1));
        assert!(mat.get_user(4).is_none());
        assert_eq!(mat.iter_users().count(), 4);
    }

    #[test]
    fn empty_interactions() {
        let interactions = Interactions::from(Vec::new());
        let mat = interactions.to_compressed();

        assert_eq!(mat.shape(), (0, 0));
        assert_eq!(mat.iter_users().count(), 0);
    }

    #[test]
    fn split_keeps_shape() {
        let mut interactions = Interactions::new(10, 20);
        for idx in 0..100 {
            interactions.push(Interaction::new(idx % 10, idx % 20, idx));
        }

        let mut rng = XorShiftRng::from_seed([42; 16]);
        let (train, test) = train_test_split(&mut interactions, &mut rng, 0.2);

        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert_eq!(train.shape(), (10, 20));
        assert_eq!(test.shape(), (10, 20));
    }

    #[test]
    fn minibatch_chunking() {
        for &(len, size) in &[(0, 4), (1, 4), (4, 4), (5, 4), (10, 3), (64, 64), (65, 64)] {
            let data = triplets(len);
            let sizes: Vec<usize> = data.iter_minibatch(size).map(|batch| batch.len()).collect();

            let expected_chunks = (len + size - 1) / size;
            assert_eq!(sizes.len(), expected_chunks);

            if let Some((&last, rest)) = sizes.split_last() {
                assert!(rest.iter().all(|&chunk| chunk == size));

                let expected_last = if len % size == 0 { size } else { len % size };
                assert_eq!(last, expected_last);
            }

            assert_eq!(sizes.iter().sum::<usize>(), len);
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut data = triplets(50);
        let mut rng = XorShiftRng::from_seed([7; 16]);
        data.shuffle(&mut rng);

        let mut users = data.user_ids.clone();
        users.sort();
        assert_eq!(users, (0..50).collect::<Vec<_>>());

        for (&user, &positive, &negative) in
            izip!(&data.user_ids, &data.positive_item_ids, &data.negative_item_ids)
        {
            assert_eq!(positive, user + 1);
            assert_eq!(negative, user + 2);
        }
    }
}
